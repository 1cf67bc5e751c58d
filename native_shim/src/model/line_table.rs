//! Delta-encoded VLQ line table: maps instruction positions to source lines.
//!
//! Each entry is 2 VLQ values:
//! - `delta_position` (unsigned VLQ)
//! - `delta_line` (signed, zigzag + VLQ)
//!
/// Accumulates line table entries for one executable unit.
pub struct LineTableBuilder {
    entries: Vec<(u32, i32)>, // (position, line)
}

impl LineTableBuilder {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Positions must be added in increasing order.
    pub fn add(&mut self, position: u32, line: i32) {
        debug_assert!(
            self.entries.last().is_none_or(|&(last, _)| last <= position),
            "positions must not go backwards"
        );
        self.entries.push((position, line));
    }

    pub fn finish(self) -> Vec<u8> {
        let mut buf = Vec::new();
        let mut prev_position: u32 = 0;
        let mut prev_line: i64 = 0;

        for (position, line) in &self.entries {
            let delta_position = position - prev_position;
            let delta_line = i64::from(*line) - prev_line;

            encode_unsigned_vlq(delta_position, &mut buf);
            encode_unsigned_vlq(zigzag_encode(delta_line), &mut buf);

            prev_position = *position;
            prev_line = i64::from(*line);
        }

        buf
    }
}

impl Default for LineTableBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Line of the last entry with `position <= target`.
pub fn line_table_lookup(encoded: &[u8], target: u32) -> Option<i32> {
    let mut pos = 0;
    let mut position: u64 = 0;
    let mut line: i64 = 0;
    let mut best = None;

    while pos < encoded.len() {
        let delta_position = decode_unsigned_vlq(encoded, &mut pos)?;
        let delta_line = zigzag_decode(decode_unsigned_vlq(encoded, &mut pos)?);

        position += delta_position;
        line += delta_line;

        if position > u64::from(target) {
            break;
        }
        best = Some(i32::try_from(line).ok()?);
    }

    best
}

// Line deltas span the full i32 range, so the signed side is carried in u64.

fn encode_unsigned_vlq(value: impl Into<u64>, buf: &mut Vec<u8>) {
    let mut rest = value.into();
    while rest >= 0x80 {
        buf.push((rest as u8 & 0x7F) | 0x80);
        rest >>= 7;
    }
    buf.push(rest as u8);
}

fn decode_unsigned_vlq(encoded: &[u8], pos: &mut usize) -> Option<u64> {
    let mut result = 0u64;
    for shift in (0..64).step_by(7) {
        let byte = *encoded.get(*pos)?;
        *pos += 1;
        result |= u64::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            return Some(result);
        }
    }
    None
}

fn zigzag_encode(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

fn zigzag_decode(value: u64) -> i64 {
    (value >> 1) as i64 ^ -((value & 1) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_table() {
        let encoded = LineTableBuilder::new().finish();
        assert!(encoded.is_empty());
        assert_eq!(line_table_lookup(&encoded, 0), None);
    }

    #[test]
    fn one_entry_per_position() {
        let mut builder = LineTableBuilder::new();
        for (position, line) in [(0, 10), (1, 11), (2, 12)] {
            builder.add(position, line);
        }
        let encoded = builder.finish();

        assert_eq!(line_table_lookup(&encoded, 0), Some(10));
        assert_eq!(line_table_lookup(&encoded, 1), Some(11));
        assert_eq!(line_table_lookup(&encoded, 2), Some(12));
        assert_eq!(line_table_lookup(&encoded, 40), Some(12));
    }

    #[test]
    fn lines_may_go_backwards() {
        let mut builder = LineTableBuilder::new();
        builder.add(0, 300);
        builder.add(4, 2);
        builder.add(9, 150);
        let encoded = builder.finish();

        assert_eq!(line_table_lookup(&encoded, 3), Some(300));
        assert_eq!(line_table_lookup(&encoded, 4), Some(2));
        assert_eq!(line_table_lookup(&encoded, 9), Some(150));
    }

    #[test]
    #[should_panic(expected = "positions must not go backwards")]
    fn positions_are_monotonic() {
        let mut builder = LineTableBuilder::new();
        builder.add(3, 1);
        builder.add(2, 1);
    }

    #[test]
    fn extreme_line_jumps() {
        let mut builder = LineTableBuilder::new();
        builder.add(0, i32::MIN);
        builder.add(1, i32::MAX);
        builder.add(u32::MAX, 0);
        let encoded = builder.finish();

        assert_eq!(line_table_lookup(&encoded, 0), Some(i32::MIN));
        assert_eq!(line_table_lookup(&encoded, 1), Some(i32::MAX));
        assert_eq!(line_table_lookup(&encoded, u32::MAX), Some(0));
    }

    #[test]
    fn truncated_table_is_rejected() {
        let mut builder = LineTableBuilder::new();
        builder.add(0, 100_000);
        let mut encoded = builder.finish();
        encoded.pop();
        assert_eq!(line_table_lookup(&encoded, 0), None);
    }
}
