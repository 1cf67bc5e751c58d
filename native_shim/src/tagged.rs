//! Value: any raw VM word, small integer/reference/special constant
//!
//! Symbol: interned identifier handed out by the host
//!
//! Values are opaque to the shim. The shim never owns what a reference points
//! at, it only moves words between generated code and the host.

#[allow(unused)]
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ValueTag {
    Fixnum = 0b0,
    Reference = 0b01,
    Special = 0b11,
}

pub const OBJECT_TAG_MASK: u64 = 0b11;

/// A generic VM value
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct Value(u64);

/// An interned identifier
#[repr(transparent)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Symbol(u64);

impl Value {
    pub const FALSE: Value = Value::special(0);
    pub const TRUE: Value = Value::special(1);
    pub const NIL: Value = Value::special(2);
    /// Marker for "no value", never visible to user code.
    pub const UNDEF: Value = Value::special(3);

    const fn special(n: u64) -> Self {
        Self((n << 2) | ValueTag::Special as u64)
    }

    pub fn from_fixnum(value: i64) -> Self {
        let casted = value.cast_unsigned();
        Self(casted << 1)
    }

    pub fn from_usize(value: usize) -> Self {
        Self::from_fixnum(value as i64)
    }

    pub fn from_bool(value: bool) -> Self {
        if value { Self::TRUE } else { Self::FALSE }
    }

    /// Builds a reference from a host-chosen index.
    /// The index must fit in 62 bits.
    pub fn from_reference(index: usize) -> Self {
        let value = index as u64;
        debug_assert!(value >> 62 == 0, "reference index exceeds 62 bits");
        Self((value << 2) | ValueTag::Reference as u64)
    }

    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }

    pub fn tag(self) -> ValueTag {
        if self.0 & 0b1 == ValueTag::Fixnum as u64 {
            ValueTag::Fixnum
        } else if self.0 & OBJECT_TAG_MASK == ValueTag::Reference as u64 {
            ValueTag::Reference
        } else {
            ValueTag::Special
        }
    }

    #[inline]
    pub fn is_fixnum(self) -> bool {
        self.0 & 0b1 == ValueTag::Fixnum as u64
    }

    #[inline]
    pub fn is_reference(self) -> bool {
        self.0 & OBJECT_TAG_MASK == ValueTag::Reference as u64
    }

    #[inline]
    pub fn is_nil(self) -> bool {
        self == Self::NIL
    }

    #[inline]
    pub fn is_undef(self) -> bool {
        self == Self::UNDEF
    }

    pub fn as_fixnum(self) -> Option<i64> {
        if self.is_fixnum() {
            return Some(self.0.cast_signed() >> 1);
        }
        None
    }

    pub fn as_reference(self) -> Option<usize> {
        if self.is_reference() {
            return Some((self.0 >> 2) as usize);
        }
        None
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::NIL => write!(f, "nil"),
            Self::TRUE => write!(f, "true"),
            Self::FALSE => write!(f, "false"),
            Self::UNDEF => write!(f, "undef"),
            _ => match self.tag() {
                ValueTag::Fixnum => write!(f, "Fixnum({})", self.0.cast_signed() >> 1),
                ValueTag::Reference => write!(f, "Ref({})", self.0 >> 2),
                ValueTag::Special => write!(f, "Special(0x{:x})", self.0),
            },
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::NIL
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::from_fixnum(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::from_bool(value)
    }
}

impl Symbol {
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}
