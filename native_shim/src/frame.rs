//! Synthetic frames for natively compiled functions.
//!
//! The VM attributes backtraces, exception handling and debugger queries to
//! executable units. Native code has none, so at load time we allocate one per
//! compiled function and fill it with enough bookkeeping that the VM treats it
//! like interpreted code: one `nop` per covered source line, a matching line
//! table, and the local table the compiler laid out.
//!
//! Units built here are pinned and live for the rest of the process.
use log::{debug, error, warn};

use crate::{
    BridgeConfig, ErrorClass, EventFlags, HostRuntime, InsnInfoEntry, Instruction, Symbol,
    UnitHeader, UnitKind, Value, VmResult, debug::{describe_value, symbol_name}, raise_new,
};

/// Load-time metadata for one compiled function.
#[derive(Debug, Clone, Copy)]
pub struct FrameCreateInfo<'a> {
    /// Display name, as shown in backtraces.
    pub name: Value,
    /// Method id the function is defined under.
    pub id: Symbol,
    pub path: Value,
    pub realpath: Value,
    /// Immediate lexical parent. For a rescue nested in a rescue this is the
    /// outer rescue unit, not the method.
    pub parent: Option<Value>,
    pub kind: UnitKind,
    pub start_line: i32,
    pub end_line: i32,
    /// Slot order must match the compiler's frame layout.
    pub locals: &'a [Symbol],
    /// Trusted as is, an underestimate corrupts the VM stack.
    pub stack_max: u32,
}

impl FrameCreateInfo<'_> {
    /// One instruction per covered line, at least one even when the function
    /// fits on a single line.
    pub fn insn_count(&self) -> usize {
        let span = i64::from(self.end_line) - i64::from(self.start_line) + 1;
        span.max(1) as usize
    }
}

/// Allocates and fills the executable unit for `info`.
///
/// Aborts the process when the host cannot allocate, there is no VM state to
/// return to at module load.
pub fn build_synthetic_frame(
    host: &mut dyn HostRuntime,
    config: &BridgeConfig,
    info: &FrameCreateInfo<'_>,
) -> Value {
    let header = UnitHeader {
        name: info.name,
        path: info.path,
        realpath: info.realpath,
        parent: info.parent,
        kind: info.kind,
    };
    let Some(unit) = host.allocate_executable_unit(header) else {
        error!(
            "failed to allocate executable unit for {}",
            symbol_name(&*host, info.id)
        );
        std::process::abort();
    };
    // nothing else references the unit
    host.pin_object(unit);

    let nop = host.instruction_word(Instruction::Nop);
    let insn_num = info.insn_count();

    let mut insns_info = Vec::with_capacity(insn_num);
    let mut positions = Vec::with_capacity(insn_num);
    let mut iseq_encoded = Vec::with_capacity(insn_num);
    for i in 0..insn_num {
        positions.push(i as u32);
        insns_info.push(InsnInfoEntry {
            line_no: info.start_line + i as i32,
            events: EventFlags::empty(),
        });
        iseq_encoded.push(nop);
    }

    let exception_local = info
        .kind
        .holds_exception()
        .then(|| host.intern_symbol(&config.exception_local));

    let Some(body) = host.unit_body_mut(unit) else {
        error!("host returned a unit without a body");
        std::process::abort();
    };
    body.insns_info.body = insns_info;
    body.insns_info.positions = positions;
    body.insns_info.size = insn_num as u32;
    body.iseq_size = insn_num as u32;
    body.iseq_encoded = iseq_encoded;

    if let Some(local) = exception_local {
        body.local_table = vec![local];
        body.local_table_size = 1;
    }

    if info.kind == UnitKind::Method && !info.locals.is_empty() {
        body.local_table = info.locals.to_vec();
        body.local_table_size = info.locals.len() as u32;
    }

    body.stack_max = info.stack_max;

    host.encode_insns_info_positions(unit);

    debug!(
        "built {:?} frame for {}, lines {}..={}, {} locals",
        info.kind,
        symbol_name(&*host, info.id),
        info.start_line,
        info.end_line,
        info.locals.len()
    );
    unit
}

/// Consumes the real path the loader left for the module being loaded.
pub fn read_realpath(host: &mut dyn HostRuntime, config: &BridgeConfig) -> VmResult<Value> {
    let realpath = host.global_get(&config.realpath_global);
    if !host.is_string(realpath) {
        warn!(
            "{} is not a string: {}",
            config.realpath_global,
            describe_value(host, realpath)
        );
        let message = format!(
            "Invalid '{}' when loading compiled module",
            config.realpath_global
        );
        return Err(raise_new(host, ErrorClass::RuntimeError, &message));
    }
    host.global_set(&config.realpath_global, Value::NIL);
    Ok(realpath)
}
