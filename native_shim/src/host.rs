//! The capabilities the shim needs from the VM it is embedded in.
//!
//! Everything VM specific lives behind [`HostRuntime`]. Retargeting the shim to
//! a different host means implementing this trait, nothing above it changes.
use std::sync::{Arc, atomic::{AtomicU64, Ordering}};

use bitflags::bitflags;

use crate::{Symbol, Value};

/// Result of anything that may raise a VM exception.
pub type VmResult<T> = Result<T, Raised>;

/// A VM exception in flight.
///
/// Only [`HostRuntime::raise`] should produce this. Returning it with `?` is how the
/// shim unwinds back into the VM, generated callers never see a normal return.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("VM exception raised: {exception:?}")]
pub struct Raised {
    pub exception: Value,
}

/// VM exception classes the shim constructs.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    ArgumentError,
    TypeError,
    IndexError,
    RuntimeError,
    RangeError,
}

impl ErrorClass {
    pub fn name(self) -> &'static str {
        match self {
            Self::ArgumentError => "ArgumentError",
            Self::TypeError => "TypeError",
            Self::IndexError => "IndexError",
            Self::RuntimeError => "RuntimeError",
            Self::RangeError => "RangeError",
        }
    }
}

/// A storage cell the collector reads on every root scan.
///
/// The cell is registered once, its content may change any number of times
/// afterwards.
#[derive(Debug, Clone)]
pub struct GcRoot(Arc<AtomicU64>);

impl GcRoot {
    pub fn new(value: Value) -> Self {
        Self(Arc::new(AtomicU64::new(value.raw())))
    }

    #[inline]
    pub fn get(&self) -> Value {
        Value::from_raw(self.0.load(Ordering::Acquire))
    }

    #[inline]
    pub fn set(&self, value: Value) {
        self.0.store(value.raw(), Ordering::Release)
    }

    pub fn same_cell(&self, other: &GcRoot) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

// Discriminants follow the host's iseq type numbering.
#[repr(u32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum UnitKind {
    Top = 0,
    Method = 1,
    Block = 2,
    Class = 3,
    Rescue = 4,
    Ensure = 5,
}

impl UnitKind {
    /// Rescue and ensure bodies carry the active exception in a local.
    pub fn holds_exception(self) -> bool {
        matches!(self, Self::Rescue | Self::Ensure)
    }
}

/// Instructions the shim asks the host to encode.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Instruction {
    Nop,
}

/// One word of an encoded instruction sequence
/// (for threaded hosts this is the handler address).
pub type InsnWord = u64;

bitflags! {
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct EventFlags: u32 {
        const LINE = 0x0001;
        const CLASS = 0x0002;
        const END = 0x0004;
        const CALL = 0x0008;
        const RETURN = 0x0010;
        const RAISE = 0x0100;
    }
}

/// Mirrors the host's per-instruction line info entry.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsnInfoEntry {
    pub line_no: i32,
    pub events: EventFlags,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InsnsInfo {
    pub body: Vec<InsnInfoEntry>,
    pub positions: Vec<u32>,
    pub size: u32,
    /// Filled by [`HostRuntime::encode_insns_info_positions`].
    pub encoded: Vec<u8>,
}

/// The mutable part of an executable unit, as the host lays it out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnitBody {
    pub insns_info: InsnsInfo,
    pub iseq_encoded: Vec<InsnWord>,
    pub iseq_size: u32,
    pub local_table: Vec<Symbol>,
    pub local_table_size: u32,
    pub stack_max: u32,
}

/// What the host needs to allocate an executable unit.
#[derive(Debug, Clone, Copy)]
pub struct UnitHeader {
    pub name: Value,
    pub path: Value,
    pub realpath: Value,
    /// Lexically enclosing unit, if any.
    pub parent: Option<Value>,
    pub kind: UnitKind,
}

pub trait HostRuntime {
    // symbols

    fn intern_symbol(&mut self, name: &str) -> Symbol;
    fn symbol_name(&self, id: Symbol) -> Option<Arc<str>>;

    // gc

    /// Registers a storage cell with the root scanner.
    fn register_gc_root(&mut self, root: GcRoot);
    /// Keeps `value` alive for the rest of the process.
    fn pin_object(&mut self, value: Value);

    // exceptions

    fn new_exception(&mut self, class: ErrorClass, message: &str) -> Value;
    /// Starts unwinding for `exception`.
    fn raise(&mut self, exception: Value) -> Raised;

    // executable units

    /// `None` means the host is out of memory.
    fn allocate_executable_unit(&mut self, header: UnitHeader) -> Option<Value>;
    fn unit_body_mut(&mut self, unit: Value) -> Option<&mut UnitBody>;
    /// Address table lookup for `insn`.
    fn instruction_word(&self, insn: Instruction) -> InsnWord;
    /// Runs the host's standard position encoder over `insns_info`.
    fn encode_insns_info_positions(&mut self, unit: Value);

    // arrays

    fn new_array(&mut self, elements: &[Value]) -> Value;
    fn array_push(&mut self, array: Value, value: Value) -> VmResult<()>;
    /// `None` when `value` is not an array.
    fn array_len(&self, value: Value) -> Option<usize>;
    fn array_entry(&self, array: Value, index: usize) -> Option<Value>;
    fn array_to_vec(&self, value: Value) -> Option<Vec<Value>>;
    /// Implicit array conversion, `Ok(None)` when `value` does not convert.
    fn check_array_type(&mut self, value: Value) -> VmResult<Option<Value>>;

    // hashes

    fn hash_dup(&mut self, hash: Value) -> VmResult<Value>;
    /// Keys in insertion order, as a VM array.
    fn hash_keys(&mut self, hash: Value) -> VmResult<Value>;

    // strings

    fn is_string(&self, value: Value) -> bool;
    /// Checks the result of a `to_s` call, falls back to the default
    /// representation of `original` when `result` is not a string.
    fn obj_as_string_result(&mut self, result: Value, original: Value) -> Value;
    fn concat_strings(&mut self, parts: &[Value]) -> VmResult<Value>;

    // dispatch

    fn call_method(&mut self, receiver: Value, method: Symbol, args: &[Value]) -> VmResult<Value>;
    fn const_get(&mut self, namespace: Value, name: Symbol) -> VmResult<Value>;
    /// The top-level namespace.
    fn object_class(&self) -> Value;

    // introspection

    fn inspect(&mut self, value: Value) -> VmResult<String>;
    fn class_name(&self, value: Value) -> String;

    // globals

    fn global_get(&mut self, name: &str) -> Value;
    fn global_set(&mut self, name: &str, value: Value);
}

/// Builds an exception and raises it in one step.
pub fn raise_new(host: &mut dyn HostRuntime, class: ErrorClass, message: &str) -> Raised {
    let exception = host.new_exception(class, message);
    host.raise(exception)
}
