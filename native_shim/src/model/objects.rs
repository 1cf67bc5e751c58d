use std::collections::HashMap;

use bitflags::bitflags;

use crate::{Symbol, UnitBody, UnitHeader, Value, VmResult};

use super::ModelVm;

/// Method implemented in Rust: vm, receiver, arguments.
pub type NativeMethod = fn(&mut ModelVm, Value, &[Value]) -> VmResult<Value>;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ObjectFlags: u8 {
        const MARKED = 1 << 0;
        /// Registered as a mark object, never collected.
        const PINNED = 1 << 1;
    }
}

#[derive(Debug, Clone)]
pub struct ExecutableUnit {
    pub header: UnitHeader,
    pub body: UnitBody,
}

#[derive(Debug, Clone)]
pub struct ClassData {
    pub name: String,
    pub methods: HashMap<Symbol, NativeMethod, ahash::RandomState>,
    pub constants: Vec<(Symbol, Value)>,
}

impl ClassData {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            methods: HashMap::default(),
            constants: Vec::new(),
        }
    }

    pub fn constant(&self, name: Symbol) -> Option<Value> {
        self.constants
            .iter()
            .find(|(id, _)| *id == name)
            .map(|&(_, value)| value)
    }

    /// Later definitions replace earlier ones.
    pub fn set_constant(&mut self, name: Symbol, value: Value) {
        match self.constants.iter_mut().find(|(id, _)| *id == name) {
            Some(slot) => slot.1 = value,
            None => self.constants.push((name, value)),
        }
    }
}

#[derive(Debug, Clone)]
pub enum ObjectData {
    String(String),
    Symbol(Symbol),
    Array(Vec<Value>),
    /// Insertion ordered.
    Hash(Vec<(Value, Value)>),
    Exception { class: String, message: String },
    Unit(Box<ExecutableUnit>),
    Object { class: Value },
    Class(ClassData),
}

#[derive(Debug, Clone)]
pub struct HeapEntry {
    pub flags: ObjectFlags,
    pub data: ObjectData,
}

impl HeapEntry {
    pub fn new(data: ObjectData) -> Self {
        Self {
            flags: ObjectFlags::empty(),
            data,
        }
    }

    pub fn is_marked(&self) -> bool {
        self.flags.contains(ObjectFlags::MARKED)
    }

    pub fn is_pinned(&self) -> bool {
        self.flags.contains(ObjectFlags::PINNED)
    }

    pub fn builtin_class_name(&self) -> &str {
        match &self.data {
            ObjectData::String(_) => "String",
            ObjectData::Symbol(_) => "Symbol",
            ObjectData::Array(_) => "Array",
            ObjectData::Hash(_) => "Hash",
            ObjectData::Exception { class, .. } => class,
            ObjectData::Unit(_) => "InstructionSequence",
            ObjectData::Class(_) => "Class",
            // resolved through the class object
            ObjectData::Object { .. } => "Object",
        }
    }
}
