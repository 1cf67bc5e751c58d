//! A small in-process host.
//!
//! It carries just enough of a dynamic VM (strings, arrays, ordered hashes,
//! classes with native methods, exceptions, executable units and a
//! mark-and-sweep collector) to drive the shim from tests, benches and the
//! demo binary.
use std::{collections::HashMap, sync::Arc};

use log::trace;

use crate::{
    ErrorClass, GcRoot, HostRuntime, InsnWord, Instruction, Raised, Symbol, UnitBody, UnitHeader,
    Value, VmResult,
};

mod interning;
mod line_table;
mod objects;
mod visitor;

pub use interning::InternedStrings;
pub use line_table::{LineTableBuilder, line_table_lookup};
pub use objects::{ClassData, ExecutableUnit, HeapEntry, NativeMethod, ObjectData, ObjectFlags};
pub use visitor::{MarkVisitor, Visitable, Visitor};

// address table, one word per instruction
const INSTRUCTION_TABLE: [InsnWord; 1] = [0x0000_7f00_4e4f_5000];

#[derive(Debug, Default, Clone)]
pub struct ModelCreateInfo {
    /// Allocations after which [`ModelVm::safepoint`] collects. `None` only
    /// collects on request.
    pub gc_threshold: Option<usize>,
}

#[derive(Debug)]
pub struct ModelVm {
    heap: Vec<Option<HeapEntry>>,
    // swept slots, reused by later allocations
    free: Vec<usize>,
    strings: InternedStrings,
    symbols: HashMap<Symbol, Value, ahash::RandomState>,
    roots: Vec<GcRoot>,
    classes: Vec<Value>,
    globals: HashMap<String, Value, ahash::RandomState>,
    raised: Vec<Value>,
    object_class: Value,
    allocations: usize,
    settings: ModelCreateInfo,
}

impl Default for ModelVm {
    fn default() -> Self {
        Self::new(ModelCreateInfo::default())
    }
}

impl ModelVm {
    pub fn new(settings: ModelCreateInfo) -> Self {
        let mut vm = Self {
            heap: Vec::new(),
            free: Vec::new(),
            strings: InternedStrings::new(),
            symbols: HashMap::default(),
            roots: Vec::new(),
            classes: Vec::new(),
            globals: HashMap::default(),
            raised: Vec::new(),
            object_class: Value::NIL,
            allocations: 0,
            settings,
        };
        let object = vm.allocate(ObjectData::Class(ClassData::new("Object")));
        vm.classes.push(object);
        vm.object_class = object;
        vm
    }

    // never collects, values held by Rust callers are not roots
    fn allocate(&mut self, data: ObjectData) -> Value {
        self.allocations += 1;
        let entry = Some(HeapEntry::new(data));
        let index = match self.free.pop() {
            Some(index) => {
                self.heap[index] = entry;
                index
            }
            None => {
                self.heap.push(entry);
                self.heap.len() - 1
            }
        };
        Value::from_reference(index)
    }

    fn entry(&self, value: Value) -> Option<&HeapEntry> {
        let index = value.as_reference()?;
        self.heap.get(index)?.as_ref()
    }

    fn entry_mut(&mut self, value: Value) -> Option<&mut HeapEntry> {
        let index = value.as_reference()?;
        self.heap.get_mut(index)?.as_mut()
    }

    fn data(&self, value: Value) -> Option<&ObjectData> {
        self.entry(value).map(|entry| &entry.data)
    }

    fn raise_error(&mut self, class: ErrorClass, message: &str) -> Raised {
        let exception = self.new_exception(class, message);
        self.raise(exception)
    }

    fn raise_named(&mut self, class: &str, message: &str) -> Raised {
        let exception = self.allocate(ObjectData::Exception {
            class: class.to_string(),
            message: message.to_string(),
        });
        self.raise(exception)
    }

    fn conversion_error(&mut self, value: Value, target: &str) -> Raised {
        let class = self.class_name(value);
        let message = format!("no implicit conversion of {class} into {target}");
        self.raise_error(ErrorClass::TypeError, &message)
    }

    // ── object construction ─────────────────────────────────────────

    pub fn new_string(&mut self, value: &str) -> Value {
        self.allocate(ObjectData::String(value.to_string()))
    }

    /// Symbols are unique per name and never collected.
    pub fn new_symbol(&mut self, name: &str) -> Value {
        let id = self.strings.add(name);
        if let Some(&value) = self.symbols.get(&id) {
            return value;
        }
        let value = self.allocate(ObjectData::Symbol(id));
        self.symbols.insert(id, value);
        value
    }

    pub fn new_hash(&mut self, pairs: &[(Value, Value)]) -> Value {
        self.allocate(ObjectData::Hash(pairs.to_vec()))
    }

    pub fn define_class(&mut self, name: &str) -> Value {
        let class = self.allocate(ObjectData::Class(ClassData::new(name)));
        self.classes.push(class);
        class
    }

    pub fn define_method(&mut self, class: Value, name: &str, method: NativeMethod) {
        let id = self.strings.add(name);
        if let Some(HeapEntry {
            data: ObjectData::Class(data),
            ..
        }) = self.entry_mut(class)
        {
            data.methods.insert(id, method);
        }
    }

    pub fn new_object(&mut self, class: Value) -> Value {
        self.allocate(ObjectData::Object { class })
    }

    pub fn const_set(&mut self, namespace: Value, name: &str, value: Value) {
        let id = self.strings.add(name);
        if let Some(HeapEntry {
            data: ObjectData::Class(class),
            ..
        }) = self.entry_mut(namespace)
        {
            class.set_constant(id, value);
        }
    }

    pub fn hash_insert(&mut self, hash: Value, key: Value, value: Value) -> VmResult<()> {
        let Some(HeapEntry {
            data: ObjectData::Hash(pairs),
            ..
        }) = self.entry_mut(hash)
        else {
            return Err(self.conversion_error(hash, "Hash"));
        };
        // keys compare by identity
        match pairs.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => pairs.push((key, value)),
        }
        Ok(())
    }

    // ── inspection ──────────────────────────────────────────────────

    pub fn string_value(&self, value: Value) -> Option<String> {
        match self.data(value)? {
            ObjectData::String(s) => Some(s.clone()),
            _ => None,
        }
    }

    pub fn hash_len(&self, value: Value) -> Option<usize> {
        match self.data(value)? {
            ObjectData::Hash(pairs) => Some(pairs.len()),
            _ => None,
        }
    }

    pub fn exception_class_name(&self, exception: Value) -> String {
        match self.data(exception) {
            Some(ObjectData::Exception { class, .. }) => class.clone(),
            _ => self.class_name(exception),
        }
    }

    pub fn exception_message(&self, exception: Value) -> Option<String> {
        match self.data(exception)? {
            ObjectData::Exception { message, .. } => Some(message.clone()),
            _ => None,
        }
    }

    /// Number of exceptions raised so far.
    pub fn raised_count(&self) -> usize {
        self.raised.len()
    }

    pub fn root_count(&self) -> usize {
        self.roots.len()
    }

    pub fn live_objects(&self) -> usize {
        self.heap.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_live(&self, value: Value) -> bool {
        self.entry(value).is_some()
    }

    pub fn is_pinned(&self, value: Value) -> bool {
        self.entry(value).is_some_and(HeapEntry::is_pinned)
    }

    pub fn unit_body(&self, unit: Value) -> Option<&UnitBody> {
        match self.data(unit)? {
            ObjectData::Unit(unit) => Some(&unit.body),
            _ => None,
        }
    }

    pub fn unit_parent(&self, unit: Value) -> Option<Value> {
        match self.data(unit)? {
            ObjectData::Unit(unit) => unit.header.parent,
            _ => None,
        }
    }

    /// Source line for instruction `pc`, read back through the encoded table.
    pub fn backtrace_line(&self, unit: Value, pc: u32) -> Option<i32> {
        let body = self.unit_body(unit)?;
        line_table_lookup(&body.insns_info.encoded, pc)
    }

    /// `path:line:in 'name'`
    pub fn backtrace_entry(&self, unit: Value, pc: u32) -> Option<String> {
        let ObjectData::Unit(data) = self.data(unit)? else {
            return None;
        };
        let line = self.backtrace_line(unit, pc)?;
        let path = self.string_value(data.header.path)?;
        let name = self.string_value(data.header.name)?;
        Some(format!("{path}:{line}:in '{name}'"))
    }

    // ── collection ──────────────────────────────────────────────────

    /// Collects once `gc_threshold` allocations happened since the last
    /// collection. Returns the number of objects freed.
    ///
    /// Only values reachable from the host's own tables survive, so this must
    /// run between shim calls, never while one is holding values.
    pub fn safepoint(&mut self) -> usize {
        match self.settings.gc_threshold {
            Some(threshold) if self.allocations >= threshold => self.collect_garbage(),
            _ => 0,
        }
    }

    /// Marks from roots, pinned objects, symbols, classes, globals and raised
    /// exceptions, then frees everything else. Returns the number of objects
    /// freed.
    pub fn collect_garbage(&mut self) -> usize {
        self.allocations = 0;
        let mut marker = MarkVisitor::default();
        self.roots.iter().for_each(|root| marker.visit(root.get()));
        self.symbols.values().for_each(|&v| marker.visit(v));
        self.classes.iter().for_each(|&v| marker.visit(v));
        self.globals.values().for_each(|&v| marker.visit(v));
        self.raised.iter().for_each(|&v| marker.visit(v));
        marker.visit(self.object_class);
        for (index, slot) in self.heap.iter().enumerate() {
            if slot.as_ref().is_some_and(HeapEntry::is_pinned) {
                marker.worklist.push(index);
            }
        }

        while let Some(index) = marker.worklist.pop() {
            let Some(Some(entry)) = self.heap.get_mut(index) else {
                continue;
            };
            if entry.is_marked() {
                continue;
            }
            entry.flags.insert(ObjectFlags::MARKED);
            entry.data.visit_edges(&mut marker);
        }

        let mut freed = 0;
        for (index, slot) in self.heap.iter_mut().enumerate() {
            match slot {
                Some(entry) if entry.is_marked() => {
                    entry.flags.remove(ObjectFlags::MARKED);
                }
                Some(_) => {
                    *slot = None;
                    self.free.push(index);
                    freed += 1;
                }
                None => (),
            }
        }
        trace!("collected {freed} objects, {} live", self.live_objects());
        freed
    }

    // ── builtin behaviour ───────────────────────────────────────────

    fn method_of(&self, receiver: Value, method: Symbol) -> Option<NativeMethod> {
        let ObjectData::Object { class } = self.data(receiver)? else {
            return None;
        };
        match self.data(*class)? {
            ObjectData::Class(class) => class.methods.get(&method).copied(),
            _ => None,
        }
    }

    fn default_to_s(&self, value: Value) -> String {
        format!("#<{}>", self.class_name(value))
    }

    fn builtin_to_s(&mut self, value: Value) -> VmResult<String> {
        match value {
            Value::NIL => return Ok(String::new()),
            Value::TRUE => return Ok("true".to_string()),
            Value::FALSE => return Ok("false".to_string()),
            _ => (),
        }
        if let Some(n) = value.as_fixnum() {
            return Ok(n.to_string());
        }
        match self.data(value) {
            Some(ObjectData::String(s)) => Ok(s.clone()),
            Some(ObjectData::Symbol(id)) => Ok(self.symbol_text(*id)),
            Some(ObjectData::Exception { message, .. }) => Ok(message.clone()),
            Some(ObjectData::Class(class)) => Ok(class.name.clone()),
            Some(ObjectData::Array(_)) | Some(ObjectData::Hash(_)) => {
                self.inspect(value)
            }
            _ => Ok(self.default_to_s(value)),
        }
    }

    fn symbol_text(&self, id: Symbol) -> String {
        self.strings
            .get(id)
            .map(|name| name.to_string())
            .unwrap_or_default()
    }
}

impl HostRuntime for ModelVm {
    fn intern_symbol(&mut self, name: &str) -> Symbol {
        self.strings.add(name)
    }

    fn symbol_name(&self, id: Symbol) -> Option<Arc<str>> {
        self.strings.get(id)
    }

    fn register_gc_root(&mut self, root: GcRoot) {
        if self.roots.iter().any(|known| known.same_cell(&root)) {
            return;
        }
        self.roots.push(root);
    }

    fn pin_object(&mut self, value: Value) {
        if let Some(entry) = self.entry_mut(value) {
            entry.flags.insert(ObjectFlags::PINNED);
        }
    }

    fn new_exception(&mut self, class: ErrorClass, message: &str) -> Value {
        self.allocate(ObjectData::Exception {
            class: class.name().to_string(),
            message: message.to_string(),
        })
    }

    fn raise(&mut self, exception: Value) -> Raised {
        trace!("raise {exception:?}");
        self.raised.push(exception);
        Raised { exception }
    }

    fn allocate_executable_unit(&mut self, header: UnitHeader) -> Option<Value> {
        let unit = ExecutableUnit {
            header,
            body: UnitBody::default(),
        };
        Some(self.allocate(ObjectData::Unit(Box::new(unit))))
    }

    fn unit_body_mut(&mut self, unit: Value) -> Option<&mut UnitBody> {
        match &mut self.entry_mut(unit)?.data {
            ObjectData::Unit(unit) => Some(&mut unit.body),
            _ => None,
        }
    }

    fn instruction_word(&self, insn: Instruction) -> InsnWord {
        match insn {
            Instruction::Nop => INSTRUCTION_TABLE[0],
        }
    }

    fn encode_insns_info_positions(&mut self, unit: Value) {
        let Some(body) = self.unit_body_mut(unit) else {
            return;
        };
        let mut builder = LineTableBuilder::new();
        for (&position, entry) in body.insns_info.positions.iter().zip(&body.insns_info.body) {
            builder.add(position, entry.line_no);
        }
        body.insns_info.encoded = builder.finish();
    }

    fn new_array(&mut self, elements: &[Value]) -> Value {
        self.allocate(ObjectData::Array(elements.to_vec()))
    }

    fn array_push(&mut self, array: Value, value: Value) -> VmResult<()> {
        let Some(HeapEntry {
            data: ObjectData::Array(elements),
            ..
        }) = self.entry_mut(array)
        else {
            return Err(self.conversion_error(array, "Array"));
        };
        elements.push(value);
        Ok(())
    }

    fn array_len(&self, value: Value) -> Option<usize> {
        match self.data(value)? {
            ObjectData::Array(elements) => Some(elements.len()),
            _ => None,
        }
    }

    fn array_entry(&self, array: Value, index: usize) -> Option<Value> {
        match self.data(array)? {
            ObjectData::Array(elements) => elements.get(index).copied(),
            _ => None,
        }
    }

    fn array_to_vec(&self, value: Value) -> Option<Vec<Value>> {
        match self.data(value)? {
            ObjectData::Array(elements) => Some(elements.clone()),
            _ => None,
        }
    }

    fn check_array_type(&mut self, value: Value) -> VmResult<Option<Value>> {
        if self.array_len(value).is_some() {
            return Ok(Some(value));
        }
        let to_ary = self.strings.add("to_ary");
        let Some(method) = self.method_of(value, to_ary) else {
            return Ok(None);
        };
        let converted = method(self, value, &[])?;
        if converted.is_nil() {
            return Ok(None);
        }
        if self.array_len(converted).is_none() {
            let class = self.class_name(value);
            let got = self.class_name(converted);
            let message = format!("can't convert {class} to Array ({class}#to_ary gives {got})");
            return Err(self.raise_error(ErrorClass::TypeError, &message));
        }
        Ok(Some(converted))
    }

    fn hash_dup(&mut self, hash: Value) -> VmResult<Value> {
        match self.data(hash) {
            Some(ObjectData::Hash(pairs)) => {
                let pairs = pairs.clone();
                Ok(self.allocate(ObjectData::Hash(pairs)))
            }
            _ => Err(self.conversion_error(hash, "Hash")),
        }
    }

    fn hash_keys(&mut self, hash: Value) -> VmResult<Value> {
        match self.data(hash) {
            Some(ObjectData::Hash(pairs)) => {
                let keys: Vec<Value> = pairs.iter().map(|&(k, _)| k).collect();
                Ok(self.new_array(&keys))
            }
            _ => Err(self.conversion_error(hash, "Hash")),
        }
    }

    fn is_string(&self, value: Value) -> bool {
        matches!(self.data(value), Some(ObjectData::String(_)))
    }

    fn obj_as_string_result(&mut self, result: Value, original: Value) -> Value {
        if self.is_string(result) {
            return result;
        }
        let fallback = self.default_to_s(original);
        self.new_string(&fallback)
    }

    fn concat_strings(&mut self, parts: &[Value]) -> VmResult<Value> {
        let mut joined = String::new();
        for &part in parts {
            match self.data(part) {
                Some(ObjectData::String(s)) => joined.push_str(s),
                _ => return Err(self.conversion_error(part, "String")),
            }
        }
        Ok(self.new_string(&joined))
    }

    fn call_method(&mut self, receiver: Value, method: Symbol, args: &[Value]) -> VmResult<Value> {
        if let Some(native) = self.method_of(receiver, method) {
            return native(self, receiver, args);
        }
        let name = self.symbol_text(method);
        match name.as_str() {
            "to_s" => {
                let s = self.builtin_to_s(receiver)?;
                Ok(self.new_string(&s))
            }
            "inspect" => {
                let s = self.inspect(receiver)?;
                Ok(self.new_string(&s))
            }
            _ => {
                let class = self.class_name(receiver);
                let message = format!("undefined method '{name}' for an instance of {class}");
                Err(self.raise_named("NoMethodError", &message))
            }
        }
    }

    fn const_get(&mut self, namespace: Value, name: Symbol) -> VmResult<Value> {
        let found = match self.data(namespace) {
            Some(ObjectData::Class(class)) => class.constant(name),
            _ => None,
        };
        match found {
            Some(value) => Ok(value),
            None => {
                let message = format!("uninitialized constant {}", self.symbol_text(name));
                Err(self.raise_named("NameError", &message))
            }
        }
    }

    fn object_class(&self) -> Value {
        self.object_class
    }

    fn inspect(&mut self, value: Value) -> VmResult<String> {
        match value {
            Value::NIL => return Ok("nil".to_string()),
            Value::UNDEF => return Ok("undef".to_string()),
            _ => (),
        }
        if value.is_fixnum() || value == Value::TRUE || value == Value::FALSE {
            return self.builtin_to_s(value);
        }
        let inspect = self.strings.add("inspect");
        if let Some(method) = self.method_of(value, inspect) {
            let shown = method(self, value, &[])?;
            return Ok(self.string_value(shown).unwrap_or_else(|| self.default_to_s(value)));
        }
        let Some(data) = self.data(value).cloned() else {
            return Ok(format!("{value:?}"));
        };
        match data {
            ObjectData::String(s) => Ok(format!("{s:?}")),
            ObjectData::Symbol(id) => Ok(format!(":{}", self.symbol_text(id))),
            ObjectData::Array(elements) => {
                let mut shown = Vec::with_capacity(elements.len());
                for element in elements {
                    shown.push(self.inspect(element)?);
                }
                Ok(format!("[{}]", shown.join(", ")))
            }
            ObjectData::Hash(pairs) => {
                let mut shown = Vec::with_capacity(pairs.len());
                for (key, value) in pairs {
                    let key = self.inspect(key)?;
                    let value = self.inspect(value)?;
                    shown.push(format!("{key} => {value}"));
                }
                Ok(format!("{{{}}}", shown.join(", ")))
            }
            ObjectData::Exception { class, message } => Ok(format!("#<{class}: {message}>")),
            ObjectData::Class(class) => Ok(class.name),
            ObjectData::Unit(_) | ObjectData::Object { .. } => Ok(self.default_to_s(value)),
        }
    }

    fn class_name(&self, value: Value) -> String {
        match value {
            Value::NIL => return "NilClass".to_string(),
            Value::TRUE => return "TrueClass".to_string(),
            Value::FALSE => return "FalseClass".to_string(),
            _ => (),
        }
        if value.is_fixnum() {
            return "Integer".to_string();
        }
        let Some(entry) = self.entry(value) else {
            return "BasicObject".to_string();
        };
        if let ObjectData::Object { class } = &entry.data {
            if let Some(ObjectData::Class(class)) = self.data(*class) {
                return class.name.clone();
            }
        }
        entry.builtin_class_name().to_string()
    }

    fn global_get(&mut self, name: &str) -> Value {
        self.globals.get(name).copied().unwrap_or(Value::NIL)
    }

    fn global_set(&mut self, name: &str, value: Value) {
        self.globals.insert(name.to_string(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unrooted_objects_are_collected() {
        let mut vm = ModelVm::default();
        let kept = vm.new_string("kept");
        let array = vm.new_array(&[kept]);
        vm.global_set("$kept", array);
        let lost = vm.new_string("lost");

        let freed = vm.collect_garbage();

        assert_eq!(freed, 1);
        assert!(vm.is_live(kept));
        assert!(vm.is_live(array));
        assert!(!vm.is_live(lost));
    }

    #[test]
    fn registered_cells_are_read_at_scan_time() {
        let mut vm = ModelVm::default();
        let root = GcRoot::new(Value::NIL);
        vm.register_gc_root(root.clone());
        vm.register_gc_root(root.clone());
        assert_eq!(vm.root_count(), 1);

        let late = vm.new_string("late");
        root.set(late);
        vm.collect_garbage();
        assert!(vm.is_live(late));
    }

    #[test]
    fn threshold_collects_only_at_safepoints() {
        let mut vm = ModelVm::new(ModelCreateInfo {
            gc_threshold: Some(4),
        });
        let held: Vec<Value> = (0..10).map(|i| vm.new_string(&i.to_string())).collect();
        assert!(held.iter().all(|&v| vm.is_live(v)));

        assert_eq!(vm.safepoint(), 10);
        assert!(held.iter().all(|&v| !vm.is_live(v)));
        assert_eq!(vm.safepoint(), 0);

        for i in 0..100 {
            vm.new_string(&i.to_string());
            vm.safepoint();
        }
        assert!(vm.live_objects() <= 5);
        assert!(vm.heap.len() <= 11);
    }

    #[test]
    fn pinned_objects_and_their_edges_survive() {
        let mut vm = ModelVm::default();
        let name = vm.new_string("m");
        let header = UnitHeader {
            name,
            path: name,
            realpath: name,
            parent: None,
            kind: crate::UnitKind::Method,
        };
        let unit = vm.allocate_executable_unit(header).unwrap();
        vm.pin_object(unit);

        vm.collect_garbage();

        assert!(vm.is_live(unit));
        assert!(vm.is_live(name));
    }

    #[test]
    fn symbols_are_unique() {
        let mut vm = ModelVm::default();
        let a = vm.new_symbol("a");
        assert_eq!(vm.new_symbol("a"), a);
        vm.collect_garbage();
        assert!(vm.is_live(a));
    }

    #[test]
    fn builtin_to_s_and_inspect() {
        let mut vm = ModelVm::default();
        let to_s = vm.intern_symbol("to_s");
        let cases = [
            (Value::from_fixnum(-12), "-12"),
            (Value::NIL, ""),
            (Value::TRUE, "true"),
        ];
        for (value, expected) in cases {
            let s = vm.call_method(value, to_s, &[]).unwrap();
            assert_eq!(vm.string_value(s).as_deref(), Some(expected));
        }

        let k = vm.new_symbol("k");
        let s = vm.new_string("v");
        let hash = vm.new_hash(&[(k, s)]);
        assert_eq!(vm.inspect(hash).unwrap(), "{:k => \"v\"}");
    }

    #[test]
    fn unknown_methods_raise_no_method_error() {
        let mut vm = ModelVm::default();
        let frob = vm.intern_symbol("frob");
        let raised = vm.call_method(Value::from_fixnum(1), frob, &[]).unwrap_err();
        assert_eq!(vm.exception_class_name(raised.exception), "NoMethodError");
        assert_eq!(
            vm.exception_message(raised.exception).as_deref(),
            Some("undefined method 'frob' for an instance of Integer")
        );
    }

    #[test]
    fn hash_insert_replaces_existing_keys() {
        let mut vm = ModelVm::default();
        let k = vm.new_symbol("k");
        let hash = vm.new_hash(&[(k, Value::from_fixnum(1))]);
        vm.hash_insert(hash, k, Value::from_fixnum(2)).unwrap();
        assert_eq!(vm.hash_len(hash), Some(1));
        assert_eq!(vm.inspect(hash).unwrap(), "{:k => 2}");
    }
}
