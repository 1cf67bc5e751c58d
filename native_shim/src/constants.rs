//! Process lifetime constants for compiled code.
//!
//! Every constant lives in one host array. Only the cell holding that array is
//! registered as a GC root, so the root set does not grow with the number of
//! constants compiled into the program.
//!
//! Registration must happen from one thread at a time (in practice at module
//! load, before user threads exist). The lock below only guards the lazily
//! created root cell, it does not make concurrent `register` calls ordered.
use log::{debug, trace};
use parking_lot::RwLock;

use crate::{ErrorClass, GcRoot, HostRuntime, Value, VmResult, debug::describe_value, raise_new};

/// Index into the constant pool, dense from 0 and never reused.
#[repr(transparent)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConstantHandle(usize);

impl ConstantHandle {
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    pub const fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Default)]
pub struct ConstantPool {
    root: RwLock<Option<GcRoot>>,
}

impl ConstantPool {
    pub const fn new() -> Self {
        Self {
            root: RwLock::new(None),
        }
    }

    fn array(&self) -> Option<Value> {
        self.root.read().as_ref().map(GcRoot::get)
    }

    fn array_or_init(&self, host: &mut dyn HostRuntime) -> Value {
        let mut root = self.root.write();
        if let Some(root) = root.as_ref() {
            return root.get();
        }
        let array = host.new_array(&[]);
        let cell = GcRoot::new(array);
        host.register_gc_root(cell.clone());
        debug!("constant pool created, backing array {array:?}");
        *root = Some(cell);
        array
    }

    /// Appends `value` and returns the handle it occupies.
    pub fn register(&self, host: &mut dyn HostRuntime, value: Value) -> VmResult<ConstantHandle> {
        let array = self.array_or_init(host);
        let index = host.array_len(array).unwrap_or(0);
        host.array_push(array, value)?;
        trace!("constant {index} registered: {}", describe_value(host, value));
        Ok(ConstantHandle(index))
    }

    pub fn len(&self, host: &dyn HostRuntime) -> usize {
        self.array()
            .and_then(|array| host.array_len(array))
            .unwrap_or(0)
    }

    pub fn is_empty(&self, host: &dyn HostRuntime) -> bool {
        self.len(host) == 0
    }

    /// Raises IndexError for handles past the end of the pool.
    pub fn fetch(&self, host: &mut dyn HostRuntime, handle: ConstantHandle) -> VmResult<Value> {
        let entry = self
            .array()
            .and_then(|array| host.array_entry(array, handle.0));
        match entry {
            Some(value) => Ok(value),
            None => {
                let message = format!(
                    "{} is out of bounds for the constant pool ({})",
                    handle.0,
                    self.len(host)
                );
                Err(raise_new(host, ErrorClass::IndexError, &message))
            }
        }
    }

    /// Fetches a hash literal and returns a shallow copy, so call sites can
    /// mutate the result without touching the shared constant.
    pub fn dup_as_map(
        &self,
        host: &mut dyn HostRuntime,
        handle: ConstantHandle,
    ) -> VmResult<Value> {
        let hash = self.fetch(host, handle)?;
        host.hash_dup(hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelVm;

    #[test]
    fn handles_are_dense_from_zero() {
        let mut vm = ModelVm::default();
        let pool = ConstantPool::new();
        assert!(pool.is_empty(&vm));

        for expected in 0..5 {
            let s = vm.new_string(&format!("c{expected}"));
            let handle = pool.register(&mut vm, s).unwrap();
            assert_eq!(handle.index(), expected);
        }
        assert_eq!(pool.len(&vm), 5);
    }

    #[test]
    fn fetch_returns_registered_value() {
        let mut vm = ModelVm::default();
        let pool = ConstantPool::new();
        let a = vm.new_string("a");
        let b = Value::from_fixnum(99);
        let ha = pool.register(&mut vm, a).unwrap();
        let hb = pool.register(&mut vm, b).unwrap();

        assert_eq!(pool.fetch(&mut vm, ha).unwrap(), a);
        assert_eq!(pool.fetch(&mut vm, hb).unwrap(), b);
    }

    #[test]
    fn fetch_past_end_raises_index_error() {
        let mut vm = ModelVm::default();
        let pool = ConstantPool::new();

        let raised = pool.fetch(&mut vm, ConstantHandle::new(0)).unwrap_err();
        assert_eq!(vm.exception_class_name(raised.exception), "IndexError");

        pool.register(&mut vm, Value::NIL).unwrap();
        let raised = pool.fetch(&mut vm, ConstantHandle::new(1)).unwrap_err();
        assert_eq!(
            vm.exception_message(raised.exception).as_deref(),
            Some("1 is out of bounds for the constant pool (1)")
        );
    }

    #[test]
    fn only_one_root_registered() {
        let mut vm = ModelVm::default();
        let pool = ConstantPool::new();
        for i in 0..100 {
            pool.register(&mut vm, Value::from_fixnum(i)).unwrap();
        }
        assert_eq!(vm.root_count(), 1);
    }

    #[test]
    fn constants_survive_collection() {
        let mut vm = ModelVm::default();
        let pool = ConstantPool::new();
        let s = vm.new_string("kept");
        let handle = pool.register(&mut vm, s).unwrap();
        let garbage = vm.new_string("dropped");

        let freed = vm.collect_garbage();

        assert!(freed >= 1);
        assert!(!vm.is_live(garbage));
        let fetched = pool.fetch(&mut vm, handle).unwrap();
        assert_eq!(vm.string_value(fetched).as_deref(), Some("kept"));
    }

    #[test]
    fn dup_as_map_protects_the_original() {
        let mut vm = ModelVm::default();
        let pool = ConstantPool::new();
        let key = vm.new_symbol("a");
        let hash = vm.new_hash(&[(key, Value::from_fixnum(1))]);
        let handle = pool.register(&mut vm, hash).unwrap();

        let copy = pool.dup_as_map(&mut vm, handle).unwrap();
        assert_ne!(copy, hash);
        let other = vm.new_symbol("b");
        vm.hash_insert(copy, other, Value::from_fixnum(2)).unwrap();

        let original = pool.fetch(&mut vm, handle).unwrap();
        assert_eq!(vm.hash_len(original), Some(1));
        assert_eq!(vm.hash_len(copy), Some(2));
    }

    #[test]
    fn dup_as_map_on_non_hash_raises() {
        let mut vm = ModelVm::default();
        let pool = ConstantPool::new();
        let handle = pool.register(&mut vm, Value::from_fixnum(3)).unwrap();
        let raised = pool.dup_as_map(&mut vm, handle).unwrap_err();
        assert_eq!(vm.exception_class_name(raised.exception), "TypeError");
    }
}
