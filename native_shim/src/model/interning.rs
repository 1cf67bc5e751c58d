use std::{collections::HashMap, sync::Arc};

use parking_lot::RwLock;

use crate::Symbol;

struct InternedStringsImpl {
    table: HashMap<Symbol, Arc<str>, ahash::RandomState>,
    mappings: HashMap<Arc<str>, Symbol, ahash::RandomState>,
}

/// Symbol table shared between clones.
#[derive(Clone)]
pub struct InternedStrings(Arc<RwLock<InternedStringsImpl>>);

impl InternedStringsImpl {
    fn new() -> Self {
        Self {
            table: HashMap::default(),
            mappings: HashMap::default(),
        }
    }

    fn get_or_add(&mut self, value: &str) -> Symbol {
        if let Some(&id) = self.mappings.get(value) {
            return id;
        }
        use std::hash::Hasher;
        let mut hasher = ahash::AHasher::default();
        hasher.write(value.as_bytes());
        let mut raw = hasher.finish();
        // hash collisions probe forward
        while self.table.contains_key(&Symbol::from_raw(raw)) {
            raw = raw.wrapping_add(1);
        }
        let id = Symbol::from_raw(raw);
        let interned = Arc::<str>::from(value);
        self.mappings.insert(interned.clone(), id);
        self.table.insert(id, interned);
        id
    }

    fn get(&self, id: Symbol) -> Option<Arc<str>> {
        self.table.get(&id).cloned()
    }
}

impl InternedStrings {
    pub fn new() -> Self {
        Self(Arc::new(RwLock::new(InternedStringsImpl::new())))
    }

    pub fn add(&self, value: &str) -> Symbol {
        if let Some(&id) = self.0.read().mappings.get(value) {
            return id;
        }
        self.0.write().get_or_add(value)
    }

    pub fn get(&self, id: Symbol) -> Option<Arc<str>> {
        self.0.read().get(id)
    }

    pub fn len(&self) -> usize {
        self.0.read().table.len()
    }
}

impl Default for InternedStrings {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InternedStrings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "InternedStrings({} entries)", self.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_name_same_symbol() {
        let strings = InternedStrings::new();
        let a = strings.add("to_s");
        let b = strings.add("to_s");
        let c = strings.add("inspect");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(strings.len(), 2);
        assert_eq!(strings.get(c).as_deref(), Some("inspect"));
    }

    #[test]
    fn clones_share_the_table() {
        let strings = InternedStrings::new();
        let shared = strings.clone();
        let id = shared.add("#$!");
        assert_eq!(strings.get(id).as_deref(), Some("#$!"));
    }
}
