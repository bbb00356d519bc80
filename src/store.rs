//! Data-store collaborator interface.
//!
//! The data store owns decoded job/process metadata. It is a consumer
//! of the core, not part of it: the engine hands it fully decoded
//! records only, never raw bytes, after the codec has unpacked them.
//! The module name is negotiated in the handshake and advertised to
//! children through the environment.

use std::collections::HashMap;

use crate::codec::{InfoPair, ProcId, Value};

/// Store for decoded records, keyed by the contributing process.
pub trait DataStore: Send {
    /// Module name used in negotiation.
    fn name(&self) -> &str;

    /// Record a decoded key/value pair contributed by `source`.
    fn store(&mut self, source: &ProcId, info: InfoPair);

    /// Look up a value previously contributed by `source`.
    fn fetch(&self, source: &ProcId, key: &str) -> Option<Value>;

    /// Drop everything contributed by `source` (its job ended or its
    /// connection was lost without successors).
    fn purge(&mut self, source: &ProcId);
}

/// In-memory hash store, the default module.
#[derive(Default)]
pub struct HashStore {
    records: HashMap<ProcId, HashMap<String, Value>>,
}

impl HashStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored records.
    pub fn len(&self) -> usize {
        self.records.values().map(|m| m.len()).sum()
    }

    /// True when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl DataStore for HashStore {
    fn name(&self) -> &str {
        "hash"
    }

    fn store(&mut self, source: &ProcId, info: InfoPair) {
        self.records
            .entry(source.clone())
            .or_default()
            .insert(info.key, *info.value);
    }

    fn fetch(&self, source: &ProcId, key: &str) -> Option<Value> {
        self.records.get(source)?.get(key).cloned()
    }

    fn purge(&mut self, source: &ProcId) {
        self.records.remove(source);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_fetch() {
        let mut store = HashStore::new();
        let src = ProcId::new("job", 3);
        store.store(&src, InfoPair::new("cpus", Value::Uint32(8)));

        assert_eq!(store.fetch(&src, "cpus"), Some(Value::Uint32(8)));
        assert_eq!(store.fetch(&src, "mem"), None);
        assert_eq!(store.fetch(&ProcId::new("job", 4), "cpus"), None);
    }

    #[test]
    fn test_overwrite_same_key() {
        let mut store = HashStore::new();
        let src = ProcId::new("job", 0);
        store.store(&src, InfoPair::new("state", Value::String("starting".into())));
        store.store(&src, InfoPair::new("state", Value::String("running".into())));
        assert_eq!(
            store.fetch(&src, "state"),
            Some(Value::String("running".into()))
        );
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_purge_drops_only_source() {
        let mut store = HashStore::new();
        let a = ProcId::new("job", 0);
        let b = ProcId::new("job", 1);
        store.store(&a, InfoPair::new("k", Value::Bool(true)));
        store.store(&b, InfoPair::new("k", Value::Bool(false)));

        store.purge(&a);
        assert_eq!(store.fetch(&a, "k"), None);
        assert_eq!(store.fetch(&b, "k"), Some(Value::Bool(false)));
    }
}
