//! In-memory [`Store`] backend: fast and deterministic, used in tests and
//! by `kernel-demo`'s quick-start mode. Has no durability across process
//! restarts, so it cannot exercise the crash-recovery properties — use
//! `SqliteStore` for that.

use std::collections::BTreeMap;
use std::collections::HashSet;

use crate::error::StoreError;
use crate::store::Store;
use crate::store::Transaction;

/// `BTreeMap` so [`Store::keys_with_prefix`] can use a cheap range scan.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: BTreeMap<String, Vec<u8>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.data.get(key).cloned())
    }

    fn keys_with_prefix(&mut self, prefix: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .data
            .range(prefix.to_owned()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect())
    }

    fn put(&mut self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.data.insert(key.to_owned(), value.to_vec());
        Ok(())
    }

    fn begin(&mut self, label: &str) -> Result<Box<dyn Transaction + '_>, StoreError> {
        Ok(Box::new(MemoryTransaction {
            store: self,
            writes: BTreeMap::new(),
            deletes: HashSet::new(),
            label: label.to_owned(),
            finished: false,
        }))
    }
}

struct MemoryTransaction<'store> {
    store: &'store mut MemoryStore,
    writes: BTreeMap<String, Vec<u8>>,
    deletes: HashSet<String>,
    label: String,
    finished: bool,
}

impl Transaction for MemoryTransaction<'_> {
    fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        if self.deletes.contains(key) {
            return Ok(None);
        }
        if let Some(value) = self.writes.get(key) {
            return Ok(Some(value.clone()));
        }
        self.store.get(key)
    }

    fn put(&mut self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        self.deletes.remove(key);
        self.writes.insert(key.to_owned(), value);
        Ok(())
    }

    fn delete(&mut self, key: &str) -> Result<(), StoreError> {
        self.writes.remove(key);
        self.deletes.insert(key.to_owned());
        Ok(())
    }

    fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        log::trace!("savepoint {} committed", self.label);
        for key in self.deletes.drain() {
            self.store.data.remove(&key);
        }
        for (key, value) in self.writes.drain() {
            self.store.data.insert(key, value);
        }
        self.finished = true;
        Ok(())
    }

    fn rollback(mut self: Box<Self>) -> Result<(), StoreError> {
        log::trace!("savepoint {} rolled back", self.label);
        self.finished = true;
        Ok(())
    }
}

impl Drop for MemoryTransaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            log::trace!("savepoint {} dropped without commit; discarding writes", self.label);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_applies_writes_and_deletes() {
        let mut store = MemoryStore::new();
        store.put("a", b"1").unwrap();
        let mut txn = store.begin("t1").unwrap();
        txn.put("b", b"2".to_vec()).unwrap();
        txn.delete("a").unwrap();
        txn.commit().unwrap();
        assert_eq!(store.get("a").unwrap(), None);
        assert_eq!(store.get("b").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn rollback_discards_writes() {
        let mut store = MemoryStore::new();
        store.put("a", b"1").unwrap();
        let mut txn = store.begin("t1").unwrap();
        txn.put("b", b"2".to_vec()).unwrap();
        txn.delete("a").unwrap();
        txn.rollback().unwrap();
        assert_eq!(store.get("a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.get("b").unwrap(), None);
    }

    #[test]
    fn dropped_transaction_behaves_as_rollback() {
        let mut store = MemoryStore::new();
        {
            let mut txn = store.begin("t1").unwrap();
            txn.put("b", b"2".to_vec()).unwrap();
        }
        assert_eq!(store.get("b").unwrap(), None);
    }

    #[test]
    fn keys_with_prefix_scans_remote_scoped_entries() {
        let mut store = MemoryStore::new();
        store.put("pending.r1.1", b"a").unwrap();
        store.put("pending.r1.2", b"b").unwrap();
        store.put("pending.r2.1", b"c").unwrap();
        let mut keys = store.keys_with_prefix("pending.r1.").unwrap();
        keys.sort();
        assert_eq!(keys, vec!["pending.r1.1", "pending.r1.2"]);
    }

    #[test]
    fn transaction_sees_its_own_uncommitted_writes() {
        let mut store = MemoryStore::new();
        let mut txn = store.begin("t1").unwrap();
        txn.put("a", b"1".to_vec()).unwrap();
        assert_eq!(txn.get("a").unwrap(), Some(b"1".to_vec()));
        txn.delete("a").unwrap();
        assert_eq!(txn.get("a").unwrap(), None);
    }
}
