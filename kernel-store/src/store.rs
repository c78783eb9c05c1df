//! The `Store`/`Transaction` trait pair.
//!
//! Spec §9 ("Transactional receive"): "the requirement is: database
//! effects of receive AND advance of `highestReceivedSeq` are atomic. Any
//! store supporting nested savepoints or serializable transactions
//! satisfies this." `Transaction` models exactly that: a named savepoint
//! opened by [`Store::begin`], mutated with `get`/`put`/`delete`, and
//! either `commit`ted or `rollback`ack. Dropping a `Transaction` without
//! calling either is treated as a rollback by both backends here.
//!
//! The messaging core is single-threaded cooperative (spec §5), so these
//! traits take `&mut self` rather than using interior mutability or
//! requiring `Sync`.

use crate::error::StoreError;

/// A persisted key-value store with savepoint transactions.
pub trait Store {
    /// Read a key outside of any transaction (used at `RemoteHandle`
    /// construction time to load persisted sequence numbers).
    ///
    /// # Errors
    /// Returns [`StoreError`] if the backend fails to read.
    fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// List keys with the given prefix, for crash-recovery scans over
    /// `pending.<remote_id>.*`.
    ///
    /// # Errors
    /// Returns [`StoreError`] if the backend fails to read.
    fn keys_with_prefix(&mut self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Write a key outside of any transaction. Used for one-off,
    /// non-crash-sensitive writes (e.g. caching `peerId`); the crash-safe
    /// per-remote sequence/pending writes always go through [`Self::begin`].
    ///
    /// # Errors
    /// Returns [`StoreError`] if the backend fails to write.
    fn put(&mut self, key: &str, value: &[u8]) -> Result<(), StoreError>;

    /// Open a named savepoint. `label` is used verbatim as the savepoint
    /// name (sanitized by the backend as needed) and appears in the
    /// `receive_<remote_id>_<seq>` / `send_<remote_id>_<seq>` names spec
    /// §4.1.3 calls for.
    ///
    /// # Errors
    /// Returns [`StoreError`] if the backend fails to open the savepoint.
    fn begin(&mut self, label: &str) -> Result<Box<dyn Transaction + '_>, StoreError>;
}

/// A single savepoint-scoped transaction.
pub trait Transaction {
    /// Read a key, seeing this transaction's own uncommitted writes.
    ///
    /// # Errors
    /// Returns [`StoreError`] if the backend fails to read.
    fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Write a key within this transaction. Invisible to other readers
    /// until [`Transaction::commit`].
    ///
    /// # Errors
    /// Returns [`StoreError`] if the backend fails to write.
    fn put(&mut self, key: &str, value: Vec<u8>) -> Result<(), StoreError>;

    /// Delete a key within this transaction.
    ///
    /// # Errors
    /// Returns [`StoreError`] if the backend fails to write.
    fn delete(&mut self, key: &str) -> Result<(), StoreError>;

    /// Commit (release) the savepoint, making its writes durable and
    /// visible.
    ///
    /// # Errors
    /// Returns [`StoreError`] if the backend fails to commit.
    fn commit(self: Box<Self>) -> Result<(), StoreError>;

    /// Roll back the savepoint, discarding every write made through it.
    ///
    /// # Errors
    /// Returns [`StoreError`] if the backend fails to roll back.
    fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}
