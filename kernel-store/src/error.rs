//! Errors surfaced by [`crate::Store`] and [`crate::Transaction`].

use thiserror::Error;

/// Failure reading, writing, or transacting against persisted state.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The underlying SQLite engine reported an error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// A value stored under a `seq.*` key wasn't valid decimal.
    #[error("corrupt sequence number at key {key}: {value:?}")]
    CorruptSequenceNumber { key: String, value: Vec<u8> },
    /// A transaction method was called after `commit`/`rollback` already
    /// consumed it. Only reachable through misuse of the trait from
    /// generic code; normal callers can't hit this because `commit` and
    /// `rollback` take `self` by value.
    #[error("transaction already finished")]
    TransactionFinished,
}
