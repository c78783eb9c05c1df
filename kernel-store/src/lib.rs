//! Persistence for the inter-kernel remote messaging core.
//!
//! Grounded on `luanti-server`'s `WorldStorage` trait, which exposes a
//! narrow `store_block`/`load_block` interface with swappable `dummy` and
//! `minetestworld` (SQLite) backends. Here the same shape persists
//! per-remote sequence numbers and pending messages instead of world
//! blocks, with savepoint transactions added to satisfy spec §9's
//! atomic-receive requirement.

#![deny(unsafe_code)]

pub mod error;
pub mod keys;
pub mod memory;
pub mod sqlite;
pub mod store;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use store::Store;
pub use store::Transaction;
