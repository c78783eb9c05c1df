//! Meta-package re-exporting the crates that make up the inter-kernel
//! remote messaging core.
//!
//! See the individual crates for documentation:
//! - [`remote_comms`] — capability URL encoding
//! - [`reconnect`] — reconnection attempt accounting and backoff
//! - [`kernel_store`] — persisted per-remote state with savepoints
//! - [`kernel_transport`] — channel lifecycle, handshake, reconnection loop
//! - [`kernel_remote`] — per-remote protocol endpoint (`RemoteHandle`)

pub use kernel_remote;
pub use kernel_store;
pub use kernel_transport;
pub use reconnect;
pub use remote_comms;
