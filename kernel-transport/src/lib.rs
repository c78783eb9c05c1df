//! Per-peer channel lifecycle: dialing, reconnection, handshake and
//! incarnation-change detection, admission control, and stale-peer
//! cleanup — spec §4.2/§4.3.
//!
//! Grounded on `luanti-protocol`'s `LuantiSocket`/`Peer` split (one
//! shared listener multiplexing many per-peer connections, each owned by
//! its own task) generalized from a raw UDP datagram stream to a
//! length-delimited TCP byte stream, since spec §6 specifies a
//! connection-oriented, length-delimited wire format rather than
//! Luanti's own framing.

#![deny(unsafe_code)]

pub mod config;
pub mod error;
mod events;
mod handshake;
mod peer;
mod transport;

pub use config::TransportConfig;
pub use error::TransportError;
pub use events::TransportEvent;
pub use transport::Transport;
pub use transport::TransportEvents;
