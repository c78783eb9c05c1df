//! `RemoteHandle`: per-remote sequence/ACK tracking, persisted pending
//! message queue, retransmission, and capability-URL redemption.
//!
//! Grounded on `luanti-protocol`'s per-peer connection state machines,
//! generalized from an unreliable UDP datagram stream to the
//! crash-safe, exactly-once, in-order delivery contract a distributed
//! object-capability kernel needs over `kernel-transport`'s
//! connection-oriented channel.

#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod frame_sender;
pub mod handle;
pub mod kernel_iface;
pub mod wire;

pub use config::RemoteConfig;
pub use error::RemoteError;
pub use frame_sender::FrameSender;
pub use frame_sender::TransportFrameSender;
pub use handle::RemoteEvent;
pub use handle::RemoteHandle;
pub use kernel_iface::KernelObjectStore;
pub use kernel_iface::KernelQueue;
