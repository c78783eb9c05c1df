//! The config surface named in spec §6: relays, retry/queue/connection
//! limits, timeouts, and the directly-dialable listen addresses.

use std::time::Duration;

/// 1 MiB, the default `maxMessageSizeBytes`.
pub const DEFAULT_MAX_MESSAGE_SIZE_BYTES: usize = 1024 * 1024;

/// Default `maxConcurrentConnections`.
pub const DEFAULT_MAX_CONCURRENT_CONNECTIONS: usize = 100;

/// Default stale-peer cleanup sweep interval: 15 minutes.
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Default age after which an idle, disconnected peer's in-memory state
/// is dropped: 1 hour.
pub const DEFAULT_STALE_PEER_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Per-write abort deadline.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Handshake round-trip deadline.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Shutdown watchdog: `stop()` gives in-flight work this long to wind
/// down before the transport tears down regardless.
pub const STOP_WATCHDOG: Duration = Duration::from_secs(2);

/// Transport configuration. Construct with [`TransportConfig::default`]
/// and override only the fields that differ from the spec's defaults.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Initial known relay/rendezvous hints, merged with hints learned
    /// later via `registerLocationHints`.
    pub relays: Vec<String>,
    /// Maximum reconnection attempts per peer before giving up; `0`
    /// means unlimited.
    pub max_retry_attempts: u32,
    /// Per-remote pending-message queue bound (mirrored from
    /// `kernel-remote`, not enforced here).
    pub max_queue: usize,
    /// `maxConcurrentConnections`.
    pub max_concurrent_connections: usize,
    /// `maxMessageSizeBytes`.
    pub max_message_size_bytes: usize,
    /// Stale-peer cleanup sweep interval.
    pub cleanup_interval: Duration,
    /// Age threshold for stale-peer cleanup.
    pub stale_peer_timeout: Duration,
    /// BIP-39 mnemonic used to seed kernel identity, if any.
    pub mnemonic: Option<String>,
    /// Addresses this kernel accepts inbound connections on.
    pub direct_listen_addresses: Vec<std::net::SocketAddr>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            relays: Vec::new(),
            max_retry_attempts: 0,
            max_queue: 200,
            max_concurrent_connections: DEFAULT_MAX_CONCURRENT_CONNECTIONS,
            max_message_size_bytes: DEFAULT_MAX_MESSAGE_SIZE_BYTES,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
            stale_peer_timeout: DEFAULT_STALE_PEER_TIMEOUT,
            mnemonic: None,
            direct_listen_addresses: Vec::new(),
        }
    }
}
