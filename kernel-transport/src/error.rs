//! The transport-layer error taxonomy: protocol violation, retryable
//! network error, capacity limit, and intentional close.

use thiserror::Error;

/// Failures surfaced by [`crate::Transport`] operations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The peer's connection was intentionally closed locally; sends fail
    /// synchronously until `reconnectPeer` is called again. The message
    /// text is part of the logging contract: callers match on
    /// `"intentional close"` to distinguish this from other failures.
    #[error("intentional close")]
    IntentionalClose,
    /// No channel currently exists for this peer and none is being
    /// established (e.g. it was never dialed).
    #[error("no channel for peer {0}")]
    NoChannel(String),
    /// The outgoing frame exceeds `maxMessageSizeBytes`.
    #[error("message size {size} exceeds limit {limit}")]
    MessageTooLarge {
        /// The frame's size in bytes.
        size: usize,
        /// The configured `maxMessageSizeBytes` limit.
        limit: usize,
    },
    /// Accepting or dialing this connection would exceed
    /// `maxConcurrentConnections`.
    #[error("concurrent connection limit reached")]
    ConnectionLimitReached,
    /// A read, write, or dial failed for a reason that may resolve with
    /// a retry (reset, timeout, refused on a transient basis).
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),
    /// A write did not complete within the write timeout.
    #[error("write timed out")]
    WriteTimeout,
    /// The handshake failed: wrong frame type, timeout, or malformed
    /// `incarnationId`.
    #[error("handshake failed: {0}")]
    Handshake(String),
    /// A received frame could not be parsed as a length-delimited JSON
    /// object, or carried an unknown `method`.
    #[error("protocol violation: {0}")]
    Protocol(String),
}

impl TransportError {
    /// Whether this error should trigger the reconnection loop (as
    /// opposed to being reported to a caller as a synchronous failure).
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::WriteTimeout | Self::Handshake(_)
        )
    }
}
