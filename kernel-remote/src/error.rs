//! The `RemoteHandle`-relevant rows of spec §7's error taxonomy.

use thiserror::Error;

/// Failure surfaced by a [`crate::handle::RemoteHandle`] operation.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// A received frame violated the wire protocol: malformed JSON, a
    /// missing required field, an out-of-range `seq`, or an unrecognized
    /// `method`. Per spec §7 this is fatal to the remote: the connection
    /// is torn down and not retried automatically.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// `deliverMessage` was called while the pending-message queue is at
    /// capacity (`maxQueueDepth`, spec §6). The caller should apply
    /// backpressure rather than retry immediately.
    #[error("pending message queue is at capacity ({depth}/{limit})")]
    QueueFull {
        /// Current queue depth.
        depth: usize,
        /// Configured capacity.
        limit: usize,
    },

    /// Retransmission exhausted `maxRetryAttempts` without an ACK; the
    /// remote is considered unreachable (spec §4.1.5, §S3).
    #[error("Remote connection lost after {retries} failed retries")]
    GaveUp {
        /// Number of retransmission attempts made before giving up.
        retries: u32,
    },

    /// `redeemURL` was sent but no `redeemURLReply` arrived within the
    /// redemption timeout (spec §4.1.3 step 8, §6).
    #[error("timed out waiting for redeemURLReply")]
    RedemptionTimeout,

    /// The remote rejected a `redeemURL` request (its own
    /// `redeemLocalOcapURL` failed at the issuer).
    #[error("remote rejected URL redemption: {0}")]
    RedemptionRejected(String),

    /// Underlying persistence failed.
    #[error("store error: {0}")]
    Store(#[from] kernel_store::StoreError),

    /// The transport reported it can't currently reach the remote
    /// (`NoChannel`/`IntentionalClose`/admission-control failures
    /// propagated from `kernel-transport`). Not fatal: the message stays
    /// queued for retransmission.
    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),

    /// `registerLocationHints`/`reconnectPeer` was called for a remote
    /// this handle doesn't recognize.
    #[error("unknown remote {0:?}")]
    UnknownRemote(String),
}

impl RemoteError {
    /// Whether this failure leaves the remote usable (queued for retry)
    /// as opposed to requiring the caller to tear the remote down.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Protocol(_) | Self::GaveUp { .. })
    }
}
