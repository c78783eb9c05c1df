//! Per-remote timing and capacity configuration (spec §6).

use std::time::Duration;

/// How long to wait for an ACK of the oldest pending message before
/// retransmitting it.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(10);

/// How long to hold a received-message ack hoping a piggyback
/// opportunity (an outgoing command) arises before sending it standalone.
pub const DEFAULT_DELAYED_ACK_INTERVAL: Duration = Duration::from_millis(50);

/// How long to wait for a `redeemURLReply` before treating the request
/// as failed.
pub const DEFAULT_REDEMPTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Default cap on the persisted pending-message queue (spec §4.1.1 step
/// 2 / §6: `maxQueue=200`).
pub const DEFAULT_MAX_QUEUE_DEPTH: usize = 200;

/// Tuning knobs for one [`crate::handle::RemoteHandle`].
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// Retransmit the oldest unacknowledged message after this long
    /// without an ACK.
    pub ack_timeout: Duration,
    /// Delay before flushing a standalone ack frame, to give an
    /// outgoing command a chance to piggyback it instead.
    pub delayed_ack_interval: Duration,
    /// How long to wait for a `redeemURLReply` before giving up.
    pub redemption_timeout: Duration,
    /// Retransmission attempts before giving up on this remote
    /// entirely. `0` means unlimited.
    pub max_retry_attempts: u32,
    /// Maximum number of unacknowledged messages held in the pending
    /// queue before `send_internal` refuses new ones.
    pub max_queue_depth: usize,
    /// Location hints to register with the transport on the first send
    /// to this remote (spec §4.1.1 step 1's `registerLocationHints`).
    pub location_hints: Vec<String>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            delayed_ack_interval: DEFAULT_DELAYED_ACK_INTERVAL,
            redemption_timeout: DEFAULT_REDEMPTION_TIMEOUT,
            max_retry_attempts: 0,
            max_queue_depth: DEFAULT_MAX_QUEUE_DEPTH,
            location_hints: Vec::new(),
        }
    }
}
