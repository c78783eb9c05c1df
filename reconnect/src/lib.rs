//! Reconnection attempt accounting and backoff.
//!
//! This is deliberately free of I/O: it tracks, per peer, whether a
//! reconnection attempt is in flight, how many attempts have been made,
//! a capped history of the error codes those attempts failed with, and
//! whether the peer has been judged permanently unreachable. The caller
//! (`kernel-transport`) is responsible for actually dialing and for
//! sleeping out the backoff this module computes.

use std::collections::HashMap;
use std::time::Duration;

use log::debug;
use rand::Rng;

/// Peer identity, as used throughout the messaging core: an opaque,
/// durable string (in practice an encoded Ed25519 public key).
pub type PeerId = String;

/// Base delay for the first reconnection attempt.
pub const INITIAL_BACKOFF: Duration = Duration::from_millis(500);

/// Backoff is capped so a long-dead peer doesn't end up waiting hours
/// between attempts once reconnection is re-armed.
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// How many of the most recent error codes are retained per peer.
/// Also the window size `recordError`/`isPermanentlyFailed` judge.
pub const DEFAULT_CONSECUTIVE_ERROR_THRESHOLD: usize = 5;

/// Error codes that, repeated `consecutive_error_threshold` times in a row,
/// mark a peer permanently failed.
const PERMANENT_FAILURE_CODES: &[&str] =
    &["ECONNREFUSED", "EHOSTUNREACH", "ENOTFOUND", "ENETUNREACH"];

/// Per-peer reconnection bookkeeping.
#[derive(Debug, Clone, Default)]
struct PeerState {
    is_reconnecting: bool,
    attempt_count: u32,
    error_history: Vec<String>,
    permanently_failed: bool,
}

/// Tracks reconnection state for every peer the transport has ever seen.
///
/// All operations are synchronous and side-effect only this in-memory
/// table; nothing here touches the network or the clock except to compute
/// a backoff `Duration` for the caller to sleep.
pub struct ReconnectionManager {
    peers: HashMap<PeerId, PeerState>,
    consecutive_error_threshold: usize,
}

impl Default for ReconnectionManager {
    fn default() -> Self {
        Self::new(DEFAULT_CONSECUTIVE_ERROR_THRESHOLD)
    }
}

impl ReconnectionManager {
    /// Create a manager with a custom consecutive-error threshold for
    /// permanent-failure detection (spec default is 5).
    #[must_use]
    pub fn new(consecutive_error_threshold: usize) -> Self {
        Self {
            peers: HashMap::new(),
            consecutive_error_threshold: consecutive_error_threshold.max(1),
        }
    }

    fn entry(&mut self, peer_id: &str) -> &mut PeerState {
        self.peers.entry(peer_id.to_owned()).or_default()
    }

    /// Start (or no-op if already started) reconnection for a peer.
    ///
    /// Returns `false` if the peer is permanently failed and reconnection
    /// was refused; `true` otherwise. A fresh start (not already
    /// reconnecting) clears the attempt counter and error history, the
    /// same as a successful connection would.
    pub fn start_reconnection(&mut self, peer_id: &str) -> bool {
        let state = self.entry(peer_id);
        if state.permanently_failed {
            debug!("{peer_id}:: refusing to start reconnection, permanently failed");
            return false;
        }
        if state.is_reconnecting {
            return true;
        }
        state.is_reconnecting = true;
        state.attempt_count = 0;
        state.error_history.clear();
        true
    }

    /// Stop reconnection bookkeeping for a peer (e.g. once a channel is
    /// established, or on give-up).
    pub fn stop_reconnection(&mut self, peer_id: &str) {
        self.entry(peer_id).is_reconnecting = false;
    }

    /// Whether reconnection is currently in flight for a peer.
    #[must_use]
    pub fn is_reconnecting(&self, peer_id: &str) -> bool {
        self.peers
            .get(peer_id)
            .is_some_and(|state| state.is_reconnecting)
    }

    /// Record one more dial attempt and return the new attempt count.
    pub fn increment_attempt(&mut self, peer_id: &str) -> u32 {
        let state = self.entry(peer_id);
        state.attempt_count += 1;
        state.attempt_count
    }

    /// Undo a spurious attempt increment (used when a dial turned out to
    /// race with an already-established channel from the other side).
    pub fn decrement_attempt(&mut self, peer_id: &str) {
        let state = self.entry(peer_id);
        state.attempt_count = state.attempt_count.saturating_sub(1);
    }

    /// Clear attempt count and error history without touching
    /// `is_reconnecting` or `permanently_failed`. Called after a
    /// successful connection.
    pub fn reset_backoff(&mut self, peer_id: &str) {
        let state = self.entry(peer_id);
        state.attempt_count = 0;
        state.error_history.clear();
    }

    /// Reset backoff for every peer currently reconnecting. Intended to be
    /// called when the host detects it woke from sleep/suspend, since
    /// elapsed backoff delays measured in wall-clock time are meaningless
    /// after a long suspend.
    pub fn reset_all_backoffs(&mut self) {
        for (peer_id, state) in &mut self.peers {
            if state.is_reconnecting {
                state.attempt_count = 0;
                state.error_history.clear();
                debug!("{peer_id}:: backoff reset after wake");
            }
        }
    }

    /// Exponential backoff with jitter: `INITIAL_BACKOFF * 2^(attempts-1)`,
    /// capped at `MAX_BACKOFF`, +/- up to 20% jitter.
    #[must_use]
    pub fn calculate_backoff(&self, peer_id: &str) -> Duration {
        let attempts = self.peers.get(peer_id).map_or(0, |state| state.attempt_count);
        let shift = attempts.saturating_sub(1).min(16);
        let base = INITIAL_BACKOFF
            .checked_mul(1_u32 << shift)
            .unwrap_or(MAX_BACKOFF)
            .min(MAX_BACKOFF);
        let jitter_frac = rand::thread_rng().gen_range(0.8..=1.2);
        #[expect(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            reason = "jitter_frac is bounded to [0.8, 1.2] so the product fits comfortably"
        )]
        let jittered_nanos = (base.as_nanos() as f64 * jitter_frac) as u64;
        Duration::from_nanos(jittered_nanos)
    }

    /// `0` means infinite retries.
    #[must_use]
    pub fn should_retry(&self, peer_id: &str, max_attempts: u32) -> bool {
        let state = self.peers.get(peer_id);
        if state.is_some_and(|state| state.permanently_failed) {
            return false;
        }
        if max_attempts == 0 {
            return true;
        }
        state.map_or(true, |state| state.attempt_count < max_attempts)
    }

    /// Clear all bookkeeping for every peer.
    pub fn clear(&mut self) {
        self.peers.clear();
    }

    /// Clear bookkeeping for a single peer.
    pub fn clear_peer(&mut self, peer_id: &str) {
        self.peers.remove(peer_id);
    }

    /// Record a network error code observed while dialing/connecting to a
    /// peer. The history is capped at `consecutive_error_threshold`
    /// entries (oldest dropped first). If the full history is at capacity
    /// and every entry is the same code, and that code is one of the
    /// permanent-failure codes, the peer is marked permanently failed.
    pub fn record_error(&mut self, peer_id: &str, code: &str) {
        let threshold = self.consecutive_error_threshold;
        let state = self.entry(peer_id);
        state.error_history.push(code.to_owned());
        if state.error_history.len() > threshold {
            state.error_history.remove(0);
        }
        if state.error_history.len() == threshold
            && state.error_history.iter().all(|entry| entry == code)
            && PERMANENT_FAILURE_CODES.contains(&code)
        {
            state.permanently_failed = true;
            debug!("{peer_id}:: marked permanently failed after {threshold} x {code}");
        }
    }

    /// Whether the peer has been judged permanently unreachable.
    #[must_use]
    pub fn is_permanently_failed(&self, peer_id: &str) -> bool {
        self.peers
            .get(peer_id)
            .is_some_and(|state| state.permanently_failed)
    }

    /// Clear the permanent-failure flag (but not attempt count/history) so
    /// reconnection can be attempted again. Called by an explicit manual
    /// `reconnectPeer` request from the host.
    pub fn clear_permanent_failure(&mut self, peer_id: &str) {
        self.entry(peer_id).permanently_failed = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_reconnection_is_idempotent() {
        let mut mgr = ReconnectionManager::default();
        assert!(mgr.start_reconnection("p1"));
        mgr.increment_attempt("p1");
        assert!(mgr.start_reconnection("p1"));
        // idempotent: second call while already reconnecting doesn't reset
        assert_eq!(mgr.peers.get("p1").unwrap().attempt_count, 1);
    }

    #[test]
    fn fresh_start_clears_attempts_and_history() {
        let mut mgr = ReconnectionManager::default();
        mgr.start_reconnection("p1");
        mgr.increment_attempt("p1");
        mgr.record_error("p1", "ECONNRESET");
        mgr.stop_reconnection("p1");
        assert!(mgr.start_reconnection("p1"));
        assert_eq!(mgr.peers.get("p1").unwrap().attempt_count, 0);
        assert!(mgr.peers.get("p1").unwrap().error_history.is_empty());
    }

    #[test]
    fn permanent_failure_after_threshold_identical_codes() {
        let mut mgr = ReconnectionManager::new(5);
        for _ in 0..4 {
            mgr.record_error("p1", "ECONNREFUSED");
            assert!(!mgr.is_permanently_failed("p1"));
        }
        mgr.record_error("p1", "ECONNREFUSED");
        assert!(mgr.is_permanently_failed("p1"));
    }

    #[test]
    fn permanent_failure_requires_consecutive_identical_codes() {
        let mut mgr = ReconnectionManager::new(3);
        mgr.record_error("p1", "ECONNREFUSED");
        mgr.record_error("p1", "ETIMEDOUT");
        mgr.record_error("p1", "ECONNREFUSED");
        assert!(!mgr.is_permanently_failed("p1"));
    }

    #[test]
    fn permanent_failure_ignores_non_permanent_codes() {
        let mut mgr = ReconnectionManager::new(3);
        for _ in 0..3 {
            mgr.record_error("p1", "ETIMEDOUT");
        }
        assert!(!mgr.is_permanently_failed("p1"));
    }

    #[test]
    fn permanent_failure_monotonicity_until_cleared() {
        let mut mgr = ReconnectionManager::new(2);
        mgr.record_error("p1", "ENOTFOUND");
        mgr.record_error("p1", "ENOTFOUND");
        assert!(mgr.is_permanently_failed("p1"));
        assert!(!mgr.start_reconnection("p1"));
        mgr.clear_permanent_failure("p1");
        assert!(mgr.start_reconnection("p1"));
    }

    #[test]
    fn should_retry_respects_max_attempts_and_zero_means_infinite() {
        let mut mgr = ReconnectionManager::default();
        mgr.start_reconnection("p1");
        mgr.increment_attempt("p1");
        mgr.increment_attempt("p1");
        assert!(!mgr.should_retry("p1", 2));
        assert!(mgr.should_retry("p1", 3));
        assert!(mgr.should_retry("p1", 0));
    }

    #[test]
    fn backoff_grows_and_is_capped() {
        let mut mgr = ReconnectionManager::default();
        mgr.start_reconnection("p1");
        for _ in 0..20 {
            mgr.increment_attempt("p1");
        }
        let backoff = mgr.calculate_backoff("p1");
        assert!(backoff <= MAX_BACKOFF.mul_f64(1.21));
    }

    #[test]
    fn reset_all_backoffs_only_touches_reconnecting_peers() {
        let mut mgr = ReconnectionManager::default();
        mgr.start_reconnection("p1");
        mgr.increment_attempt("p1");
        mgr.record_error("p2", "ECONNREFUSED");
        mgr.reset_all_backoffs();
        assert_eq!(mgr.peers.get("p1").unwrap().attempt_count, 0);
        // p2 isn't reconnecting, so its (single-entry) history is untouched
        assert_eq!(mgr.peers.get("p2").unwrap().error_history.len(), 1);
    }

    #[test]
    fn clear_peer_removes_all_state() {
        let mut mgr = ReconnectionManager::default();
        mgr.start_reconnection("p1");
        mgr.clear_peer("p1");
        assert!(!mgr.is_reconnecting("p1"));
        assert!(!mgr.is_permanently_failed("p1"));
    }
}
