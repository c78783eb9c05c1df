//! `RemoteHandle`: per-remote sequence/ACK tracking, persisted pending
//! message queue, retransmission, delayed acks, and capability-URL
//! redemption over a single `RemoteId`'s channel (spec §4.1).
//!
//! The core protocol logic here is deliberately synchronous. Spec
//! §4.1.1 step 8 says the outgoing transport send must not be awaited,
//! so the only place this module touches async I/O is through
//! [`FrameSender`], called fire-and-forget. Timers (ack timeout,
//! delayed ack, redemption timeout) are modeled as plain deadline
//! fields the owner compares against its own clock/sleep loop via
//! `on_*_timeout`, rather than self-driving spawned tasks — this keeps
//! `RemoteHandle` a state machine that's trivially unit-testable
//! without an async runtime.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::time::Instant;

use kernel_store::Store;
use kernel_store::Transaction;
use kernel_store::keys;
use reconnect::PeerId;
use remote_comms::KernelIdentity;
use remote_comms::OcapUrl;
use serde_json::Value;

use crate::config::RemoteConfig;
use crate::error::RemoteError;
use crate::frame_sender::FrameSender;
use crate::kernel_iface::KernelObjectStore;
use crate::kernel_iface::KernelQueue;
use crate::wire;
use crate::wire::DeliverPayload;
use crate::wire::IncomingFrame;
use crate::wire::Method;
use crate::wire::RedeemUrlParams;
use crate::wire::RedeemUrlReply;

/// Side effects of [`RemoteHandle::handle_remote_message`] or
/// [`RemoteHandle::on_redemption_timeout`] that the caller must act on
/// itself, since they resolve something the caller, not this remote,
/// is waiting on.
#[derive(Debug, Clone)]
pub enum RemoteEvent {
    /// A `redeemURL` request this handle sent has been answered (or
    /// timed out waiting for an answer).
    RedemptionResolved {
        /// The key [`RemoteHandle::redeem_url`] returned.
        reply_key: String,
        /// The freshly-imported `ERef` on success, or an error message.
        result: Result<String, String>,
    },
}

struct RedemptionState {
    deadline: Instant,
}

/// Per-remote protocol state: sequence numbers, the pending-message
/// queue, and outstanding URL redemptions. One instance per `RemoteId`.
pub struct RemoteHandle<F: FrameSender> {
    remote_id: PeerId,
    config: RemoteConfig,
    frame_sender: F,

    next_send_seq: u64,
    start_seq: u64,
    highest_received_seq: u64,
    pending: BTreeMap<u64, Vec<u8>>,

    last_send_time: Option<Instant>,
    retry_attempts: u32,
    gave_up: bool,

    delayed_ack_deadline: Option<Instant>,

    outstanding_redemptions: HashMap<String, RedemptionState>,
    next_reply_key: u64,

    hints_registered: bool,
}

impl<F: FrameSender> RemoteHandle<F> {
    /// Load (or initialize) a remote's persisted sequence state and
    /// pending queue from `store`.
    ///
    /// # Errors
    /// Returns [`RemoteError::Store`] if the backend fails to read, or
    /// [`RemoteError::Store`] wrapping [`kernel_store::StoreError::CorruptSequenceNumber`]
    /// if a persisted sequence value isn't valid decimal.
    pub fn load(remote_id: impl Into<PeerId>, config: RemoteConfig, frame_sender: F, store: &mut dyn Store) -> Result<Self, RemoteError> {
        let remote_id = remote_id.into();

        let next_send_seq = load_seq(store, &keys::next_send_seq(&remote_id))?.unwrap_or(1);
        let start_seq = load_seq(store, &keys::start_seq(&remote_id))?.unwrap_or(next_send_seq);
        let highest_received_seq = load_seq(store, &keys::highest_received_seq(&remote_id))?.unwrap_or(0);

        let mut pending = BTreeMap::new();
        for key in store.keys_with_prefix(&format!("pending.{remote_id}."))? {
            if let Some(seq) = keys::parse_pending_seq(&remote_id, &key) {
                if let Some(bytes) = store.get(&key)? {
                    pending.insert(seq, bytes);
                }
            }
        }

        Ok(Self {
            remote_id,
            config,
            frame_sender,
            next_send_seq,
            start_seq,
            highest_received_seq,
            pending,
            last_send_time: None,
            retry_attempts: 0,
            gave_up: false,
            delayed_ack_deadline: None,
            outstanding_redemptions: HashMap::new(),
            next_reply_key: 0,
            hints_registered: false,
        })
    }

    /// Which remote this handle tracks.
    #[must_use]
    pub fn remote_id(&self) -> &PeerId {
        &self.remote_id
    }

    /// Whether retransmission has exhausted its retry budget for this
    /// remote (spec §4.1.5). Once true, this handle no longer
    /// retransmits; the caller should tear the remote down.
    #[must_use]
    pub fn has_given_up(&self) -> bool {
        self.gave_up
    }

    /// Number of messages awaiting acknowledgment.
    #[must_use]
    pub fn pending_depth(&self) -> usize {
        self.pending.len()
    }

    /// `deliverMessage` (spec §4.1.1): enqueue an application-level
    /// `deliver` command and send it.
    ///
    /// # Errors
    /// Returns [`RemoteError::QueueFull`] if the pending queue is at
    /// capacity, or [`RemoteError::Store`] if persistence fails.
    pub fn deliver_message(&mut self, store: &mut dyn Store, payload: &DeliverPayload) -> Result<u64, RemoteError> {
        self.send_internal(store, Method::Deliver, payload.to_value())
    }

    /// Request a remote (whose peer id this handle's `redeemURL`
    /// requests are always addressed to) to decrypt a capability URL it
    /// issued. Returns a correlation key; the outcome arrives later as
    /// a [`RemoteEvent::RedemptionResolved`] from
    /// [`Self::handle_remote_message`] or [`Self::on_redemption_timeout`].
    ///
    /// # Errors
    /// Returns [`RemoteError::QueueFull`] if the pending queue is at
    /// capacity, or [`RemoteError::Store`] if persisting the request
    /// fails.
    pub fn redeem_url(&mut self, store: &mut dyn Store, url: &OcapUrl) -> Result<String, RemoteError> {
        let reply_key = self.next_reply_key.to_string();
        self.next_reply_key += 1;

        let params = RedeemUrlParams {
            reply_key: reply_key.clone(),
            url: url.to_url_string(),
        };
        #[expect(clippy::unwrap_used, reason = "RedeemUrlParams is a plain struct of strings, serialization cannot fail")]
        let params_value = serde_json::to_value(&params).unwrap();
        self.send_internal(store, Method::RedeemUrl, params_value)?;

        self.outstanding_redemptions.insert(
            reply_key.clone(),
            RedemptionState {
                deadline: Instant::now() + self.config.redemption_timeout,
            },
        );
        Ok(reply_key)
    }

    /// Process one raw frame received from the transport for this
    /// remote: ack bookkeeping, then (for `Command` frames) the
    /// transactional receive-and-advance and dispatch to the kernel
    /// object store / run queue.
    ///
    /// # Errors
    /// Returns [`RemoteError::Protocol`] for a malformed frame, an
    /// unexpected `seq`, or an unknown export reference — all fatal to
    /// this remote per spec §7. Returns [`RemoteError::Store`] if
    /// persistence fails.
    pub fn handle_remote_message(
        &mut self,
        store: &mut dyn Store,
        objects: &mut dyn KernelObjectStore,
        queue: &mut dyn KernelQueue,
        identity: &KernelIdentity,
        bytes: &[u8],
    ) -> Result<Vec<RemoteEvent>, RemoteError> {
        let frame = wire::parse_incoming(bytes)?;
        let mut events = Vec::new();

        match frame {
            IncomingFrame::StandaloneAck { ack } => {
                self.process_ack(store, ack)?;
            }
            IncomingFrame::Command { seq, ack, method, params } => {
                if let Some(ack) = ack {
                    self.process_ack(store, ack)?;
                }
                if seq <= self.highest_received_seq {
                    // Already processed; the remote is retransmitting
                    // because our ack was lost. Re-ack, do not reapply.
                    self.schedule_ack();
                } else if seq == self.highest_received_seq + 1 {
                    self.apply_incoming(store, objects, queue, identity, seq, method, params, &mut events)?;
                } else {
                    return Err(RemoteError::Protocol(format!(
                        "received seq {seq} but expected {} (in-order delivery is a transport invariant)",
                        self.highest_received_seq + 1
                    )));
                }
            }
        }

        Ok(events)
    }

    /// Retransmit every unacknowledged message if `ack_timeout` has
    /// elapsed since the last send, or give up on the remote once
    /// `max_retry_attempts` is exhausted (spec §4.1.5). Called by the
    /// owner's own timer loop; see [`Self::next_timer_deadline`].
    ///
    /// On give-up, returns the [`RemoteEvent::RedemptionResolved`]
    /// events rejecting every outstanding URL redemption; check
    /// [`Self::has_given_up`] afterwards to see whether that happened.
    ///
    /// # Errors
    /// Returns [`RemoteError::Store`] if persisting the give-up's
    /// `startSeq` advance fails.
    pub fn on_ack_timeout(&mut self, store: &mut dyn Store, now: Instant) -> Result<Vec<RemoteEvent>, RemoteError> {
        if self.gave_up {
            return Ok(Vec::new());
        }
        let Some(last_send) = self.last_send_time else {
            return Ok(Vec::new());
        };
        if now.duration_since(last_send) < self.config.ack_timeout {
            return Ok(Vec::new());
        }
        if self.pending.is_empty() {
            self.last_send_time = None;
            return Ok(Vec::new());
        }
        if self.config.max_retry_attempts > 0 && self.retry_attempts >= self.config.max_retry_attempts {
            return self.give_up(store);
        }
        self.retry_attempts += 1;
        log::info!(
            "{}:: retransmitting {} pending message(s), attempt {}",
            self.remote_id,
            self.pending.len(),
            self.retry_attempts
        );
        for frame in self.pending.values() {
            self.frame_sender.send_frame(&self.remote_id, frame.clone());
        }
        self.last_send_time = Some(now);
        Ok(Vec::new())
    }

    /// Give-up (spec §4.1.5): persist `startSeq` past every currently
    /// pending message, drop them from memory, reset the retry counter,
    /// and reject every outstanding URL redemption.
    fn give_up(&mut self, store: &mut dyn Store) -> Result<Vec<RemoteEvent>, RemoteError> {
        self.gave_up = true;
        let new_start = self.next_send_seq;

        let label = format!("giveup_{}", self.remote_id);
        let mut txn = store.begin(&label)?;
        txn.put(&keys::start_seq(&self.remote_id), keys::encode_u64(new_start))?;
        for seq in self.start_seq..new_start {
            txn.delete(&keys::pending_message(&self.remote_id, seq))?;
        }
        txn.commit()?;

        self.pending.clear();
        self.start_seq = new_start;
        let retries = self.retry_attempts;
        self.retry_attempts = 0;
        self.last_send_time = None;

        log::warn!("{}:: gave up after {retries} retries", self.remote_id);

        let reason = format!("Remote connection lost after {retries} failed retries");
        Ok(self
            .outstanding_redemptions
            .drain()
            .map(|(reply_key, _state)| RemoteEvent::RedemptionResolved {
                reply_key,
                result: Err(reason.clone()),
            })
            .collect())
    }

    /// Flush a standalone ack if [`Self::schedule_ack`] set a deadline
    /// that has now passed without a piggyback opportunity.
    pub fn on_delayed_ack_timeout(&mut self, now: Instant) {
        let Some(deadline) = self.delayed_ack_deadline else {
            return;
        };
        if now < deadline {
            return;
        }
        self.delayed_ack_deadline = None;
        let frame = wire::encode_standalone_ack(self.highest_received_seq);
        self.frame_sender.send_frame(&self.remote_id, frame);
    }

    /// Expire any outstanding URL redemptions past their deadline.
    #[must_use]
    pub fn on_redemption_timeout(&mut self, now: Instant) -> Vec<RemoteEvent> {
        let expired: Vec<String> = self
            .outstanding_redemptions
            .iter()
            .filter(|(_key, state)| state.deadline <= now)
            .map(|(key, _state)| key.clone())
            .collect();
        expired
            .into_iter()
            .map(|reply_key| {
                self.outstanding_redemptions.remove(&reply_key);
                RemoteEvent::RedemptionResolved {
                    reply_key,
                    result: Err(RemoteError::RedemptionTimeout.to_string()),
                }
            })
            .collect()
    }

    /// The earliest instant the owner's timer loop needs to wake this
    /// handle up again, across all three timers. `None` means nothing
    /// is pending.
    #[must_use]
    pub fn next_timer_deadline(&self) -> Option<Instant> {
        let ack_deadline = self.last_send_time.map(|sent| sent + self.config.ack_timeout);
        let redemption_deadline = self.outstanding_redemptions.values().map(|state| state.deadline).min();
        [ack_deadline, self.delayed_ack_deadline, redemption_deadline].into_iter().flatten().min()
    }

    /// Every outgoing send funnels through here, so the capacity check
    /// (spec §4.1.1 step 2, `maxQueue`) and the one-time
    /// `registerLocationHints` call (step 1) apply uniformly to
    /// `deliverMessage`, `redeemURL`, and the in-transaction
    /// `redeemURLReply` staged from [`Self::apply_incoming`].
    fn send_internal(&mut self, store: &mut dyn Store, method: Method, params: Value) -> Result<u64, RemoteError> {
        self.check_queue_capacity()?;
        let (seq, frame_bytes) = self.stage_outgoing(method, &params);
        let was_empty = self.pending.is_empty();

        let label = format!("send_{}_{seq}", self.remote_id);
        let mut txn = store.begin(&label)?;
        self.write_outgoing_in_txn(&mut *txn, seq, &frame_bytes, was_empty)?;
        txn.commit()?;

        self.commit_outgoing(seq, frame_bytes, was_empty);
        Ok(seq)
    }

    fn check_queue_capacity(&self) -> Result<(), RemoteError> {
        if self.pending.len() >= self.config.max_queue_depth {
            return Err(RemoteError::QueueFull {
                depth: self.pending.len(),
                limit: self.config.max_queue_depth,
            });
        }
        Ok(())
    }

    /// Encode the next outgoing frame and, on the very first send this
    /// handle ever makes, fire off `registerLocationHints` (spec §4.1.1
    /// step 1). Pure bookkeeping: does not touch `store` or `pending`.
    fn stage_outgoing(&mut self, method: Method, params: &Value) -> (u64, Vec<u8>) {
        if !self.hints_registered {
            self.hints_registered = true;
            self.frame_sender.register_location_hints(&self.remote_id, &self.config.location_hints);
        }
        let seq = self.next_send_seq;
        let ack = (self.highest_received_seq > 0).then_some(self.highest_received_seq);
        (seq, wire::encode_command(seq, ack, method, params))
    }

    /// Persist a staged outgoing frame within an already-open
    /// transaction (the receive savepoint, for a staged `redeemURLReply`,
    /// or `send_internal`'s own savepoint for everything else).
    fn write_outgoing_in_txn(&self, txn: &mut dyn Transaction, seq: u64, frame_bytes: &[u8], was_empty: bool) -> Result<(), RemoteError> {
        txn.put(&keys::pending_message(&self.remote_id, seq), frame_bytes.to_vec())?;
        if was_empty {
            txn.put(&keys::start_seq(&self.remote_id), keys::encode_u64(seq))?;
        }
        txn.put(&keys::next_send_seq(&self.remote_id), keys::encode_u64(seq + 1))?;
        Ok(())
    }

    /// Apply a staged outgoing frame's in-memory effects once its
    /// persistence has committed: enqueue it as pending, advance the
    /// send sequence, and hand it to the transport fire-and-forget.
    fn commit_outgoing(&mut self, seq: u64, frame_bytes: Vec<u8>, was_empty: bool) {
        if was_empty {
            self.start_seq = seq;
        }
        self.pending.insert(seq, frame_bytes.clone());
        self.next_send_seq = seq + 1;
        self.last_send_time.get_or_insert_with(Instant::now);
        self.delayed_ack_deadline = None;

        self.frame_sender.send_frame(&self.remote_id, frame_bytes);
    }

    fn process_ack(&mut self, store: &mut dyn Store, ack: u64) -> Result<(), RemoteError> {
        if ack + 1 <= self.start_seq {
            return Ok(());
        }
        let new_start = ack + 1;

        let label = format!("ack_{}_{ack}", self.remote_id);
        let mut txn = store.begin(&label)?;
        txn.put(&keys::start_seq(&self.remote_id), keys::encode_u64(new_start))?;
        for seq in self.start_seq..new_start {
            txn.delete(&keys::pending_message(&self.remote_id, seq))?;
        }
        txn.commit()?;

        for seq in self.start_seq..new_start {
            log::info!("{}:: message {seq} acknowledged", self.remote_id);
        }
        self.pending.retain(|&seq, _frame| seq >= new_start);
        self.start_seq = new_start;
        self.retry_attempts = 0;
        self.last_send_time = if self.pending.is_empty() { None } else { Some(Instant::now()) };
        Ok(())
    }

    /// Dispatch one in-order `Command` frame and advance
    /// `highest_received_seq`, as a single savepoint committed last
    /// (spec §4.1.3 step 12 / §9): if dispatch fails (e.g. an unknown
    /// export `ERef`), the whole savepoint rolls back, `seq` is never
    /// persisted or observed in memory, and the remote's retransmit of
    /// the same frame is processed again rather than silently dropped
    /// as a duplicate.
    #[expect(clippy::too_many_arguments, reason = "mirrors the collaborators handle_remote_message threads through")]
    fn apply_incoming(
        &mut self,
        store: &mut dyn Store,
        objects: &mut dyn KernelObjectStore,
        queue: &mut dyn KernelQueue,
        identity: &KernelIdentity,
        seq: u64,
        method: Method,
        params: Value,
        events: &mut Vec<RemoteEvent>,
    ) -> Result<(), RemoteError> {
        let label = format!("receive_{}_{seq}", self.remote_id);
        let mut txn = store.begin(&label)?;

        let mut produced_events = Vec::new();
        let mut staged_reply = None;
        if let Err(error) = self.dispatch_incoming(&mut *txn, objects, queue, identity, method, params, &mut produced_events, &mut staged_reply) {
            txn.rollback()?;
            return Err(error);
        }

        txn.put(&keys::highest_received_seq(&self.remote_id), keys::encode_u64(seq))?;
        txn.commit()?;

        self.highest_received_seq = seq;
        if let Some((reply_seq, frame_bytes, was_empty)) = staged_reply {
            self.commit_outgoing(reply_seq, frame_bytes, was_empty);
        }
        events.extend(produced_events);
        self.schedule_ack();
        Ok(())
    }

    /// The fallible part of [`Self::apply_incoming`]'s dispatch, run
    /// against the still-open receive savepoint. A `redeemURLReply` this
    /// dispatches (spec §4.1.3 step 8) is staged into `staged_reply`
    /// rather than sent immediately, so its persistence shares this
    /// savepoint and its in-memory/transport effects only happen once
    /// the caller commits.
    #[expect(clippy::too_many_arguments, reason = "mirrors the collaborators handle_remote_message threads through")]
    fn dispatch_incoming(
        &mut self,
        txn: &mut dyn Transaction,
        objects: &mut dyn KernelObjectStore,
        queue: &mut dyn KernelQueue,
        identity: &KernelIdentity,
        method: Method,
        params: Value,
        produced_events: &mut Vec<RemoteEvent>,
        staged_reply: &mut Option<(u64, Vec<u8>, bool)>,
    ) -> Result<(), RemoteError> {
        match method {
            Method::Deliver => {
                let payload = DeliverPayload::parse(&params)?;
                self.apply_deliver(objects, queue, payload)
            }
            Method::RedeemUrl => {
                let request: RedeemUrlParams = serde_json::from_value(params).map_err(|error| RemoteError::Protocol(error.to_string()))?;
                let result = remote_comms::redeem_local_ocap_url(&request.url, identity).map_err(|error| error.to_string());
                let reply_params = wire::encode_redeem_url_reply(&request.reply_key, &result);

                self.check_queue_capacity()?;
                let (reply_seq, frame_bytes) = self.stage_outgoing(Method::RedeemUrlReply, &reply_params);
                let was_empty = self.pending.is_empty();
                self.write_outgoing_in_txn(txn, reply_seq, &frame_bytes, was_empty)?;
                *staged_reply = Some((reply_seq, frame_bytes, was_empty));
                Ok(())
            }
            Method::RedeemUrlReply => {
                let reply = RedeemUrlReply::parse(&params)?;
                if self.outstanding_redemptions.remove(&reply.reply_key).is_some() {
                    let result = if reply.success {
                        Ok(objects.kref_to_eref(&self.remote_id, &reply.kref_or_error))
                    } else {
                        Err(reply.kref_or_error)
                    };
                    produced_events.push(RemoteEvent::RedemptionResolved {
                        reply_key: reply.reply_key,
                        result,
                    });
                }
                Ok(())
            }
        }
    }

    fn apply_deliver(&self, objects: &mut dyn KernelObjectStore, queue: &mut dyn KernelQueue, payload: DeliverPayload) -> Result<(), RemoteError> {
        match payload {
            DeliverPayload::Message { target, methargs, result } => {
                let kref = objects
                    .eref_to_kref(&self.remote_id, &target)
                    .ok_or_else(|| RemoteError::Protocol(format!("unknown export {target:?}")))?;
                queue.enqueue_send(&self.remote_id, &kref, methargs, result);
            }
            DeliverPayload::Notify(resolutions) => queue.resolve_promises(&self.remote_id, resolutions),
            // Cross-wired per spec §4.1.4: an incoming GC notification
            // names the *sender's* side of the relationship, so it maps
            // onto the opposite local bookkeeping.
            DeliverPayload::DropExports(erefs) => queue.drop_imports(&self.remote_id, erefs),
            DeliverPayload::RetireExports(erefs) => queue.retire_imports(&self.remote_id, erefs),
            DeliverPayload::RetireImports(erefs) => queue.retire_exports(&self.remote_id, erefs),
        }
        Ok(())
    }

    fn schedule_ack(&mut self) {
        self.delayed_ack_deadline.get_or_insert_with(|| Instant::now() + self.config.delayed_ack_interval);
    }

    /// `rejectPendingRedemptions(reason)` (spec §4.1 contract table):
    /// reject every outstanding URL redemption in memory, without
    /// touching durable state.
    pub fn reject_pending_redemptions(&mut self, reason: &str) -> Vec<RemoteEvent> {
        self.outstanding_redemptions
            .drain()
            .map(|(reply_key, _state)| RemoteEvent::RedemptionResolved {
                reply_key,
                result: Err(reason.to_owned()),
            })
            .collect()
    }

    /// `cleanup()` (spec §4.1 contract table): clear this handle's
    /// timers and reject any pending redemptions; durable state
    /// (sequence numbers, the pending queue) is left intact so a fresh
    /// [`Self::load`] for the same remote resumes where this left off.
    pub fn cleanup(&mut self) -> Vec<RemoteEvent> {
        self.last_send_time = None;
        self.delayed_ack_deadline = None;
        self.reject_pending_redemptions("remote handle cleaned up")
    }

    /// `deliverBringOutYourDead()` (spec §4.1 contract table): a no-op
    /// contract placeholder. This messaging core has no kernel-side GC
    /// sweep of its own to trigger.
    pub fn deliver_bring_out_your_dead(&self) {}
}

fn load_seq(store: &mut dyn Store, key: &str) -> Result<Option<u64>, RemoteError> {
    match store.get(key)? {
        Some(bytes) => Ok(Some(keys::decode_u64(key, &bytes)?)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use kernel_store::MemoryStore;
    use serde_json::json;

    use super::*;
    use crate::frame_sender::test_support::RecordingFrameSender;

    struct FakeObjects {
        exports: HashMap<(String, String), String>,
        next_imported_eref: u64,
    }

    impl FakeObjects {
        fn new() -> Self {
            Self {
                exports: HashMap::new(),
                next_imported_eref: 0,
            }
        }
    }

    impl KernelObjectStore for FakeObjects {
        fn eref_to_kref(&self, remote_id: &str, eref: &str) -> Option<String> {
            self.exports.get(&(remote_id.to_owned(), eref.to_owned())).cloned()
        }

        fn kref_to_eref(&mut self, _remote_id: &str, kref: &str) -> String {
            self.next_imported_eref += 1;
            format!("ro+{}:{kref}", self.next_imported_eref)
        }

        fn export_new(&mut self, remote_id: &str, kref: &str) -> String {
            let eref = format!("ro+export:{kref}");
            self.exports.insert((remote_id.to_owned(), eref.clone()), kref.to_owned());
            eref
        }
    }

    #[derive(Default)]
    struct FakeQueue {
        enqueued: Vec<(String, String, Value, Option<String>)>,
        resolved: Vec<(String, Vec<(String, bool, Value)>)>,
        dropped_imports: Vec<(String, Vec<String>)>,
        retired_exports: Vec<(String, Vec<String>)>,
        retired_imports: Vec<(String, Vec<String>)>,
    }

    impl KernelQueue for FakeQueue {
        fn enqueue_send(&mut self, remote_id: &str, target: &str, methargs: Value, result: Option<String>) {
            self.enqueued.push((remote_id.to_owned(), target.to_owned(), methargs, result));
        }

        fn resolve_promises(&mut self, remote_id: &str, resolutions: Vec<(String, bool, Value)>) {
            self.resolved.push((remote_id.to_owned(), resolutions));
        }

        fn drop_imports(&mut self, remote_id: &str, erefs: Vec<String>) {
            self.dropped_imports.push((remote_id.to_owned(), erefs));
        }

        fn retire_exports(&mut self, remote_id: &str, erefs: Vec<String>) {
            self.retired_exports.push((remote_id.to_owned(), erefs));
        }

        fn retire_imports(&mut self, remote_id: &str, erefs: Vec<String>) {
            self.retired_imports.push((remote_id.to_owned(), erefs));
        }
    }

    fn new_handle(store: &mut MemoryStore) -> RemoteHandle<RecordingFrameSender> {
        RemoteHandle::load("peer-b", RemoteConfig::default(), RecordingFrameSender::default(), store).unwrap()
    }

    #[test]
    fn deliver_message_persists_and_sends() {
        let mut store = MemoryStore::default();
        let mut handle = new_handle(&mut store);

        let payload = DeliverPayload::DropExports(vec!["ro+1".to_owned()]);
        let seq = handle.deliver_message(&mut store, &payload).unwrap();
        assert_eq!(seq, 1);
        assert_eq!(handle.pending_depth(), 1);

        let sent = handle.frame_sender.take_sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "peer-b");

        assert_eq!(store.get(&keys::next_send_seq("peer-b")).unwrap(), Some(keys::encode_u64(2)));
        assert_eq!(store.get(&keys::start_seq("peer-b")).unwrap(), Some(keys::encode_u64(1)));
        assert!(store.get(&keys::pending_message("peer-b", 1)).unwrap().is_some());
    }

    #[test]
    fn ack_advances_start_seq_and_clears_pending() {
        let mut store = MemoryStore::default();
        let mut handle = new_handle(&mut store);
        handle.deliver_message(&mut store, &DeliverPayload::DropExports(vec![])).unwrap();
        handle.deliver_message(&mut store, &DeliverPayload::DropExports(vec![])).unwrap();
        assert_eq!(handle.pending_depth(), 2);

        let ack_frame = wire::encode_standalone_ack(1);
        let mut objects = FakeObjects::new();
        let mut queue = FakeQueue::default();
        let identity = KernelIdentity::generate();
        handle
            .handle_remote_message(&mut store, &mut objects, &mut queue, &identity, &ack_frame)
            .unwrap();

        assert_eq!(handle.pending_depth(), 1);
        assert!(store.get(&keys::pending_message("peer-b", 1)).unwrap().is_none());
        assert!(store.get(&keys::pending_message("peer-b", 2)).unwrap().is_some());
    }

    #[test]
    fn incoming_message_advances_highest_received_and_acks() {
        let mut store = MemoryStore::default();
        let mut handle = new_handle(&mut store);
        let mut objects = FakeObjects::new();
        objects.exports.insert(("peer-b".to_owned(), "ro+1".to_owned()), "k-42".to_owned());
        let mut queue = FakeQueue::default();
        let identity = KernelIdentity::generate();

        let frame = wire::encode_command(
            1,
            None,
            Method::Deliver,
            &DeliverPayload::Message {
                target: "ro+1".to_owned(),
                methargs: json!({"a": 1}),
                result: None,
            }
            .to_value(),
        );

        let events = handle
            .handle_remote_message(&mut store, &mut objects, &mut queue, &identity, &frame)
            .unwrap();
        assert!(events.is_empty());
        assert_eq!(queue.enqueued.len(), 1);
        assert_eq!(queue.enqueued[0].1, "k-42");
        assert_eq!(store.get(&keys::highest_received_seq("peer-b")).unwrap(), Some(keys::encode_u64(1)));
    }

    #[test]
    fn duplicate_incoming_seq_is_not_reapplied() {
        let mut store = MemoryStore::default();
        let mut handle = new_handle(&mut store);
        let mut objects = FakeObjects::new();
        objects.exports.insert(("peer-b".to_owned(), "ro+1".to_owned()), "k-1".to_owned());
        let mut queue = FakeQueue::default();
        let identity = KernelIdentity::generate();

        let frame = wire::encode_command(
            1,
            None,
            Method::Deliver,
            &DeliverPayload::Message {
                target: "ro+1".to_owned(),
                methargs: Value::Null,
                result: None,
            }
            .to_value(),
        );
        handle.handle_remote_message(&mut store, &mut objects, &mut queue, &identity, &frame).unwrap();
        handle.handle_remote_message(&mut store, &mut objects, &mut queue, &identity, &frame).unwrap();

        assert_eq!(queue.enqueued.len(), 1, "duplicate delivery must not be re-applied");
    }

    #[test]
    fn out_of_order_seq_is_a_protocol_violation() {
        let mut store = MemoryStore::default();
        let mut handle = new_handle(&mut store);
        let mut objects = FakeObjects::new();
        let mut queue = FakeQueue::default();
        let identity = KernelIdentity::generate();

        let frame = wire::encode_command(5, None, Method::Deliver, &DeliverPayload::DropExports(vec![]).to_value());
        let error = handle
            .handle_remote_message(&mut store, &mut objects, &mut queue, &identity, &frame)
            .unwrap_err();
        assert!(matches!(error, RemoteError::Protocol(_)));
    }

    #[test]
    fn redeem_url_round_trip_resolves_to_imported_eref() {
        let mut requester_store = MemoryStore::default();
        let mut issuer_store = MemoryStore::default();
        let issuer_identity = KernelIdentity::generate();

        let mut requester = RemoteHandle::load("issuer", RemoteConfig::default(), RecordingFrameSender::default(), &mut requester_store).unwrap();
        let mut issuer = RemoteHandle::load("requester", RemoteConfig::default(), RecordingFrameSender::default(), &mut issuer_store).unwrap();

        let url = remote_comms::issue_ocap_url("k-object", &issuer_identity, &[]);
        let parsed = OcapUrl::parse(&url).unwrap();
        let reply_key = requester.redeem_url(&mut requester_store, &parsed).unwrap();

        let request_frame = requester.frame_sender.take_sent();
        assert_eq!(request_frame.len(), 1);

        let mut objects = FakeObjects::new();
        let mut queue = FakeQueue::default();
        let events = issuer
            .handle_remote_message(&mut issuer_store, &mut objects, &mut queue, &issuer_identity, &request_frame[0].1)
            .unwrap();
        assert!(events.is_empty());

        let reply_frame = issuer.frame_sender.take_sent();
        assert_eq!(reply_frame.len(), 1);

        let mut requester_objects = FakeObjects::new();
        let events = requester
            .handle_remote_message(&mut requester_store, &mut requester_objects, &mut queue, &issuer_identity, &reply_frame[0].1)
            .unwrap();
        assert_eq!(events.len(), 1);
        match &events[0] {
            RemoteEvent::RedemptionResolved { reply_key: got_key, result } => {
                assert_eq!(got_key, &reply_key);
                assert!(result.as_ref().unwrap().contains("k-object"));
            }
        }
    }

    #[test]
    fn ack_timeout_retransmits_then_gives_up() {
        let mut store = MemoryStore::default();
        let mut config = RemoteConfig::default();
        config.max_retry_attempts = 1;
        config.ack_timeout = Duration::from_millis(1);
        let mut handle = RemoteHandle::load("peer-b", config, RecordingFrameSender::default(), &mut store).unwrap();
        handle.deliver_message(&mut store, &DeliverPayload::DropExports(vec![])).unwrap();
        let _ = handle.frame_sender.take_sent();

        let later = Instant::now() + Duration::from_secs(1);
        handle.on_ack_timeout(&mut store, later).unwrap();
        assert_eq!(handle.frame_sender.take_sent().len(), 1, "first retransmit");

        let url = OcapUrl::new("oid".to_owned(), "peer-b".to_owned(), vec![]);
        handle.redeem_url(&mut store, &url).unwrap();

        let even_later = later + Duration::from_secs(1);
        let events = handle.on_ack_timeout(&mut store, even_later).unwrap();
        assert!(handle.has_given_up());
        assert_eq!(handle.pending_depth(), 0, "give-up must clear the pending queue");
        assert_eq!(events.len(), 1, "give-up must reject outstanding redemptions");
        match &events[0] {
            RemoteEvent::RedemptionResolved { result, .. } => assert!(result.is_err()),
        }
        assert!(store.get(&keys::pending_message("peer-b", 1)).unwrap().is_none());
    }

    #[test]
    fn redemption_times_out_without_a_reply() {
        let mut store = MemoryStore::default();
        let mut config = RemoteConfig::default();
        config.redemption_timeout = Duration::from_millis(1);
        let mut handle = RemoteHandle::load("peer-b", config, RecordingFrameSender::default(), &mut store).unwrap();
        let url = OcapUrl::new("oid".to_owned(), "peer-b".to_owned(), vec![]);
        let reply_key = handle.redeem_url(&mut store, &url).unwrap();

        let later = Instant::now() + Duration::from_secs(1);
        let events = handle.on_redemption_timeout(later);
        assert_eq!(events.len(), 1);
        match &events[0] {
            RemoteEvent::RedemptionResolved { reply_key: got_key, result } => {
                assert_eq!(got_key, &reply_key);
                assert!(result.is_err());
            }
        }
    }

    #[test]
    fn failed_dispatch_does_not_advance_highest_received_seq() {
        let mut store = MemoryStore::default();
        let mut handle = new_handle(&mut store);
        let mut objects = FakeObjects::new(); // no exports registered: eref_to_kref always fails
        let mut queue = FakeQueue::default();
        let identity = KernelIdentity::generate();

        let frame = wire::encode_command(
            1,
            None,
            Method::Deliver,
            &DeliverPayload::Message {
                target: "ro+unknown".to_owned(),
                methargs: Value::Null,
                result: None,
            }
            .to_value(),
        );

        let error = handle
            .handle_remote_message(&mut store, &mut objects, &mut queue, &identity, &frame)
            .unwrap_err();
        assert!(matches!(error, RemoteError::Protocol(_)));
        assert_eq!(store.get(&keys::highest_received_seq("peer-b")).unwrap(), None, "a rolled-back receive must not persist seq");
        assert!(queue.enqueued.is_empty());

        // The remote's retransmit of the same frame must be processed
        // again, not dropped as an already-seen duplicate.
        objects.exports.insert(("peer-b".to_owned(), "ro+unknown".to_owned()), "k-1".to_owned());
        handle.handle_remote_message(&mut store, &mut objects, &mut queue, &identity, &frame).unwrap();
        assert_eq!(queue.enqueued.len(), 1);
        assert_eq!(store.get(&keys::highest_received_seq("peer-b")).unwrap(), Some(keys::encode_u64(1)));
    }

    #[test]
    fn gc_notifications_are_cross_wired() {
        let mut store = MemoryStore::default();
        let mut handle = new_handle(&mut store);
        let mut objects = FakeObjects::new();
        let mut queue = FakeQueue::default();
        let identity = KernelIdentity::generate();

        for (seq, payload) in [
            (1, DeliverPayload::DropExports(vec!["a".to_owned()])),
            (2, DeliverPayload::RetireExports(vec!["b".to_owned()])),
            (3, DeliverPayload::RetireImports(vec!["c".to_owned()])),
        ] {
            let frame = wire::encode_command(seq, None, Method::Deliver, &payload.to_value());
            handle.handle_remote_message(&mut store, &mut objects, &mut queue, &identity, &frame).unwrap();
        }

        assert_eq!(queue.dropped_imports, vec![("peer-b".to_owned(), vec!["a".to_owned()])]);
        assert_eq!(queue.retired_imports, vec![("peer-b".to_owned(), vec!["b".to_owned()])], "incoming retireExports must retire imports");
        assert_eq!(queue.retired_exports, vec![("peer-b".to_owned(), vec!["c".to_owned()])], "incoming retireImports must retire (clean up) exports");
    }

    #[test]
    fn send_internal_enforces_capacity_for_every_outgoing_path() {
        let mut store = MemoryStore::default();
        let mut config = RemoteConfig::default();
        config.max_queue_depth = 1;
        let mut handle = RemoteHandle::load("peer-b", config, RecordingFrameSender::default(), &mut store).unwrap();
        handle.deliver_message(&mut store, &DeliverPayload::DropExports(vec![])).unwrap();

        let url = OcapUrl::new("oid".to_owned(), "peer-b".to_owned(), vec![]);
        let error = handle.redeem_url(&mut store, &url).unwrap_err();
        assert!(matches!(error, RemoteError::QueueFull { .. }));
    }

    #[test]
    fn redeem_url_reply_respects_capacity_inside_the_receive_transaction() {
        let mut store = MemoryStore::default();
        let mut config = RemoteConfig::default();
        config.max_queue_depth = 1;
        let mut handle = RemoteHandle::load("peer-b", config, RecordingFrameSender::default(), &mut store).unwrap();
        handle.deliver_message(&mut store, &DeliverPayload::DropExports(vec![])).unwrap();

        let mut objects = FakeObjects::new();
        let mut queue = FakeQueue::default();
        let identity = KernelIdentity::generate();
        let params = RedeemUrlParams {
            reply_key: "0".to_owned(),
            url: remote_comms::issue_ocap_url("k-object", &identity, &[]),
        };
        let frame = wire::encode_command(1, None, Method::RedeemUrl, &serde_json::to_value(&params).unwrap());

        let error = handle
            .handle_remote_message(&mut store, &mut objects, &mut queue, &identity, &frame)
            .unwrap_err();
        assert!(matches!(error, RemoteError::QueueFull { .. }));
        assert_eq!(store.get(&keys::highest_received_seq("peer-b")).unwrap(), None, "a rejected redeemURLReply must roll back the whole receive");
    }

    #[test]
    fn first_send_registers_location_hints_once() {
        let mut store = MemoryStore::default();
        let mut config = RemoteConfig::default();
        config.location_hints = vec!["127.0.0.1:9000".to_owned()];
        let mut handle = RemoteHandle::load("peer-b", config, RecordingFrameSender::default(), &mut store).unwrap();

        handle.deliver_message(&mut store, &DeliverPayload::DropExports(vec![])).unwrap();
        handle.deliver_message(&mut store, &DeliverPayload::DropExports(vec![])).unwrap();

        let registrations = handle.frame_sender.take_hint_registrations();
        assert_eq!(registrations.len(), 1, "registerLocationHints must fire exactly once");
        assert_eq!(registrations[0].1, vec!["127.0.0.1:9000".to_owned()]);
    }

    #[test]
    fn cleanup_rejects_pending_redemptions_but_keeps_durable_state() {
        let mut store = MemoryStore::default();
        let mut handle = new_handle(&mut store);
        handle.deliver_message(&mut store, &DeliverPayload::DropExports(vec![])).unwrap();
        let url = OcapUrl::new("oid".to_owned(), "peer-b".to_owned(), vec![]);
        handle.redeem_url(&mut store, &url).unwrap();

        let events = handle.cleanup();
        assert_eq!(events.len(), 1);
        match &events[0] {
            RemoteEvent::RedemptionResolved { result, .. } => assert!(result.is_err()),
        }
        assert_eq!(handle.pending_depth(), 1, "cleanup must not touch the durable pending queue");
        assert!(store.get(&keys::pending_message("peer-b", 1)).unwrap().is_some());
    }

    #[test]
    fn deliver_bring_out_your_dead_is_a_no_op() {
        let mut store = MemoryStore::default();
        let handle = new_handle(&mut store);
        handle.deliver_bring_out_your_dead();
    }
}
