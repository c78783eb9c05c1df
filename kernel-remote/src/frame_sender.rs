//! The one place `RemoteHandle`'s otherwise-synchronous protocol logic
//! touches async I/O. Spec §4.1.1 step 8 is explicit that the transport
//! send is fire-and-forget — the caller does not await it, and a failed
//! send is not itself an error, just a message that stays queued for
//! retransmission. [`FrameSender`] is the narrow seam that lets
//! `RemoteHandle` stay a plain, synchronously-testable state machine
//! while still handing frames off to a real async transport.

use reconnect::PeerId;

/// Hands a single already-encoded frame off to the transport, without
/// blocking the caller on the outcome.
pub trait FrameSender {
    /// Send `frame` to `peer_id`. Implementations must not block; a
    /// failed send is logged and otherwise silently dropped; the
    /// message stays in `RemoteHandle`'s pending queue and is retried on
    /// the next ack-timeout tick.
    fn send_frame(&self, peer_id: &PeerId, frame: Vec<u8>);

    /// Fire-and-forget `registerLocationHints` (spec §4.1.1 step 1),
    /// issued once per `RemoteHandle` on its first outgoing send.
    /// Default no-op; implementations backed by a real transport should
    /// forward it.
    fn register_location_hints(&self, _peer_id: &PeerId, _hints: &[String]) {}
}

/// [`FrameSender`] backed by a real [`kernel_transport::Transport`].
#[derive(Clone)]
pub struct TransportFrameSender {
    transport: kernel_transport::Transport,
}

impl TransportFrameSender {
    /// Wrap a transport handle.
    #[must_use]
    pub fn new(transport: kernel_transport::Transport) -> Self {
        Self { transport }
    }
}

impl FrameSender for TransportFrameSender {
    fn send_frame(&self, peer_id: &PeerId, frame: Vec<u8>) {
        let transport = self.transport.clone();
        let peer_id = peer_id.clone();
        tokio::spawn(async move {
            if let Err(error) = transport.send_remote_message(&peer_id, frame.into()).await {
                log::debug!("{peer_id}:: send queued for retransmission after transport error: {error}");
            }
        });
    }

    fn register_location_hints(&self, peer_id: &PeerId, hints: &[String]) {
        if hints.is_empty() {
            return;
        }
        let transport = self.transport.clone();
        let peer_id = peer_id.clone();
        let hints = hints.to_vec();
        tokio::spawn(async move {
            transport.register_location_hints(&peer_id, hints).await;
        });
    }
}

#[cfg(test)]
pub mod test_support {
    use std::cell::RefCell;

    use super::FrameSender;
    use reconnect::PeerId;

    /// A synchronous [`FrameSender`] double that records every frame
    /// handed to it, for deterministic unit tests of `RemoteHandle`.
    #[derive(Default)]
    pub struct RecordingFrameSender {
        sent: RefCell<Vec<(PeerId, Vec<u8>)>>,
        hints: RefCell<Vec<(PeerId, Vec<String>)>>,
    }

    impl RecordingFrameSender {
        /// Drain every frame recorded so far.
        pub fn take_sent(&self) -> Vec<(PeerId, Vec<u8>)> {
            self.sent.borrow_mut().drain(..).collect()
        }

        /// Drain every `registerLocationHints` call recorded so far.
        pub fn take_hint_registrations(&self) -> Vec<(PeerId, Vec<String>)> {
            self.hints.borrow_mut().drain(..).collect()
        }
    }

    impl FrameSender for RecordingFrameSender {
        fn send_frame(&self, peer_id: &PeerId, frame: Vec<u8>) {
            self.sent.borrow_mut().push((peer_id.clone(), frame));
        }

        fn register_location_hints(&self, peer_id: &PeerId, hints: &[String]) {
            self.hints.borrow_mut().push((peer_id.clone(), hints.to_vec()));
        }
    }
}
