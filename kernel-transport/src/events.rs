//! Events the transport surfaces to its owner (kernel glue, out of
//! scope): incoming application frames, and the two callbacks spec §4.2
//! and §4.3 name (`onGiveUp`, `onIncarnationChange`).

use bytes::Bytes;

use reconnect::PeerId;

/// One item produced by [`crate::Transport::recv`].
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// An application frame arrived on a peer's channel, handshake
    /// already stripped. Forward verbatim to that peer's `RemoteHandle`.
    Frame {
        /// Which peer sent it.
        peer_id: PeerId,
        /// The raw JSON frame bytes.
        frame: Bytes,
    },
    /// A channel to this peer was newly established (outbound dial
    /// success or inbound accept), after handshake completed.
    Connected {
        /// The peer now reachable.
        peer_id: PeerId,
    },
    /// The remote's incarnation differs from the last one observed for
    /// this `PeerId`; the owner should discard per-remote state that
    /// assumed continuity (e.g. in-flight kernel promises).
    IncarnationChanged {
        /// The peer that restarted.
        peer_id: PeerId,
    },
    /// Reconnection was exhausted or hit a non-retryable error; the
    /// owner should reject anything waiting on this peer.
    GaveUp {
        /// The peer that's no longer being retried.
        peer_id: PeerId,
    },
}
