//! The persisted key layout named in spec §6: opaque string keys into a
//! KV store, scoped per `RemoteId`, plus a handful of kernel-identity
//! keys that aren't remote-scoped.

/// `pending.<remote_id>.<seq>` -> frame bytes.
#[must_use]
pub fn pending_message(remote_id: &str, seq: u64) -> String {
    format!("pending.{remote_id}.{seq}")
}

/// `seq.<remote_id>.nextSend` -> integer as string.
#[must_use]
pub fn next_send_seq(remote_id: &str) -> String {
    format!("seq.{remote_id}.nextSend")
}

/// `seq.<remote_id>.startSeq` -> integer as string.
#[must_use]
pub fn start_seq(remote_id: &str) -> String {
    format!("seq.{remote_id}.startSeq")
}

/// `seq.<remote_id>.highestReceived` -> integer as string.
#[must_use]
pub fn highest_received_seq(remote_id: &str) -> String {
    format!("seq.{remote_id}.highestReceived")
}

/// Durable per-kernel identity seed (drives both the Ed25519 `PeerId` and
/// the capability-URL symmetric key, see `remote-comms`).
pub const KEY_SEED: &str = "keySeed";

/// This kernel's own canonical `PeerId` string, cached alongside
/// `keySeed` so it needn't be recomputed from the seed on every startup.
pub const PEER_ID: &str = "peerId";

/// JSON-encoded list of transport hints this kernel is reachable at.
pub const KNOWN_RELAYS: &str = "knownRelays";

/// Encode a `u64` the way spec §6 prescribes: "integers as strings".
#[must_use]
pub fn encode_u64(value: u64) -> Vec<u8> {
    value.to_string().into_bytes()
}

/// Decode a value previously written by [`encode_u64`].
///
/// # Errors
/// Returns [`crate::StoreError::CorruptSequenceNumber`] if `bytes` isn't
/// valid UTF-8 decimal.
pub fn decode_u64(key: &str, bytes: &[u8]) -> Result<u64, crate::StoreError> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|text| text.parse::<u64>().ok())
        .ok_or_else(|| crate::StoreError::CorruptSequenceNumber {
            key: key.to_owned(),
            value: bytes.to_vec(),
        })
}

/// Strip the `pending.<remote_id>.` prefix from a key and parse the
/// trailing seq, used by crash-recovery scans that enumerate pending
/// messages for a remote.
#[must_use]
pub fn parse_pending_seq(remote_id: &str, key: &str) -> Option<u64> {
    let prefix = format!("pending.{remote_id}.");
    key.strip_prefix(&prefix)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_u64() {
        let encoded = encode_u64(42);
        assert_eq!(decode_u64("k", &encoded).unwrap(), 42);
    }

    #[test]
    fn parses_pending_seq() {
        let key = pending_message("r1", 7);
        assert_eq!(parse_pending_seq("r1", &key), Some(7));
        assert_eq!(parse_pending_seq("r2", &key), None);
    }
}
