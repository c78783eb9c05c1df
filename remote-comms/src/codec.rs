//! Issue and redeem capability URLs (spec §4.5).
//!
//! `redeemOcapURL` at a third party — the case where the holder isn't the
//! issuing kernel — is not implemented here: it requires sending a
//! `redeemURL` request over a `RemoteHandle` and is implemented by
//! `kernel-remote`, which depends on this crate only for URL parsing.

use chacha20poly1305::AeadCore;
use chacha20poly1305::AeadInPlace;
use chacha20poly1305::ChaCha20Poly1305;
use chacha20poly1305::Key;
use chacha20poly1305::KeyInit;
use chacha20poly1305::Nonce;
use rand::rngs::OsRng;

use crate::error::CodecError;
use crate::identity::KernelIdentity;
use crate::url::OcapUrl;

const NONCE_LEN: usize = 12;

/// Encrypt `kref` under `identity`'s oid key and return the full `ocap:`
/// URL, with `host` set to `identity`'s own `PeerId` and the given
/// transport hints appended.
#[must_use]
pub fn issue_ocap_url(kref: &str, identity: &KernelIdentity, hints: &[String]) -> String {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(identity.oid_key()));
    let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);

    let mut buffer = kref.as_bytes().to_vec();
    #[expect(
        clippy::expect_used,
        reason = "ChaCha20Poly1305 encryption only fails on plaintext/AAD length limits vastly \
                  larger than any kref this kernel would ever issue"
    )]
    cipher
        .encrypt_in_place(&nonce, b"", &mut buffer)
        .expect("kref is far below the cipher's plaintext size limit");

    let mut payload = Vec::with_capacity(NONCE_LEN + buffer.len());
    payload.extend_from_slice(&nonce);
    payload.extend_from_slice(&buffer);

    let oid = bs58::encode(payload).into_string();
    let url = OcapUrl::new(oid, identity.peer_id(), hints.to_vec());
    url.to_url_string()
}

/// Parse `url`, verify its host is `identity`'s own `PeerId`, and decrypt
/// the enclosed kref. Fails with the exact messages named in spec §4.5:
/// `"ocapURL from a host that's not me"` on host mismatch, or
/// `"ocapURL has bad object reference"` on any decode/decrypt failure.
pub fn redeem_local_ocap_url(url: &str, identity: &KernelIdentity) -> Result<String, CodecError> {
    let parsed = OcapUrl::parse(url)?;
    if parsed.host != identity.peer_id() {
        return Err(CodecError::NotMe);
    }

    let payload = bs58::decode(&parsed.oid)
        .into_vec()
        .map_err(|_decode_error| CodecError::BadReference)?;
    if payload.len() < NONCE_LEN {
        return Err(CodecError::BadReference);
    }
    let (nonce_bytes, ciphertext) = payload.split_at(NONCE_LEN);
    let nonce = Nonce::from_slice(nonce_bytes);

    let cipher = ChaCha20Poly1305::new(Key::from_slice(identity.oid_key()));
    let mut buffer = ciphertext.to_vec();
    cipher
        .decrypt_in_place(nonce, b"", &mut buffer)
        .map_err(|_decrypt_error| CodecError::BadReference)?;

    String::from_utf8(buffer).map_err(|_utf8_error| CodecError::BadReference)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_then_redeem_round_trips() {
        let identity = KernelIdentity::generate();
        for kref in ["", "o+1", "a very long kernel reference ".repeat(20).as_str(), "emoji-🎉-kref"] {
            let url = issue_ocap_url(kref, &identity, &[]);
            let redeemed = redeem_local_ocap_url(&url, &identity).unwrap();
            assert_eq!(redeemed, kref);
        }
    }

    #[test]
    fn redeem_rejects_foreign_host() {
        let issuer = KernelIdentity::generate();
        let other = KernelIdentity::generate();
        let url = issue_ocap_url("o+1", &issuer, &[]);
        let err = redeem_local_ocap_url(&url, &other).unwrap_err();
        assert_eq!(err, CodecError::NotMe);
    }

    #[test]
    fn redeem_rejects_tampered_ciphertext() {
        let identity = KernelIdentity::generate();
        let url = issue_ocap_url("o+1", &identity, &[]);
        let mut parsed = OcapUrl::parse(&url).unwrap();
        // flip a character in the oid to corrupt the ciphertext
        let mut oid_chars: Vec<char> = parsed.oid.chars().collect();
        let last = oid_chars.len() - 1;
        oid_chars[last] = if oid_chars[last] == 'a' { 'b' } else { 'a' };
        parsed.oid = oid_chars.into_iter().collect();
        let tampered = parsed.to_url_string();
        let err = redeem_local_ocap_url(&tampered, &identity).unwrap_err();
        assert_eq!(err, CodecError::BadReference);
    }

    #[test]
    fn issued_url_carries_hints() {
        let identity = KernelIdentity::generate();
        let hints = vec!["tcp://1.2.3.4:9000".to_owned(), "tcp://[::1]:9000".to_owned()];
        let url = issue_ocap_url("o+1", &identity, &hints);
        let parsed = OcapUrl::parse(&url).unwrap();
        assert_eq!(parsed.hints, hints);
    }
}
