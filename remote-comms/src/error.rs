//! Error types for URL parsing, identity derivation and the issue/redeem
//! codec. The two fixed message strings here (`ocapURL has bad object
//! reference` / `ocapURL from a host that's not me`) are part of the wire
//! protocol's logging contract and must not be reworded.

use thiserror::Error;

/// Failure parsing an `ocap:` URL.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum UrlParseError {
    /// The URL did not start with the `ocap:` scheme.
    #[error("not an ocap: URL")]
    WrongScheme,
    /// The URL contained zero or more than one `@`.
    #[error("ocap URL must contain exactly one '@'")]
    WrongAtCount,
    /// The object-id portion (before `@`) was empty.
    #[error("ocap URL object reference is empty")]
    EmptyOid,
    /// The host/hints portion (after `@`) was empty, or one of its
    /// comma-separated entries was empty.
    #[error("ocap URL host or a hint is empty")]
    EmptyHostOrHint,
}

/// Failure deriving or loading kernel identity material.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// A mnemonic was supplied for a kernel that already has persisted
    /// identity state. Re-seeding over existing state would silently
    /// invalidate every OcapURL already issued, so this is rejected
    /// rather than applied.
    #[error("refusing to apply a mnemonic: this kernel already has identity state")]
    MnemonicWithExistingState,
    /// The supplied mnemonic phrase was not valid BIP-39.
    #[error("invalid mnemonic: {0}")]
    InvalidMnemonic(#[from] bip39::Error),
    /// Persisted seed material was the wrong length to be a key seed.
    #[error("corrupt identity seed: expected 32 bytes, got {0}")]
    BadSeedLength(usize),
}

/// Failure issuing or redeeming a capability URL.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// `redeemLocalOcapURL` was called with a URL whose host isn't this
    /// kernel's own `PeerId`.
    #[error("ocapURL from a host that's not me")]
    NotMe,
    /// Decryption of the object-id ciphertext failed, or the ciphertext
    /// was too short to contain a nonce.
    #[error("ocapURL has bad object reference")]
    BadReference,
    /// The URL itself didn't parse.
    #[error(transparent)]
    Parse(#[from] UrlParseError),
}
