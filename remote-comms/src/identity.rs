//! Per-kernel durable identity: the Ed25519 signing key whose public part
//! is encoded as the kernel's `PeerId`, and the ChaCha20-Poly1305 key used
//! to encrypt `oid`s issued by [`crate::codec`].
//!
//! Spec §9: "The symmetric key used for `oid` encryption must be bound to
//! the kernel's identity for life; rotating it invalidates all
//! outstanding OcapURLs." Both keys are therefore derived from a single
//! 32-byte seed, either supplied (persisted from a previous run),
//! deterministically derived from a BIP-39 mnemonic, or freshly
//! generated — never independently rotated.

use ed25519_dalek::SigningKey;
use ed25519_dalek::VerifyingKey;
use hkdf::Hkdf;
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::Sha256;
use zeroize::Zeroize;
use zeroize::Zeroizing;

use crate::error::IdentityError;

const SIGNING_KEY_INFO: &[u8] = b"remote-comms/v1/ed25519-signing-key";
const OID_KEY_INFO: &[u8] = b"remote-comms/v1/chacha20poly1305-oid-key";

/// Durable per-kernel identity material.
pub struct KernelIdentity {
    signing_key: SigningKey,
    oid_key: [u8; 32],
    /// The 32-byte seed this identity was derived from. Callers persist
    /// this verbatim as `keySeed` (spec §6) so the identity can be
    /// reconstructed on restart without re-deriving from a mnemonic.
    seed: Zeroizing<[u8; 32]>,
}

impl KernelIdentity {
    fn from_seed(seed: [u8; 32]) -> Self {
        let hk = Hkdf::<Sha256>::new(None, &seed);

        let mut signing_key_bytes = Zeroizing::new([0_u8; 32]);
        // `Hkdf::expand` only fails if the requested output length exceeds
        // 255 * hash output length; 32 bytes never does for SHA-256.
        hk.expand(SIGNING_KEY_INFO, signing_key_bytes.as_mut())
            .unwrap_or_else(|_| unreachable!("32-byte HKDF expand cannot fail"));

        let mut oid_key = [0_u8; 32];
        hk.expand(OID_KEY_INFO, &mut oid_key)
            .unwrap_or_else(|_| unreachable!("32-byte HKDF expand cannot fail"));

        let signing_key = SigningKey::from_bytes(&signing_key_bytes);

        Self {
            signing_key,
            oid_key,
            seed: Zeroizing::new(seed),
        }
    }

    /// Generate a fresh random identity.
    #[must_use]
    pub fn generate() -> Self {
        let mut seed = [0_u8; 32];
        OsRng.fill_bytes(&mut seed);
        Self::from_seed(seed)
    }

    /// Deterministically derive identity from a BIP-39 mnemonic phrase
    /// (no passphrase).
    pub fn from_mnemonic(phrase: &str) -> Result<Self, IdentityError> {
        let mnemonic = bip39::Mnemonic::parse_normalized(phrase)?;
        let mut full_seed = mnemonic.to_seed_normalized("");
        let mut seed = [0_u8; 32];
        seed.copy_from_slice(&full_seed[..32]);
        full_seed.zeroize();
        Ok(Self::from_seed(seed))
    }

    /// Reconstruct identity from a previously persisted 32-byte seed.
    pub fn from_persisted_seed(seed_bytes: &[u8]) -> Result<Self, IdentityError> {
        if seed_bytes.len() != 32 {
            return Err(IdentityError::BadSeedLength(seed_bytes.len()));
        }
        let mut seed = [0_u8; 32];
        seed.copy_from_slice(seed_bytes);
        Ok(Self::from_seed(seed))
    }

    /// Initialize identity at kernel startup. If `existing_seed` is
    /// `Some`, this kernel already has durable state and takes priority;
    /// supplying a `mnemonic` in that case is an operator error (spec
    /// §9) and fails loudly rather than silently ignoring the mnemonic
    /// or silently re-seeding over existing state.
    pub fn init(
        existing_seed: Option<&[u8]>,
        mnemonic: Option<&str>,
    ) -> Result<Self, IdentityError> {
        match (existing_seed, mnemonic) {
            (Some(_), Some(_)) => Err(IdentityError::MnemonicWithExistingState),
            (Some(seed), None) => Self::from_persisted_seed(seed),
            (None, Some(phrase)) => Self::from_mnemonic(phrase),
            (None, None) => Ok(Self::generate()),
        }
    }

    /// The 32-byte seed backing this identity, for persistence as
    /// `keySeed`.
    #[must_use]
    pub fn seed_bytes(&self) -> [u8; 32] {
        *self.seed
    }

    /// This kernel's durable `PeerId`: the base58btc encoding of the
    /// Ed25519 verifying key.
    #[must_use]
    pub fn peer_id(&self) -> String {
        bs58::encode(self.signing_key.verifying_key().as_bytes()).into_string()
    }

    #[must_use]
    pub(crate) fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    #[must_use]
    pub(crate) fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    #[must_use]
    pub(crate) fn oid_key(&self) -> &[u8; 32] {
        &self.oid_key
    }
}
