//! Capability URL codec: authenticated, encrypted encoding of cross-kernel
//! object references (spec §4.5).
//!
//! An `ocap:` URL is `ocap:<oid>@<host>[,<hint>]*`. `<oid>` is opaque
//! ciphertext produced by [`codec::issue_ocap_url`] and only decodable by
//! the issuing kernel via [`codec::redeem_local_ocap_url`]; `<host>` is
//! the issuer's [`identity::KernelIdentity::peer_id`].
//!
//! Redeeming a URL issued by someone else (`redeemOcapURL` at a third
//! party, spec §4.1/§4.5) requires round-tripping through that peer's
//! `RemoteHandle` and lives in `kernel-remote`, which uses
//! [`url::OcapUrl::parse`] from this crate.

pub mod codec;
pub mod error;
pub mod identity;
pub mod url;

pub use codec::issue_ocap_url;
pub use codec::redeem_local_ocap_url;
pub use error::CodecError;
pub use error::IdentityError;
pub use error::UrlParseError;
pub use identity::KernelIdentity;
pub use url::OcapUrl;
