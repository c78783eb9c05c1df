//! Parsing and formatting of `ocap:` capability URLs.
//!
//! Wire format (spec §4.5 / §6): `ocap:<oid>@<host>[,<hint>]*`. `oid` is
//! opaque ciphertext to every holder but the issuer; `host` is the
//! issuer's `PeerId` in canonical string form; `hint`s are transport
//! addresses the holder may use to reach that host.

use crate::error::UrlParseError;

const SCHEME: &str = "ocap:";

/// A parsed `ocap:` URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OcapUrl {
    /// Ciphertext object id, opaque to everyone but the issuing kernel.
    pub oid: String,
    /// Canonical `PeerId` string of the issuing kernel.
    pub host: String,
    /// Transport address hints for reaching `host`.
    pub hints: Vec<String>,
}

impl OcapUrl {
    /// Construct directly from parts, without parsing.
    #[must_use]
    pub fn new(oid: String, host: String, hints: Vec<String>) -> Self {
        Self { oid, host, hints }
    }

    /// Parse a textual `ocap:` URL, applying the exact rejection rules
    /// from spec §4.5/§8: wrong scheme, `@` count != 1, empty oid, empty
    /// host, or any empty hint.
    pub fn parse(text: &str) -> Result<Self, UrlParseError> {
        let rest = text.strip_prefix(SCHEME).ok_or(UrlParseError::WrongScheme)?;

        let mut at_positions = rest.match_indices('@');
        let Some((at_index, _)) = at_positions.next() else {
            return Err(UrlParseError::WrongAtCount);
        };
        if at_positions.next().is_some() {
            return Err(UrlParseError::WrongAtCount);
        }

        let oid = &rest[..at_index];
        let host_and_hints = &rest[at_index + 1..];
        if oid.is_empty() {
            return Err(UrlParseError::EmptyOid);
        }
        if host_and_hints.is_empty() {
            return Err(UrlParseError::EmptyHostOrHint);
        }

        let mut parts = host_and_hints.split(',');
        // Presence checked above via `host_and_hints.is_empty()`, so the
        // first `split` item always exists.
        let host = parts.next().unwrap_or_default();
        if host.is_empty() {
            return Err(UrlParseError::EmptyHostOrHint);
        }
        let hints = parts
            .map(|hint| {
                if hint.is_empty() {
                    Err(UrlParseError::EmptyHostOrHint)
                } else {
                    Ok(hint.to_owned())
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            oid: oid.to_owned(),
            host: host.to_owned(),
            hints,
        })
    }

    /// Render back to the textual `ocap:` form. Round-trips with `parse`
    /// for any value that `parse` would have accepted (spec testable
    /// property 7).
    #[must_use]
    pub fn to_url_string(&self) -> String {
        let mut url = format!("{SCHEME}{}@{}", self.oid, self.host);
        for hint in &self.hints {
            url.push(',');
            url.push_str(hint);
        }
        url
    }
}

impl std::fmt::Display for OcapUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_url_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_without_hints() {
        let url = OcapUrl::parse("ocap:abc123@peerXYZ").unwrap();
        assert_eq!(url.oid, "abc123");
        assert_eq!(url.host, "peerXYZ");
        assert!(url.hints.is_empty());
    }

    #[test]
    fn parses_with_hints() {
        let url = OcapUrl::parse("ocap:abc123@peerXYZ,tcp://1.2.3.4:9000,tcp://[::1]:9000").unwrap();
        assert_eq!(url.hints, vec!["tcp://1.2.3.4:9000", "tcp://[::1]:9000"]);
    }

    #[test]
    fn rejects_wrong_scheme() {
        assert_eq!(OcapUrl::parse("http://abc@x"), Err(UrlParseError::WrongScheme));
    }

    #[test]
    fn rejects_zero_or_multiple_at() {
        assert_eq!(OcapUrl::parse("ocap:abc123peerXYZ"), Err(UrlParseError::WrongAtCount));
        assert_eq!(
            OcapUrl::parse("ocap:abc@123@peerXYZ"),
            Err(UrlParseError::WrongAtCount)
        );
    }

    #[test]
    fn rejects_empty_oid_or_host() {
        assert_eq!(OcapUrl::parse("ocap:@peerXYZ"), Err(UrlParseError::EmptyOid));
        assert_eq!(OcapUrl::parse("ocap:abc123@"), Err(UrlParseError::EmptyHostOrHint));
    }

    #[test]
    fn rejects_empty_hint_entries() {
        assert_eq!(
            OcapUrl::parse("ocap:abc123@peerXYZ,,tcp://x"),
            Err(UrlParseError::EmptyHostOrHint)
        );
        assert_eq!(
            OcapUrl::parse("ocap:abc123@peerXYZ,tcp://x,"),
            Err(UrlParseError::EmptyHostOrHint)
        );
    }

    #[test]
    fn round_trips_regardless_of_hint_count() {
        for url_text in [
            "ocap:abc@host",
            "ocap:abc@host,hint1",
            "ocap:abc@host,hint1,hint2,hint3",
        ] {
            let parsed = OcapUrl::parse(url_text).unwrap();
            assert_eq!(parsed.to_url_string(), url_text);
        }
    }
}
