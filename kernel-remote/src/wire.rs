//! The wire frame shapes named in spec §3/§6: `RemoteCommand`,
//! `StandaloneAck`, and the tagged-tuple `deliver` payloads. Parsed from
//! loosely-typed JSON (rather than a fully derived `serde` enum) because
//! a `RemoteCommand`'s `params` shape depends on its `method` string, and
//! a frame carrying only `{ack}` must parse as a [`StandaloneAck`]
//! instead of failing `RemoteCommand` validation.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;

use crate::error::RemoteError;

/// The three application-level methods a `RemoteCommand` may carry.
/// Anything else on the wire is a fatal protocol error (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// A GC/method/promise-resolution delivery.
    Deliver,
    /// A request to decrypt a capability URL's `oid`.
    RedeemUrl,
    /// The matching reply to a previously-received `redeemURL`.
    RedeemUrlReply,
}

impl Method {
    fn as_str(self) -> &'static str {
        match self {
            Self::Deliver => "deliver",
            Self::RedeemUrl => "redeemURL",
            Self::RedeemUrlReply => "redeemURLReply",
        }
    }

    fn parse(text: &str) -> Option<Self> {
        match text {
            "deliver" => Some(Self::Deliver),
            "redeemURL" => Some(Self::RedeemUrl),
            "redeemURLReply" => Some(Self::RedeemUrlReply),
            _ => None,
        }
    }
}

/// A parsed `deliver` payload: discriminator in tuple position 0 (spec
/// §3).
#[derive(Debug, Clone, PartialEq)]
pub enum DeliverPayload {
    /// `['message', target, {methargs, result}]`.
    Message {
        /// The endpoint-scoped reference the method is sent to.
        target: String,
        /// Serialized call arguments.
        methargs: Value,
        /// `ERef` of the promise for the call's result, if any.
        result: Option<String>,
    },
    /// `['notify', [[promiseERef, rejected, CapData], ...]]`.
    Notify(Vec<(String, bool, Value)>),
    /// `['dropExports', erefs]`.
    DropExports(Vec<String>),
    /// `['retireExports', erefs]`.
    RetireExports(Vec<String>),
    /// `['retireImports', erefs]`.
    RetireImports(Vec<String>),
}

impl DeliverPayload {
    /// Parse a `deliver` frame's `params` tagged-tuple.
    ///
    /// # Errors
    /// Returns [`RemoteError::Protocol`] if `params` isn't a non-empty
    /// array, the discriminator is unrecognized, or the shape for that
    /// discriminator doesn't match.
    pub fn parse(params: &Value) -> Result<Self, RemoteError> {
        let array = params.as_array().ok_or_else(|| RemoteError::Protocol("deliver params must be an array".to_owned()))?;
        let tag = array
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| RemoteError::Protocol("deliver params missing discriminator".to_owned()))?;
        match tag {
            "message" => {
                let target = array
                    .get(1)
                    .and_then(Value::as_str)
                    .ok_or_else(|| RemoteError::Protocol("message: missing target".to_owned()))?
                    .to_owned();
                let body = array.get(2).ok_or_else(|| RemoteError::Protocol("message: missing body".to_owned()))?;
                let methargs = body.get("methargs").cloned().unwrap_or(Value::Null);
                let result = body.get("result").and_then(Value::as_str).map(str::to_owned);
                Ok(Self::Message { target, methargs, result })
            }
            "notify" => {
                let entries = array
                    .get(1)
                    .and_then(Value::as_array)
                    .ok_or_else(|| RemoteError::Protocol("notify: missing resolutions".to_owned()))?;
                let mut resolutions = Vec::with_capacity(entries.len());
                for entry in entries {
                    let tuple = entry.as_array().ok_or_else(|| RemoteError::Protocol("notify: malformed entry".to_owned()))?;
                    let eref = tuple
                        .first()
                        .and_then(Value::as_str)
                        .ok_or_else(|| RemoteError::Protocol("notify: missing promise eref".to_owned()))?
                        .to_owned();
                    let rejected = tuple.get(1).and_then(Value::as_bool).unwrap_or(false);
                    let cap_data = tuple.get(2).cloned().unwrap_or(Value::Null);
                    resolutions.push((eref, rejected, cap_data));
                }
                Ok(Self::Notify(resolutions))
            }
            "dropExports" => Ok(Self::DropExports(parse_eref_list(array)?)),
            "retireExports" => Ok(Self::RetireExports(parse_eref_list(array)?)),
            "retireImports" => Ok(Self::RetireImports(parse_eref_list(array)?)),
            other => Err(RemoteError::Protocol(format!("unknown deliver discriminator {other:?}"))),
        }
    }

    /// Render back to the tagged-tuple JSON shape.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Message { target, methargs, result } => json!(["message", target, {"methargs": methargs, "result": result}]),
            Self::Notify(resolutions) => {
                let entries: Vec<Value> = resolutions
                    .iter()
                    .map(|(eref, rejected, cap_data)| json!([eref, rejected, cap_data]))
                    .collect();
                json!(["notify", entries])
            }
            Self::DropExports(erefs) => json!(["dropExports", erefs]),
            Self::RetireExports(erefs) => json!(["retireExports", erefs]),
            Self::RetireImports(erefs) => json!(["retireImports", erefs]),
        }
    }
}

fn parse_eref_list(array: &[Value]) -> Result<Vec<String>, RemoteError> {
    let entries = array.get(1).and_then(Value::as_array).ok_or_else(|| RemoteError::Protocol("missing eref list".to_owned()))?;
    entries
        .iter()
        .map(|entry| entry.as_str().map(str::to_owned).ok_or_else(|| RemoteError::Protocol("eref list entry not a string".to_owned())))
        .collect()
}

/// A fully-parsed incoming frame.
#[derive(Debug, Clone)]
pub enum IncomingFrame {
    /// `{ack}` only, no `seq`/`method`/`params`.
    StandaloneAck {
        /// The cumulative ack value.
        ack: u64,
    },
    /// A full `RemoteCommand`.
    Command {
        /// Monotone per-sender sequence number.
        seq: u64,
        /// Optional piggybacked cumulative ack.
        ack: Option<u64>,
        /// Which application method this is.
        method: Method,
        /// The method's raw `params`, not yet shape-validated.
        params: Value,
    },
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    seq: Option<Value>,
    ack: Option<Value>,
    method: Option<String>,
    #[serde(default)]
    params: Value,
}

/// Parse a raw JSON frame (spec §4.1.3 steps 1-6).
///
/// # Errors
/// Returns [`RemoteError::Protocol`] if the bytes aren't a JSON object,
/// if a `RemoteCommand` is missing `seq`/`method`, if `seq` isn't an
/// integer `>= 1`, or if `method` isn't one of the three recognized
/// strings.
pub fn parse_incoming(bytes: &[u8]) -> Result<IncomingFrame, RemoteError> {
    let raw: RawFrame = serde_json::from_slice(bytes).map_err(|error| RemoteError::Protocol(format!("malformed JSON frame: {error}")))?;

    if raw.method.is_none() && raw.seq.is_none() {
        let ack = parse_required_seq_like(raw.ack, "ack")?;
        return Ok(IncomingFrame::StandaloneAck { ack });
    }

    let seq = parse_required_seq_like(raw.seq, "seq")?;
    let ack = match raw.ack {
        Some(value) => Some(parse_required_seq_like(Some(value), "ack")?),
        None => None,
    };
    let method_text = raw.method.ok_or_else(|| RemoteError::Protocol("frame with seq but no method".to_owned()))?;
    let method = Method::parse(&method_text).ok_or_else(|| RemoteError::Protocol(format!("unknown method {method_text:?}")))?;

    Ok(IncomingFrame::Command {
        seq,
        ack,
        method,
        params: raw.params,
    })
}

fn parse_required_seq_like(value: Option<Value>, field: &str) -> Result<u64, RemoteError> {
    let value = value.ok_or_else(|| RemoteError::Protocol(format!("missing {field}")))?;
    let number = value.as_u64().ok_or_else(|| RemoteError::Protocol(format!("{field} must be a non-negative integer")))?;
    if number < 1 {
        return Err(RemoteError::Protocol(format!("{field} must be >= 1")));
    }
    Ok(number)
}

/// Serialize a `RemoteCommand` frame for the wire.
#[must_use]
pub fn encode_command(seq: u64, ack: Option<u64>, method: Method, params: &Value) -> Vec<u8> {
    let mut object = serde_json::Map::new();
    object.insert("seq".to_owned(), json!(seq));
    if let Some(ack) = ack {
        object.insert("ack".to_owned(), json!(ack));
    }
    object.insert("method".to_owned(), json!(method.as_str()));
    object.insert("params".to_owned(), params.clone());
    serde_json::to_vec(&Value::Object(object)).unwrap_or_default()
}

/// Serialize a standalone `{ack}` frame.
#[must_use]
pub fn encode_standalone_ack(ack: u64) -> Vec<u8> {
    serde_json::to_vec(&json!({ "ack": ack })).unwrap_or_default()
}

/// The `redeemURL` params shape: a correlation key the requester picked
/// (echoed back verbatim in the matching `redeemURLReply`) plus the URL
/// to decrypt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedeemUrlParams {
    /// Requester-chosen key correlating this request to its reply.
    pub reply_key: String,
    /// The `ocap:` URL to decrypt.
    pub url: String,
}

/// The `redeemURLReply` params shape: `[success, replyKey, krefOrError]`.
#[must_use]
pub fn encode_redeem_url_reply(reply_key: &str, result: &Result<String, String>) -> Value {
    match result {
        Ok(kref) => json!([true, reply_key, kref]),
        Err(message) => json!([false, reply_key, message]),
    }
}

/// Parsed `redeemURLReply` params.
#[derive(Debug, Clone)]
pub struct RedeemUrlReply {
    /// Whether redemption succeeded at the issuer.
    pub success: bool,
    /// Which `redeemOcapURL` call this answers.
    pub reply_key: String,
    /// The resolved `KRef` on success, or an error message on failure.
    pub kref_or_error: String,
}

impl RedeemUrlReply {
    /// Parse `[success, replyKey, krefOrError]`.
    ///
    /// # Errors
    /// Returns [`RemoteError::Protocol`] if the shape doesn't match.
    pub fn parse(params: &Value) -> Result<Self, RemoteError> {
        let array = params.as_array().ok_or_else(|| RemoteError::Protocol("redeemURLReply params must be an array".to_owned()))?;
        let success = array.first().and_then(Value::as_bool).ok_or_else(|| RemoteError::Protocol("redeemURLReply: missing success".to_owned()))?;
        let reply_key = array
            .get(1)
            .and_then(Value::as_str)
            .ok_or_else(|| RemoteError::Protocol("redeemURLReply: missing replyKey".to_owned()))?
            .to_owned();
        let kref_or_error = array
            .get(2)
            .and_then(Value::as_str)
            .ok_or_else(|| RemoteError::Protocol("redeemURLReply: missing kref/error".to_owned()))?
            .to_owned();
        Ok(Self { success, reply_key, kref_or_error })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_standalone_ack() {
        let frame = parse_incoming(br#"{"ack":5}"#).unwrap();
        assert!(matches!(frame, IncomingFrame::StandaloneAck { ack: 5 }));
    }

    #[test]
    fn rejects_seq_zero() {
        let error = parse_incoming(br#"{"seq":0,"method":"deliver","params":[]}"#).unwrap_err();
        assert!(matches!(error, RemoteError::Protocol(_)));
    }

    #[test]
    fn rejects_unknown_method() {
        let error = parse_incoming(br#"{"seq":1,"method":"teleport","params":[]}"#).unwrap_err();
        assert!(matches!(error, RemoteError::Protocol(_)));
    }

    #[test]
    fn round_trips_message_payload() {
        let payload = DeliverPayload::Message {
            target: "ro+1".to_owned(),
            methargs: json!({"body": "x", "slots": []}),
            result: Some("rp+1".to_owned()),
        };
        let value = payload.to_value();
        let parsed = DeliverPayload::parse(&value).unwrap();
        assert_eq!(parsed, payload);
    }

    #[test]
    fn round_trips_gc_payload() {
        let payload = DeliverPayload::DropExports(vec!["ro+1".to_owned(), "ro+2".to_owned()]);
        let value = payload.to_value();
        assert_eq!(DeliverPayload::parse(&value).unwrap(), payload);
    }

    #[test]
    fn parses_command_with_piggybacked_ack() {
        let frame = parse_incoming(br#"{"seq":3,"ack":2,"method":"deliver","params":["dropExports",["ro+1"]]}"#).unwrap();
        match frame {
            IncomingFrame::Command { seq, ack, method, params } => {
                assert_eq!(seq, 3);
                assert_eq!(ack, Some(2));
                assert_eq!(method, Method::Deliver);
                assert_eq!(DeliverPayload::parse(&params).unwrap(), DeliverPayload::DropExports(vec!["ro+1".to_owned()]));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn parses_redeem_url_reply() {
        let reply = RedeemUrlReply::parse(&json!([true, "7", "ro+9"])).unwrap();
        assert!(reply.success);
        assert_eq!(reply.reply_key, "7");
        assert_eq!(reply.kref_or_error, "ro+9");
    }
}
