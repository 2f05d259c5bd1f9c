//! JSON-RPC wire shapes and correlation-key extraction.
//!
//! Three frame shapes travel the connection:
//! - outbound requests `{jsonrpc, method, id, params}`,
//! - replies `{id, result, error?}` keyed by the request id,
//! - pushed events `{params: {subscription, result}}` keyed by the token.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RpcError;

/// Protocol version stamped on every request.
pub const JSONRPC_VERSION: &str = "2.0";

/// Value an inbound frame is routed by: a request id for replies, a
/// remote-issued token for pushed subscription events.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CorrelationKey {
    Id(u64),
    Token(String),
}

impl std::fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Id(id) => write!(f, "id:{id}"),
            Self::Token(token) => write!(f, "token:{token}"),
        }
    }
}

/// Outbound call frame with positional arguments.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Request {
    pub jsonrpc: String,
    pub method: String,
    pub id: u64,
    pub params: Vec<Value>,
}

impl Request {
    /// Build a request for `method` under the given id.
    #[must_use]
    pub fn new(method: impl Into<String>, id: u64, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            id,
            params,
        }
    }

    /// Serialize into one complete text frame.
    ///
    /// # Errors
    /// Returns a decode error if a parameter cannot be serialized.
    pub fn encode(&self) -> Result<String, RpcError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Structured error object carried in a reply envelope.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorObject {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

impl ErrorObject {
    /// A populated error field; zero code with an empty message means "no
    /// error" even when the field is present.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.code != 0 || !self.message.is_empty()
    }
}

/// Decoded reply envelope. The result stays raw until the call site picks
/// its schema via [`ResponseFrame::into_result`].
#[derive(Debug, Deserialize)]
pub struct ResponseFrame {
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    pub error: Option<ErrorObject>,
}

impl ResponseFrame {
    /// Decode a raw reply frame.
    ///
    /// # Errors
    /// Returns a decode error for malformed JSON.
    pub fn decode(frame: &[u8]) -> Result<Self, RpcError> {
        Ok(serde_json::from_slice(frame)?)
    }

    /// Success payload XOR structured application error.
    ///
    /// # Errors
    /// Returns [`RpcError::Application`] when the envelope carries a
    /// populated error, or a decode error when the result does not match
    /// the caller's schema.
    pub fn into_result<T: serde::de::DeserializeOwned>(self) -> Result<T, RpcError> {
        if let Some(err) = self.error {
            if err.is_set() {
                return Err(RpcError::Application {
                    code: err.code,
                    message: err.message,
                });
            }
        }
        Ok(serde_json::from_value(self.result)?)
    }
}

/// Pushed event envelope. A top-level error string signals end-of-stream
/// for the subscription.
#[derive(Debug, Deserialize)]
pub struct EventFrame {
    #[serde(default)]
    pub params: Option<EventParams>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Token and payload of one pushed event.
#[derive(Debug, Deserialize)]
pub struct EventParams {
    pub subscription: String,
    #[serde(default)]
    pub result: Value,
}

impl EventFrame {
    /// Decode a raw pushed-event frame.
    ///
    /// # Errors
    /// Returns a decode error for malformed JSON.
    pub fn decode(frame: &[u8]) -> Result<Self, RpcError> {
        Ok(serde_json::from_slice(frame)?)
    }
}

/// Minimal probe used by the dispatcher: parse just enough of an inbound
/// frame to route it.
#[derive(Debug, Default, Deserialize)]
struct KeyProbe {
    #[serde(default)]
    id: u64,
    #[serde(default)]
    params: Option<ProbeParams>,
}

#[derive(Debug, Default, Deserialize)]
struct ProbeParams {
    #[serde(default)]
    subscription: String,
}

/// Extract the correlation key of an inbound frame.
///
/// A non-zero numeric `id` wins: the frame is a call reply. Otherwise a
/// non-empty `params.subscription` marks a pushed event for that token.
/// `Ok(None)` means the frame matches neither shape.
///
/// # Errors
/// Returns a decode error for frames that are not JSON objects of either
/// shape; such frames are dropped by the dispatcher.
pub fn correlation_key(frame: &[u8]) -> Result<Option<CorrelationKey>, RpcError> {
    let probe: KeyProbe = serde_json::from_slice(frame)?;
    if probe.id != 0 {
        return Ok(Some(CorrelationKey::Id(probe.id)));
    }
    match probe.params {
        Some(p) if !p.subscription.is_empty() => Ok(Some(CorrelationKey::Token(p.subscription))),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_roundtrip() {
        let req = Request::new("filesystem_list", 7, vec![json!("/home/user")]);
        let frame = req.encode().unwrap();
        let parsed: Request = serde_json::from_str(&frame).unwrap();
        assert_eq!(parsed, req);
        assert_eq!(parsed.jsonrpc, "2.0");
        assert_eq!(parsed.method, "filesystem_list");
        assert_eq!(parsed.id, 7);
        assert_eq!(parsed.params, vec![json!("/home/user")]);
    }

    #[test]
    fn test_reply_key_wins_over_subscription() {
        let frame = br#"{"id":3,"params":{"subscription":"sub-1"},"result":"ok"}"#;
        assert_eq!(
            correlation_key(frame).unwrap(),
            Some(CorrelationKey::Id(3))
        );
    }

    #[test]
    fn test_event_key_from_subscription() {
        let frame = br#"{"params":{"subscription":"sub-1","result":{"line":"hi"}}}"#;
        assert_eq!(
            correlation_key(frame).unwrap(),
            Some(CorrelationKey::Token("sub-1".to_string()))
        );
    }

    #[test]
    fn test_keyless_frame() {
        assert_eq!(correlation_key(br#"{"method":"notify"}"#).unwrap(), None);
        assert!(correlation_key(b"not json").is_err());
    }

    #[test]
    fn test_response_success_payload() {
        let frame = br#"{"id":1,"result":[{"name":"hello.txt","isDir":false}]}"#;
        let resp = ResponseFrame::decode(frame).unwrap();
        let entries: Vec<Value> = resp.into_result().unwrap();
        assert_eq!(entries[0]["name"], "hello.txt");
    }

    #[test]
    fn test_response_application_error() {
        let frame = br#"{"id":1,"result":null,"error":{"code":32,"message":"no such file"}}"#;
        let err = ResponseFrame::decode(frame)
            .unwrap()
            .into_result::<Value>()
            .unwrap_err();
        match err {
            RpcError::Application { code, message } => {
                assert_eq!(code, 32);
                assert_eq!(message, "no such file");
            }
            other => panic!("expected application error, got {other}"),
        }
    }

    #[test]
    fn test_response_empty_error_object_is_success() {
        let frame = br#"{"id":1,"result":"ok","error":{"code":0,"message":""}}"#;
        let out: String = ResponseFrame::decode(frame).unwrap().into_result().unwrap();
        assert_eq!(out, "ok");
    }

    #[test]
    fn test_event_frame_error_signals_end_of_stream() {
        let frame = br#"{"error":"watcher gone"}"#;
        let ev = EventFrame::decode(frame).unwrap();
        assert!(ev.params.is_none());
        assert_eq!(ev.error.as_deref(), Some("watcher gone"));
    }
}
