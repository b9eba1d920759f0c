//! Protocol message model
//!
//! One JSON value per line. Requests carry `{jsonrpc, id, method, params?}`,
//! notifications omit the id, responses carry exactly one of `result` or
//! `error`. [`ProtocolMessage::from_value`] enforces that shape on every
//! parsed line.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt::{self, Display, Formatter};

/// Protocol version tag carried by every message
pub const JSONRPC_VERSION: &str = "2.0";

/// Standard error code: method not found
pub const METHOD_NOT_FOUND: i64 = -32601;

/// Standard error code: invalid params
pub const INVALID_PARAMS: i64 = -32602;

/// Standard error code: internal error
pub const INTERNAL_ERROR: i64 = -32603;

/// Request identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric id
    Number(i64),
    /// String id
    String(String),
}

impl RequestId {
    fn from_value(value: Value) -> Result<Self, ProtocolViolation> {
        match value {
            Value::Number(n) => n
                .as_i64()
                .map(Self::Number)
                .ok_or_else(|| ProtocolViolation::InvalidId(n.to_string())),
            Value::String(s) => Ok(Self::String(s)),
            other => Err(ProtocolViolation::InvalidId(other.to_string())),
        }
    }
}

impl Display for RequestId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "\"{s}\""),
        }
    }
}

impl From<i64> for RequestId {
    fn from(value: i64) -> Self {
        Self::Number(value)
    }
}

/// Outbound request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Request {
    /// Protocol version tag
    pub jsonrpc: &'static str,
    /// Correlation id
    pub id: RequestId,
    /// Method name
    pub method: String,
    /// Optional params
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    /// Create new request
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

/// One-way message, no id, no response expected
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    /// Protocol version tag
    pub jsonrpc: &'static str,
    /// Method name
    pub method: String,
    /// Optional params
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Notification {
    /// Create new notification
    #[inline]
    #[must_use]
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method: method.into(),
            params,
        }
    }
}

/// Error object carried by an error response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("rpc error {code}: {message}")]
pub struct RpcError {
    /// Error code
    pub code: i64,
    /// Human message
    pub message: String,
    /// Optional structured data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    /// Create new error object
    #[inline]
    #[must_use]
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Check for the "method not found" code
    #[inline]
    #[must_use]
    pub fn is_method_not_found(&self) -> bool {
        self.code == METHOD_NOT_FOUND
    }
}

/// Result-or-error payload of a response; never both, never neither
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseOutcome {
    /// Success payload (may be JSON null)
    Result(Value),
    /// Error payload
    Error(RpcError),
}

/// Inbound or outbound response
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Id of the request being answered
    pub id: RequestId,
    /// Payload
    pub outcome: ResponseOutcome,
}

impl Response {
    /// Successful response
    #[inline]
    #[must_use]
    pub fn result(id: RequestId, result: Value) -> Self {
        Self {
            id,
            outcome: ResponseOutcome::Result(result),
        }
    }

    /// Error response
    #[inline]
    #[must_use]
    pub fn error(id: RequestId, error: RpcError) -> Self {
        Self {
            id,
            outcome: ResponseOutcome::Error(error),
        }
    }

    /// Convert into a plain result
    ///
    /// # Errors
    /// Returns the carried [`RpcError`] for error responses
    pub fn into_result(self) -> Result<Value, RpcError> {
        match self.outcome {
            ResponseOutcome::Result(value) => Ok(value),
            ResponseOutcome::Error(error) => Err(error),
        }
    }

    /// Wire form of this response
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("jsonrpc".into(), Value::from(JSONRPC_VERSION));
        map.insert(
            "id".into(),
            serde_json::to_value(&self.id).unwrap_or(Value::Null),
        );
        match &self.outcome {
            ResponseOutcome::Result(value) => {
                map.insert("result".into(), value.clone());
            }
            ResponseOutcome::Error(error) => {
                map.insert(
                    "error".into(),
                    serde_json::to_value(error).unwrap_or(Value::Null),
                );
            }
        }
        Value::Object(map)
    }
}

/// Any well-formed protocol message
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolMessage {
    /// Request from the peer (expects a response)
    Request {
        id: RequestId,
        method: String,
        params: Option<Value>,
    },
    /// Notification from the peer
    Notification {
        method: String,
        params: Option<Value>,
    },
    /// Response to one of our requests
    Response(Response),
}

impl ProtocolMessage {
    /// Validate a parsed JSON value as a protocol message
    ///
    /// # Errors
    /// Returns [`ProtocolViolation`] when the value does not have a valid
    /// message shape
    pub fn from_value(value: Value) -> Result<Self, ProtocolViolation> {
        let Value::Object(mut map) = value else {
            return Err(ProtocolViolation::NotAnObject);
        };

        match map.get("jsonrpc") {
            Some(Value::String(tag)) if tag == JSONRPC_VERSION => {}
            Some(other) => return Err(ProtocolViolation::BadVersionTag(Some(other.to_string()))),
            None => return Err(ProtocolViolation::BadVersionTag(None)),
        }

        let id = match map.remove("id") {
            None | Some(Value::Null) => None,
            Some(raw) => Some(RequestId::from_value(raw)?),
        };

        if let Some(method) = map.remove("method") {
            let Value::String(method) = method else {
                return Err(ProtocolViolation::InvalidMethod);
            };
            let params = map.remove("params");
            return Ok(match id {
                Some(id) => Self::Request { id, method, params },
                None => Self::Notification { method, params },
            });
        }

        let result = map.remove("result");
        let error = map.remove("error");
        let outcome = match (result, error) {
            (Some(result), None) => ResponseOutcome::Result(result),
            (None, Some(error)) => ResponseOutcome::Error(
                serde_json::from_value(error)
                    .map_err(|e| ProtocolViolation::MalformedError(e.to_string()))?,
            ),
            (Some(_), Some(_)) => return Err(ProtocolViolation::BothResultAndError),
            (None, None) => return Err(ProtocolViolation::NeitherResultNorError),
        };

        let id = id.ok_or(ProtocolViolation::MissingResponseId)?;
        Ok(Self::Response(Response { id, outcome }))
    }

    /// Parse a single line of text
    ///
    /// # Errors
    /// Returns [`ProtocolViolation::InvalidJson`] for unparsable text, or the
    /// shape violation from [`ProtocolMessage::from_value`]
    pub fn parse_line(line: &str) -> Result<Self, ProtocolViolation> {
        let value: Value =
            serde_json::from_str(line).map_err(|e| ProtocolViolation::InvalidJson(e.to_string()))?;
        Self::from_value(value)
    }
}

/// A line that is not a valid protocol message
///
/// Logged and skipped by the decoder; never fatal to a session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolViolation {
    /// Not parsable as JSON
    #[error("invalid json: {0}")]
    InvalidJson(String),

    /// Bytes are not UTF-8
    #[error("line is not valid utf-8")]
    InvalidUtf8,

    /// JSON value is not an object
    #[error("message is not a json object")]
    NotAnObject,

    /// Missing or wrong protocol version tag
    #[error("missing or unsupported protocol version tag: {0:?}")]
    BadVersionTag(Option<String>),

    /// Id is neither an integer nor a string
    #[error("invalid message id: {0}")]
    InvalidId(String),

    /// Method is not a string
    #[error("method must be a string")]
    InvalidMethod,

    /// Response without an id
    #[error("response is missing its id")]
    MissingResponseId,

    /// Response carries both result and error
    #[error("response carries both result and error")]
    BothResultAndError,

    /// Response carries neither result nor error
    #[error("response carries neither result nor error")]
    NeitherResultNorError,

    /// Error object has the wrong shape
    #[error("malformed error object: {0}")]
    MalformedError(String),

    /// Line exceeded the decoder's size limit
    #[error("line exceeds {0} bytes")]
    OversizedLine(usize),

    /// Stream ended in the middle of a line
    #[error("stream ended with {0} bytes of unterminated input")]
    TruncatedLine(usize),
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn request_serializes_to_one_object() {
        let req = Request::new(7, "tools/list", None);
        let text = serde_json::to_string(&req).unwrap();
        assert_eq!(text, r#"{"jsonrpc":"2.0","id":7,"method":"tools/list"}"#);
    }

    #[test]
    fn notification_has_no_id() {
        let note = Notification::new("notifications/initialized", None);
        let value = serde_json::to_value(&note).unwrap();
        assert!(value.get("id").is_none());
    }

    #[test]
    fn parses_result_response() {
        let msg = ProtocolMessage::parse_line(r#"{"jsonrpc":"2.0","id":1,"result":{"ok":true}}"#)
            .unwrap();
        assert_eq!(
            msg,
            ProtocolMessage::Response(Response::result(RequestId::Number(1), json!({"ok": true})))
        );
    }

    #[test]
    fn null_result_is_still_a_result() {
        let msg = ProtocolMessage::parse_line(r#"{"jsonrpc":"2.0","id":"a","result":null}"#).unwrap();
        assert_eq!(
            msg,
            ProtocolMessage::Response(Response::result(RequestId::String("a".into()), Value::Null))
        );
    }

    #[test]
    fn parses_error_response() {
        let msg = ProtocolMessage::parse_line(
            r#"{"jsonrpc":"2.0","id":2,"error":{"code":-32601,"message":"Method not found"}}"#,
        )
        .unwrap();
        let ProtocolMessage::Response(resp) = msg else {
            panic!("expected response");
        };
        let err = resp.into_result().unwrap_err();
        assert!(err.is_method_not_found());
    }

    #[test]
    fn enforces_result_xor_error() {
        assert_eq!(
            ProtocolMessage::parse_line(
                r#"{"jsonrpc":"2.0","id":1,"result":1,"error":{"code":1,"message":"x"}}"#
            ),
            Err(ProtocolViolation::BothResultAndError)
        );
        assert_eq!(
            ProtocolMessage::parse_line(r#"{"jsonrpc":"2.0","id":1}"#),
            Err(ProtocolViolation::NeitherResultNorError)
        );
    }

    #[test]
    fn rejects_bad_shapes() {
        assert!(matches!(
            ProtocolMessage::parse_line("not json"),
            Err(ProtocolViolation::InvalidJson(_))
        ));
        assert_eq!(ProtocolMessage::parse_line("[1]"), Err(ProtocolViolation::NotAnObject));
        assert_eq!(
            ProtocolMessage::parse_line(r#"{"id":1,"result":1}"#),
            Err(ProtocolViolation::BadVersionTag(None))
        );
        assert_eq!(
            ProtocolMessage::parse_line(r#"{"jsonrpc":"2.0","id":true,"result":1}"#),
            Err(ProtocolViolation::InvalidId("true".into()))
        );
        assert_eq!(
            ProtocolMessage::parse_line(r#"{"jsonrpc":"2.0","result":1}"#),
            Err(ProtocolViolation::MissingResponseId)
        );
        assert!(matches!(
            ProtocolMessage::parse_line(r#"{"jsonrpc":"2.0","id":1,"error":"boom"}"#),
            Err(ProtocolViolation::MalformedError(_))
        ));
    }

    #[test]
    fn distinguishes_requests_and_notifications() {
        let req = ProtocolMessage::parse_line(r#"{"jsonrpc":"2.0","id":9,"method":"ping"}"#).unwrap();
        assert!(matches!(req, ProtocolMessage::Request { ref method, .. } if method == "ping"));

        let note =
            ProtocolMessage::parse_line(r#"{"jsonrpc":"2.0","method":"notifications/progress"}"#)
                .unwrap();
        assert!(matches!(note, ProtocolMessage::Notification { .. }));
    }

    #[test]
    fn response_wire_form_round_trips() {
        let resp = Response::error(RequestId::Number(3), RpcError::new(INVALID_PARAMS, "bad"));
        let parsed = ProtocolMessage::from_value(resp.to_value()).unwrap();
        assert_eq!(parsed, ProtocolMessage::Response(resp));
    }
}
