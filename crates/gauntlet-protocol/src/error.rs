//! Error types for the protocol client
//!
//! Timeouts are kept distinct from protocol-level error responses so callers
//! can classify a hung tool differently from a tool that answered with an
//! error.

use crate::message::{RequestId, RpcError};

/// Errors raised by [`crate::ProtocolClient`]
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// No response before the deadline
    #[error("{method} timed out after {timeout_ms}ms")]
    Timeout { method: String, timeout_ms: u64 },

    /// Peer closed the stream or the reader stopped
    #[error("connection closed before a response arrived")]
    ConnectionClosed,

    /// Request id already used in this session
    #[error("request id {0} was already used in this session")]
    DuplicateRequestId(RequestId),

    /// Peer answered with an error response
    #[error(transparent)]
    Rpc(#[from] RpcError),

    /// Result payload did not have the expected shape
    #[error("unexpected {method} result: {message}")]
    Decode { method: String, message: String },

    /// Writing to the stream failed
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Encoding an outbound message failed
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

impl ProtocolError {
    /// Check if the error is a timeout
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Check if the peer reported the method as unimplemented
    #[inline]
    #[must_use]
    pub fn is_method_not_found(&self) -> bool {
        matches!(self, Self::Rpc(e) if e.is_method_not_found())
    }

    /// Create a decode error for a method
    pub fn decode(method: impl Into<String>, message: impl ToString) -> Self {
        Self::Decode {
            method: method.into(),
            message: message.to_string(),
        }
    }
}

/// Handshake failures
///
/// Critical for the session verdict but not a reason to abandon it.
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    /// Transport-level failure (timeout, closed stream)
    #[error("handshake failed: {0}")]
    Protocol(#[from] ProtocolError),

    /// Server answered `initialize` with an error
    #[error("server rejected initialize: {0}")]
    Rejected(RpcError),

    /// `initialize` result has the wrong shape
    #[error("malformed initialize result: {0}")]
    Malformed(String),
}
