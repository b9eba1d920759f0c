//! Gauntlet Protocol Client
//!
//! Newline-delimited JSON-RPC over a borrowed byte stream, as spoken by
//! generated tool servers on their standard input and output.
//!
//! # Core Concepts
//!
//! - [`ProtocolMessage`]: request, notification or response with the
//!   result-XOR-error invariant enforced at parse time
//! - [`LineDecoder`]: best-effort framing that drops interleaved diagnostics
//! - [`ProtocolClient`]: id correlation, per-request timeouts, unique ids
//! - [`ProtocolClient::initialize`]: handshake with a pinned protocol version
//!
//! # Example
//!
//! ```rust,ignore
//! use gauntlet_protocol::{Implementation, ProtocolClient};
//!
//! let client = ProtocolClient::attach(stdout, stdin);
//! client.initialize(Implementation::new("gauntlet", VERSION), timeout).await?;
//! let tools = client.list_tools(timeout).await?;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod client;
mod decoder;
mod error;
mod mcp;
mod message;

pub use client::{BoxReader, BoxWriter, ProtocolClient, StatsSnapshot};
pub use decoder::{Decoded, LineDecoder};
pub use error::{HandshakeError, ProtocolError};
pub use mcp::{
    call_result, methods, CallToolParams, CallToolResult, Implementation, InitializeParams,
    InitializeResult, ResourceDescriptor, ToolDescriptor, INITIALIZED_NOTIFICATION,
    MCP_PROTOCOL_VERSION,
};
pub use message::{
    Notification, ProtocolMessage, ProtocolViolation, Request, RequestId, Response,
    ResponseOutcome, RpcError, INTERNAL_ERROR, INVALID_PARAMS, JSONRPC_VERSION, METHOD_NOT_FOUND,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
