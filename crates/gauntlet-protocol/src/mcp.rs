//! Tool-server method layer
//!
//! Typed params and results for `initialize`, `tools/list`, `tools/call` and
//! `resources/list`, plus convenience methods on [`ProtocolClient`].

use crate::client::ProtocolClient;
use crate::error::{HandshakeError, ProtocolError};
use crate::message::{Response, ResponseOutcome};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

/// Protocol version pinned in the `initialize` request
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// One-way notification sent after a successful `initialize`
pub const INITIALIZED_NOTIFICATION: &str = "notifications/initialized";

/// Method names
pub mod methods {
    /// Handshake request
    pub const INITIALIZE: &str = "initialize";
    /// Tool enumeration
    pub const TOOLS_LIST: &str = "tools/list";
    /// Tool invocation
    pub const TOOLS_CALL: &str = "tools/call";
    /// Optional resource enumeration
    pub const RESOURCES_LIST: &str = "resources/list";
}

/// Name and version of one side of the connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Implementation {
    /// Display name
    pub name: String,
    /// Version string
    #[serde(default)]
    pub version: String,
}

impl Implementation {
    /// Create new identity block
    #[inline]
    #[must_use]
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

/// `initialize` params
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// Requested protocol version
    pub protocol_version: String,
    /// Client capabilities
    pub capabilities: Value,
    /// Client identity
    pub client_info: Implementation,
}

impl InitializeParams {
    /// Params with the pinned protocol version and no capabilities
    #[must_use]
    pub fn new(client_info: Implementation) -> Self {
        Self {
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
            capabilities: json!({}),
            client_info,
        }
    }
}

/// `initialize` result
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    /// Protocol version the server speaks
    pub protocol_version: String,
    /// Server identity
    pub server_info: Implementation,
    /// Server capabilities
    #[serde(default)]
    pub capabilities: Value,
}

/// Entry in a `tools/list` result
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    /// Tool name
    pub name: String,
    /// Human description
    #[serde(default)]
    pub description: String,
    /// Parameter schema
    #[serde(default)]
    pub input_schema: Value,
}

#[derive(Debug, Deserialize)]
struct ToolsListResult {
    tools: Vec<ToolDescriptor>,
}

/// `tools/call` params
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallToolParams {
    /// Tool name
    pub name: String,
    /// Tool arguments
    pub arguments: Value,
}

/// `tools/call` result
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    /// Content blocks, each `{type, ...}`
    #[serde(default)]
    pub content: Vec<Value>,
    /// Tool reported a failure in-band
    #[serde(default)]
    pub is_error: bool,
}

impl CallToolResult {
    /// Concatenated `text` fields of all text content blocks
    #[must_use]
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| block.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Entry in a `resources/list` result
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ResourceDescriptor {
    /// Resource URI
    pub uri: String,
    /// Display name
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct ResourcesListResult {
    #[serde(default)]
    resources: Vec<ResourceDescriptor>,
}

impl ProtocolClient {
    /// Run the `initialize` / `initialized` handshake
    ///
    /// A server answering with a different protocol version is accepted with
    /// a warning; compatibility is judged by the calls that follow.
    ///
    /// # Errors
    /// - [`HandshakeError::Protocol`] on timeout or closed stream
    /// - [`HandshakeError::Rejected`] when the server answers with an error
    /// - [`HandshakeError::Malformed`] when the result has the wrong shape
    pub async fn initialize(
        &self,
        client_info: Implementation,
        timeout: Duration,
    ) -> Result<InitializeResult, HandshakeError> {
        let params = serde_json::to_value(InitializeParams::new(client_info))
            .map_err(ProtocolError::from)?;
        let response = self
            .request(methods::INITIALIZE, Some(params), timeout)
            .await?;

        let value = response.into_result().map_err(HandshakeError::Rejected)?;
        let result: InitializeResult = serde_json::from_value(value)
            .map_err(|e| HandshakeError::Malformed(e.to_string()))?;

        if result.protocol_version != MCP_PROTOCOL_VERSION {
            tracing::warn!(
                requested = MCP_PROTOCOL_VERSION,
                server = %result.protocol_version,
                "server negotiated a different protocol version"
            );
        }

        self.notify(INITIALIZED_NOTIFICATION, None).await?;
        tracing::debug!(server = %result.server_info.name, "handshake complete");
        Ok(result)
    }

    /// Enumerate tools
    ///
    /// # Errors
    /// Returns [`ProtocolError::Rpc`] for an error response and
    /// [`ProtocolError::Decode`] when the result has the wrong shape.
    pub async fn list_tools(&self, timeout: Duration) -> Result<Vec<ToolDescriptor>, ProtocolError> {
        let value = self
            .request(methods::TOOLS_LIST, Some(json!({})), timeout)
            .await?
            .into_result()?;
        let result: ToolsListResult = serde_json::from_value(value)
            .map_err(|e| ProtocolError::decode(methods::TOOLS_LIST, e))?;
        Ok(result.tools)
    }

    /// Invoke a tool, returning the raw response
    ///
    /// Error responses come back as `Ok`, so the caller can classify them.
    ///
    /// # Errors
    /// Transport failures only: timeout, closed stream, write failure.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
        timeout: Duration,
    ) -> Result<Response, ProtocolError> {
        let params = serde_json::to_value(CallToolParams {
            name: name.to_string(),
            arguments,
        })?;
        self.request(methods::TOOLS_CALL, Some(params), timeout).await
    }

    /// Enumerate resources
    ///
    /// # Errors
    /// Returns [`ProtocolError::Rpc`] for an error response; check
    /// [`ProtocolError::is_method_not_found`] for unsupported servers.
    pub async fn list_resources(
        &self,
        timeout: Duration,
    ) -> Result<Vec<ResourceDescriptor>, ProtocolError> {
        let value = self
            .request(methods::RESOURCES_LIST, Some(json!({})), timeout)
            .await?
            .into_result()?;
        let result: ResourcesListResult = serde_json::from_value(value)
            .map_err(|e| ProtocolError::decode(methods::RESOURCES_LIST, e))?;
        Ok(result.resources)
    }
}

/// Parse a `tools/call` success payload
///
/// Returns `None` for error responses or results that are not call results.
#[must_use]
pub fn call_result(response: &Response) -> Option<CallToolResult> {
    match &response.outcome {
        ResponseOutcome::Result(value) => serde_json::from_value(value.clone()).ok(),
        ResponseOutcome::Error(_) => None,
    }
}
