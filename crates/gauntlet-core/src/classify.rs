//! Tool-call outcome classification
//!
//! | Response | success | protocol_compliant |
//! |---|---|---|
//! | result with non-empty `content` | true | true |
//! | result with empty `content` | false | true |
//! | error / `isError` mentioning credentials | true (soft pass) | true |
//! | any other error / `isError` | false | true |
//! | timeout, closed stream, unparseable result | false | false |

use gauntlet_protocol::{CallToolResult, ProtocolError, Response, ResponseOutcome};
use serde::Serialize;
use serde_json::Value;

/// Phrases that mark an error as "needs credentials" rather than broken
pub const CREDENTIAL_VOCABULARY: &[&str] = &[
    "api key",
    "api_key",
    "apikey",
    "unauthorized",
    "unauthorised",
    "credential",
    "authentication",
    "not authenticated",
    "access token",
    "forbidden",
];

/// True if `message` reads like a missing-credentials failure
#[must_use]
pub fn is_credential_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    CREDENTIAL_VOCABULARY.iter().any(|phrase| lower.contains(phrase))
}

/// Classification of one tool call
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolOutcome {
    /// Non-empty content
    Passed { output: Value },
    /// Failed only for lack of credentials
    SoftPass { message: String },
    /// Well-formed failure
    Failed { message: String },
    /// Transport-level failure or malformed result
    Broken { message: String },
}

impl ToolOutcome {
    /// Counted as a passing tool
    #[inline]
    #[must_use]
    pub fn success(&self) -> bool {
        matches!(self, Self::Passed { .. } | Self::SoftPass { .. })
    }

    /// Server answered with a well-formed message
    #[inline]
    #[must_use]
    pub fn protocol_compliant(&self) -> bool {
        !matches!(self, Self::Broken { .. })
    }

    /// Human-readable failure or soft-pass reason
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Passed { .. } => None,
            Self::SoftPass { message } | Self::Failed { message } | Self::Broken { message } => {
                Some(message)
            }
        }
    }

    /// Payload of a passing call
    #[must_use]
    pub fn output(&self) -> Option<&Value> {
        match self {
            Self::Passed { output } => Some(output),
            _ => None,
        }
    }
}

/// Classify the result of a `tools/call`
#[must_use]
pub fn classify_call(result: Result<Response, ProtocolError>) -> ToolOutcome {
    let response = match result {
        Ok(response) => response,
        Err(e) => {
            return ToolOutcome::Broken {
                message: e.to_string(),
            }
        }
    };

    match response.outcome {
        ResponseOutcome::Error(error) => soft_or_failed(error.message),
        ResponseOutcome::Result(value) => {
            let parsed: CallToolResult = match serde_json::from_value(value.clone()) {
                Ok(parsed) => parsed,
                Err(e) => {
                    return ToolOutcome::Broken {
                        message: format!("malformed tools/call result: {e}"),
                    }
                }
            };
            if parsed.is_error {
                let text = parsed.text();
                let message = if text.is_empty() {
                    "tool reported an error".to_string()
                } else {
                    text
                };
                return soft_or_failed(message);
            }
            if parsed.content.is_empty() {
                return ToolOutcome::Failed {
                    message: "tool returned empty content".to_string(),
                };
            }
            ToolOutcome::Passed { output: value }
        }
    }
}

fn soft_or_failed(message: String) -> ToolOutcome {
    if is_credential_error(&message) {
        ToolOutcome::SoftPass {
            message: format!("requires credentials: {message}"),
        }
    } else {
        ToolOutcome::Failed { message }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gauntlet_protocol::{RequestId, RpcError};
    use serde_json::json;

    fn ok(value: Value) -> Result<Response, ProtocolError> {
        Ok(Response::result(RequestId::Number(1), value))
    }

    fn err(message: &str) -> Result<Response, ProtocolError> {
        Ok(Response::error(RequestId::Number(1), RpcError::new(-32000, message)))
    }

    #[test]
    fn content_passes() {
        let outcome = classify_call(ok(json!({"content": [{"type": "text", "text": "3"}]})));
        assert!(outcome.success());
        assert!(outcome.protocol_compliant());
        assert!(outcome.output().is_some());
    }

    #[test]
    fn api_key_error_is_soft_pass() {
        let outcome = classify_call(err("Missing API key for weather service"));
        assert!(matches!(outcome, ToolOutcome::SoftPass { .. }));
        assert!(outcome.success());
        assert!(outcome.protocol_compliant());
    }

    #[test]
    fn other_error_fails_but_is_compliant() {
        let outcome = classify_call(err("division by zero"));
        assert!(!outcome.success());
        assert!(outcome.protocol_compliant());
        assert_eq!(outcome.message(), Some("division by zero"));
    }

    #[test]
    fn is_error_result_uses_same_vocabulary() {
        let soft = classify_call(ok(json!({
            "content": [{"type": "text", "text": "401 Unauthorized"}],
            "isError": true
        })));
        assert!(matches!(soft, ToolOutcome::SoftPass { .. }));

        let hard = classify_call(ok(json!({
            "content": [{"type": "text", "text": "stack overflow"}],
            "isError": true
        })));
        assert!(matches!(hard, ToolOutcome::Failed { .. }));
    }

    #[test]
    fn empty_content_fails() {
        let outcome = classify_call(ok(json!({"content": []})));
        assert!(!outcome.success());
        assert!(outcome.protocol_compliant());
    }

    #[test]
    fn timeout_is_broken() {
        let outcome = classify_call(Err(ProtocolError::Timeout {
            method: "tools/call".into(),
            timeout_ms: 500,
        }));
        assert!(!outcome.success());
        assert!(!outcome.protocol_compliant());
        assert!(outcome.message().unwrap().contains("timed out"));
    }

    #[test]
    fn malformed_result_is_broken() {
        let outcome = classify_call(ok(json!({"content": "not a list"})));
        assert!(matches!(outcome, ToolOutcome::Broken { .. }));
    }

    #[test]
    fn vocabulary_is_case_insensitive() {
        for message in ["API KEY missing", "Invalid credentials", "403 Forbidden", "bad apiKey"] {
            assert!(is_credential_error(message), "{message}");
        }
        assert!(!is_credential_error("network unreachable"));
    }
}
