//! Progress event bus
//!
//! Per-session callback registry. Owned by a [`crate::Harness`] instance,
//! safe for concurrent use from many sessions. At most one callback per
//! session id; registering again replaces the previous one.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::FutureExt;
use gauntlet_sandbox::SessionId;
use serde::Serialize;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Phase tag carried by every event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressPhase {
    Building,
    Starting,
    Testing,
    TestingTool,
    Complete,
    Error,
    Cleanup,
}

impl ProgressPhase {
    /// True for `Complete` and `Error`
    #[inline]
    #[must_use]
    pub fn is_final(self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }
}

impl fmt::Display for ProgressPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Building => "building",
            Self::Starting => "starting",
            Self::Testing => "testing",
            Self::TestingTool => "testing_tool",
            Self::Complete => "complete",
            Self::Error => "error",
            Self::Cleanup => "cleanup",
        };
        f.write_str(s)
    }
}

/// One progress notification
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub session_id: SessionId,
    pub phase: ProgressPhase,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_tools: Option<usize>,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    /// Create an event stamped now
    #[must_use]
    pub fn new(session_id: SessionId, phase: ProgressPhase, message: impl Into<String>) -> Self {
        Self {
            session_id,
            phase,
            message: message.into(),
            tool_index: None,
            total_tools: None,
            timestamp: Utc::now(),
        }
    }

    /// Attach per-tool position (1-based index)
    #[inline]
    #[must_use]
    pub fn with_tool(mut self, index: usize, total: usize) -> Self {
        self.tool_index = Some(index);
        self.total_tools = Some(total);
        self
    }
}

/// Observer callback
pub type ProgressCallback = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

/// Session id to callback registry
#[derive(Default)]
pub struct EventBus {
    callbacks: DashMap<SessionId, ProgressCallback>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("registered", &self.callbacks.len())
            .finish()
    }
}

impl EventBus {
    /// Create empty bus
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback, returning the one it replaced
    pub fn register(&self, session_id: SessionId, callback: ProgressCallback) -> Option<ProgressCallback> {
        let previous = self.callbacks.insert(session_id, callback);
        if previous.is_some() {
            tracing::warn!(session_id = %session_id, "replaced existing progress callback");
        }
        previous
    }

    /// Remove a callback
    pub fn unregister(&self, session_id: SessionId) -> Option<ProgressCallback> {
        self.callbacks.remove(&session_id).map(|(_, cb)| cb)
    }

    /// True if a callback is registered
    #[must_use]
    pub fn is_registered(&self, session_id: SessionId) -> bool {
        self.callbacks.contains_key(&session_id)
    }

    /// Number of registered sessions
    #[must_use]
    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    /// True if nothing is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    /// Deliver an event to the session's callback, if any
    ///
    /// The callback runs outside the map lock. A panicking callback is logged
    /// and otherwise ignored.
    pub fn publish(&self, event: &ProgressEvent) {
        let Some(callback) = self
            .callbacks
            .get(&event.session_id)
            .map(|entry| Arc::clone(entry.value()))
        else {
            return;
        };

        if std::panic::catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
            tracing::warn!(
                session_id = %event.session_id,
                phase = %event.phase,
                "progress callback panicked"
            );
        }
    }
}

/// Run a future, turning a panic into an error string
pub(crate) async fn catch_panic<F, T>(future: F) -> Result<T, String>
where
    F: std::future::Future<Output = T>,
{
    AssertUnwindSafe(future).catch_unwind().await.map_err(|payload| {
        payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string())
    })
}
