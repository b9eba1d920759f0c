//! Session state machine
//!
//! ```text
//! Created -> Building -> {BuildFailed | Built}
//! Built -> Launching -> {LaunchFailed | Ready}
//! Ready -> Handshaking -> {HandshakeFailed | Initialized}
//! {HandshakeFailed | Initialized} -> EnumeratingTools -> ExercisingTools
//! ExercisingTools -> EnumeratingResources -> TearingDown -> Closed
//! ```
//!
//! Every state after `Created` may jump to `TearingDown`, which is how
//! failures, cancellation and caught panics reach cleanup.

use serde::Serialize;
use std::fmt;

/// Lifecycle state of one session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Created,
    Building,
    BuildFailed,
    Built,
    Launching,
    LaunchFailed,
    Ready,
    Handshaking,
    HandshakeFailed,
    Initialized,
    EnumeratingTools,
    ExercisingTools,
    EnumeratingResources,
    TearingDown,
    Closed,
}

impl SessionState {
    /// True for `BuildFailed` and `LaunchFailed`
    #[inline]
    #[must_use]
    pub fn is_fatal(self) -> bool {
        matches!(self, Self::BuildFailed | Self::LaunchFailed)
    }

    /// True once nothing more can happen
    #[inline]
    #[must_use]
    pub fn is_closed(self) -> bool {
        self == Self::Closed
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Transition not allowed by the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal session transition {from} -> {to}")]
pub struct IllegalTransition {
    pub from: SessionState,
    pub to: SessionState,
}

/// States reachable from `from` in one step
#[must_use]
pub fn allowed_transitions(from: SessionState) -> Vec<SessionState> {
    use SessionState::{
        BuildFailed, Building, Built, Closed, Created, EnumeratingResources, EnumeratingTools,
        ExercisingTools, HandshakeFailed, Handshaking, Initialized, LaunchFailed, Launching, Ready,
        TearingDown,
    };
    match from {
        Created => vec![Building, TearingDown],
        Building => vec![BuildFailed, Built, TearingDown],
        Built => vec![Launching, TearingDown],
        Launching => vec![LaunchFailed, Ready, TearingDown],
        Ready => vec![Handshaking, TearingDown],
        Handshaking => vec![HandshakeFailed, Initialized, TearingDown],
        HandshakeFailed | Initialized => vec![EnumeratingTools, TearingDown],
        EnumeratingTools => vec![ExercisingTools, TearingDown],
        ExercisingTools => vec![EnumeratingResources, TearingDown],
        BuildFailed | LaunchFailed | EnumeratingResources => vec![TearingDown],
        TearingDown => vec![Closed],
        Closed => vec![],
    }
}

/// Check a single transition
///
/// # Errors
/// Returns [`IllegalTransition`] when `to` is not reachable from `from`.
pub fn validate_transition(from: SessionState, to: SessionState) -> Result<(), IllegalTransition> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(IllegalTransition { from, to })
    }
}

/// Current state plus the path taken to reach it
#[derive(Debug, Clone, Serialize)]
pub struct StateTracker {
    current: SessionState,
    history: Vec<SessionState>,
}

impl Default for StateTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StateTracker {
    /// Start in `Created`
    #[must_use]
    pub fn new() -> Self {
        Self {
            current: SessionState::Created,
            history: vec![SessionState::Created],
        }
    }

    /// Current state
    #[inline]
    #[must_use]
    pub fn current(&self) -> SessionState {
        self.current
    }

    /// Every state entered, in order
    #[inline]
    #[must_use]
    pub fn history(&self) -> &[SessionState] {
        &self.history
    }

    /// Move to `to`
    ///
    /// # Errors
    /// Returns [`IllegalTransition`] and stays put if the move is not allowed.
    pub fn advance(&mut self, to: SessionState) -> Result<(), IllegalTransition> {
        validate_transition(self.current, to)?;
        tracing::trace!(from = %self.current, %to, "session transition");
        self.current = to;
        self.history.push(to);
        Ok(())
    }

    /// Enter `TearingDown` from wherever the session is
    ///
    /// No-op if already tearing down or closed.
    pub fn begin_teardown(&mut self) {
        if matches!(self.current, SessionState::TearingDown | SessionState::Closed) {
            return;
        }
        self.current = SessionState::TearingDown;
        self.history.push(SessionState::TearingDown);
    }
}
