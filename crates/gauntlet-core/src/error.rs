//! Harness error types

use crate::report::FailureKind;
use gauntlet_sandbox::{BuildError, LaunchError, OptionsError};

/// Errors that prevent a session from starting at all
///
/// Once a session has a workspace, every failure is reported inside the
/// [`crate::TestReport`] instead.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// Options rejected before anything ran
    #[error("invalid options: {0}")]
    InvalidOptions(#[from] OptionsError),

    /// Private workspace could not be created
    #[error("failed to create session workspace: {0}")]
    Workspace(#[source] std::io::Error),

    /// Session id already running on this harness
    #[error("session {0} is already running")]
    DuplicateSession(String),
}

/// Reason the phase sequence stopped before its natural end
#[derive(Debug, thiserror::Error)]
pub enum PhaseError {
    #[error("build failed: {0}")]
    Build(#[from] BuildError),

    #[error("launch failed: {0}")]
    Launch(#[from] LaunchError),

    #[error("session cancelled")]
    Cancelled,

    #[error("session exceeded total timeout of {timeout_secs}s")]
    TimedOut { timeout_secs: u64 },

    /// A phase panicked
    #[error("internal error: {0}")]
    Internal(String),
}

impl PhaseError {
    /// Report classification
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Build(_) => FailureKind::Build,
            Self::Launch(_) => FailureKind::Launch,
            Self::Cancelled => FailureKind::Cancelled,
            Self::TimedOut { .. } => FailureKind::TimedOut,
            Self::Internal(_) => FailureKind::Internal,
        }
    }

    /// Check if the error came from a timeout
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Build(e) => e.is_timeout(),
            Self::Launch(e) => e.is_timeout(),
            Self::TimedOut { .. } => true,
            Self::Cancelled | Self::Internal(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_errors_map_to_failure_kinds() {
        assert_eq!(PhaseError::Cancelled.kind(), FailureKind::Cancelled);
        assert_eq!(PhaseError::Internal("boom".into()).kind(), FailureKind::Internal);

        let launch = PhaseError::from(LaunchError::NotReady {
            timeout_secs: 10,
            stderr_tail: String::new(),
        });
        assert_eq!(launch.kind(), FailureKind::Launch);
        assert!(launch.is_timeout());
        assert!(launch.to_string().starts_with("launch failed"));
    }

    #[test]
    fn total_timeout_message() {
        let e = PhaseError::TimedOut { timeout_secs: 120 };
        assert!(e.is_timeout());
        assert_eq!(e.to_string(), "session exceeded total timeout of 120s");
    }
}
