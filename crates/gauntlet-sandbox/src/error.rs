//! Error types for execution backends
//!
//! Build and launch failures are fatal to a session. Cleanup failures are
//! collected into a [`CleanupReport`] and never raised.

use gauntlet_artifact::ArtifactError;
use std::path::PathBuf;

/// Compilation or dependency failure
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// Artifact could not be written to the workspace
    #[error("failed to materialize artifact: {0}")]
    Materialize(#[from] ArtifactError),

    /// A build step exited unsuccessfully
    #[error("build step `{step}` failed ({status}): {output}")]
    StepFailed {
        step: String,
        status: String,
        output: String,
    },

    /// A build step exceeded the build deadline
    #[error("build step `{step}` timed out after {timeout_secs}s")]
    Timeout { step: String, timeout_secs: u64 },

    /// Build tool could not be started
    #[error("failed to start `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Workspace already torn down
    #[error("session workspace is gone")]
    WorkspaceMissing,
}

impl BuildError {
    /// Check if the failure was a deadline
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Instance failed to start or never became ready
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    /// Process could not be spawned
    #[error("failed to start `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Process exited before signalling readiness
    #[error("process exited before becoming ready ({status}){}", stderr_suffix(.stderr_tail))]
    ExitedEarly { status: String, stderr_tail: String },

    /// No readiness signal before the deadline
    #[error("server not ready after {timeout_secs}s{}", stderr_suffix(.stderr_tail))]
    NotReady {
        timeout_secs: u64,
        stderr_tail: String,
    },

    /// Stdio pipes were not available
    #[error("instance stdio unavailable: {0}")]
    MissingStdio(&'static str),

    /// `launch` called before a successful `build`
    #[error("nothing built for this session")]
    NotBuilt,
}

fn stderr_suffix(tail: &str) -> String {
    if tail.is_empty() {
        String::new()
    } else {
        format!("; stderr: {tail}")
    }
}

impl LaunchError {
    /// Check if the failure was a readiness timeout
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::NotReady { .. })
    }
}

/// One failed teardown step
#[derive(Debug, thiserror::Error)]
pub enum CleanupError {
    /// Instance did not exit after terminate and kill
    #[error("instance {instance} still running after forced kill")]
    StillRunning { instance: String },

    /// Signal or kill could not be delivered
    #[error("failed to stop {instance}: {message}")]
    StopFailed { instance: String, message: String },

    /// Built image could not be removed
    #[error("failed to remove image {image}: {message}")]
    ImageRemoval { image: String, message: String },

    /// Workspace directory could not be removed
    #[error("failed to remove workspace {path}: {source}")]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Outcome of a teardown
///
/// Teardown never fails; individual step failures are listed here.
#[derive(Debug, Default)]
pub struct CleanupReport {
    /// A running instance was stopped
    pub stopped_instance: bool,
    /// A built image was removed
    pub removed_image: bool,
    /// The workspace directory was removed
    pub removed_workspace: bool,
    /// Failed steps, in the order attempted
    pub errors: Vec<CleanupError>,
}

impl CleanupReport {
    /// True when every attempted step succeeded
    #[inline]
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    /// Record a failed step
    pub fn record(&mut self, error: CleanupError) {
        tracing::warn!(%error, "cleanup step failed");
        self.errors.push(error);
    }

    /// Display strings of all failures
    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        self.errors.iter().map(ToString::to_string).collect()
    }
}
