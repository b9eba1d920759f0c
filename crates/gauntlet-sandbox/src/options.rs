//! Per-session limits and the build/run recipe

use gauntlet_artifact::ArtifactLayout;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Network policy for a launched instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkMode {
    /// No network access
    #[default]
    Isolated,
    /// Host network reachable
    Open,
}

/// Execution strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Container with OS-level isolation
    #[default]
    Container,
    /// Same-host subprocess with relaxed isolation
    Process,
}

impl BackendKind {
    /// Stable lowercase name
    #[inline]
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Container => "container",
            Self::Process => "process",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unrecognized backend name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown backend `{0}`, expected `container` or `process`")]
pub struct UnknownBackend(pub String);

impl FromStr for BackendKind {
    type Err = UnknownBackend;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "container" | "docker" => Ok(Self::Container),
            "process" | "direct" => Ok(Self::Process),
            other => Err(UnknownBackend(other.to_string())),
        }
    }
}

/// Invalid option value
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OptionsError {
    /// A limit or timeout is zero or negative
    #[error("{field} must be positive")]
    NonPositive { field: &'static str },

    /// CPU share is not a finite number
    #[error("cpu_limit must be a finite number, got {0}")]
    InvalidCpu(f64),
}

/// Limits and timeouts for one test invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TestOptions {
    /// CPU share in cores
    pub cpu_limit: f64,
    /// Hard memory cap
    pub memory_limit_mb: u64,
    /// Whole-session deadline
    pub total_timeout_secs: u64,
    /// Build deadline
    pub build_timeout_secs: u64,
    /// Readiness deadline after launch
    pub readiness_timeout_secs: u64,
    /// Per-request deadline
    pub tool_timeout_secs: u64,
    /// Wait between graceful termination and forced kill
    pub kill_grace_secs: u64,
    /// Process/thread ceiling
    pub pids_limit: u64,
    /// Open file descriptor ceiling
    pub nofile_limit: u64,
    /// Network policy
    pub network: NetworkMode,
    /// Remove workspace and image at session end
    pub cleanup: bool,
    /// Probe the instance after tools are exercised
    pub check_resources: bool,
}

impl Default for TestOptions {
    fn default() -> Self {
        Self {
            cpu_limit: 0.5,
            memory_limit_mb: 512,
            total_timeout_secs: 120,
            build_timeout_secs: 120,
            readiness_timeout_secs: 10,
            tool_timeout_secs: 10,
            kill_grace_secs: 3,
            pids_limit: 64,
            nofile_limit: 1024,
            network: NetworkMode::Isolated,
            cleanup: true,
            check_resources: true,
        }
    }
}

impl TestOptions {
    /// Check every limit is usable
    ///
    /// # Errors
    /// Returns the first offending field.
    pub fn validate(&self) -> Result<(), OptionsError> {
        if !self.cpu_limit.is_finite() {
            return Err(OptionsError::InvalidCpu(self.cpu_limit));
        }
        if self.cpu_limit <= 0.0 {
            return Err(OptionsError::NonPositive { field: "cpu_limit" });
        }

        let fields = [
            ("memory_limit_mb", self.memory_limit_mb),
            ("total_timeout_secs", self.total_timeout_secs),
            ("build_timeout_secs", self.build_timeout_secs),
            ("readiness_timeout_secs", self.readiness_timeout_secs),
            ("tool_timeout_secs", self.tool_timeout_secs),
            ("pids_limit", self.pids_limit),
            ("nofile_limit", self.nofile_limit),
        ];
        for (field, value) in fields {
            if value == 0 {
                return Err(OptionsError::NonPositive { field });
            }
        }
        Ok(())
    }

    /// Total session deadline
    #[inline]
    #[must_use]
    pub fn total_timeout(&self) -> Duration {
        Duration::from_secs(self.total_timeout_secs)
    }

    /// Build deadline
    #[inline]
    #[must_use]
    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build_timeout_secs)
    }

    /// Readiness deadline
    #[inline]
    #[must_use]
    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_secs(self.readiness_timeout_secs)
    }

    /// Per-request deadline
    #[inline]
    #[must_use]
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }

    /// Termination grace period
    #[inline]
    #[must_use]
    pub fn kill_grace(&self) -> Duration {
        Duration::from_secs(self.kill_grace_secs)
    }

    /// Builder: set CPU share
    #[inline]
    #[must_use]
    pub fn with_cpu_limit(mut self, cores: f64) -> Self {
        self.cpu_limit = cores;
        self
    }

    /// Builder: set memory cap
    #[inline]
    #[must_use]
    pub fn with_memory_limit_mb(mut self, mb: u64) -> Self {
        self.memory_limit_mb = mb;
        self
    }

    /// Builder: set session deadline
    #[inline]
    #[must_use]
    pub fn with_total_timeout_secs(mut self, secs: u64) -> Self {
        self.total_timeout_secs = secs;
        self
    }

    /// Builder: set per-step build deadline
    #[inline]
    #[must_use]
    pub fn with_build_timeout_secs(mut self, secs: u64) -> Self {
        self.build_timeout_secs = secs;
        self
    }

    /// Builder: set readiness deadline
    #[inline]
    #[must_use]
    pub fn with_readiness_timeout_secs(mut self, secs: u64) -> Self {
        self.readiness_timeout_secs = secs;
        self
    }

    /// Builder: set per-request deadline
    #[inline]
    #[must_use]
    pub fn with_tool_timeout_secs(mut self, secs: u64) -> Self {
        self.tool_timeout_secs = secs;
        self
    }

    /// Builder: set termination grace period
    #[inline]
    #[must_use]
    pub fn with_kill_grace_secs(mut self, secs: u64) -> Self {
        self.kill_grace_secs = secs;
        self
    }

    /// Builder: set network policy
    #[inline]
    #[must_use]
    pub fn with_network(mut self, network: NetworkMode) -> Self {
        self.network = network;
        self
    }

    /// Builder: keep or remove workspace and image
    #[inline]
    #[must_use]
    pub fn with_cleanup(mut self, cleanup: bool) -> Self {
        self.cleanup = cleanup;
        self
    }
}

/// How to build and start an artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Toolchain {
    /// Base image for container builds
    pub base_image: String,
    /// Where the manifest is written
    pub manifest_path: String,
    /// Where the entry point is written
    pub entry_path: String,
    /// Dependency install step, skipped when empty
    pub install_command: String,
    /// Compile step, skipped when empty
    pub build_command: String,
    /// Start command for the server
    pub run_command: String,
    /// Case-insensitive stderr substrings that signal readiness
    pub readiness_markers: Vec<String>,
    /// Settle delay used when no markers are configured
    pub settle_millis: u64,
}

impl Default for Toolchain {
    fn default() -> Self {
        Self::node()
    }
}

impl Toolchain {
    /// Node/TypeScript recipe
    #[must_use]
    pub fn node() -> Self {
        Self {
            base_image: "node:20-alpine".to_string(),
            manifest_path: "package.json".to_string(),
            entry_path: "src/index.ts".to_string(),
            install_command: "npm install --no-audit --no-fund".to_string(),
            build_command: "npm run build".to_string(),
            run_command: "node dist/index.js".to_string(),
            readiness_markers: ["running", "ready", "listening", "started"]
                .into_iter()
                .map(String::from)
                .collect(),
            settle_millis: 500,
        }
    }

    /// Recipe that only runs a command, with no install or build step
    #[must_use]
    pub fn script(entry_path: impl Into<String>, run_command: impl Into<String>) -> Self {
        Self {
            entry_path: entry_path.into(),
            install_command: String::new(),
            build_command: String::new(),
            run_command: run_command.into(),
            ..Self::node()
        }
    }

    /// Builder: replace readiness markers
    #[must_use]
    pub fn with_readiness_markers<I, S>(mut self, markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.readiness_markers = markers.into_iter().map(Into::into).collect();
        self
    }

    /// Builder: replace build command
    #[must_use]
    pub fn with_build_command(mut self, command: impl Into<String>) -> Self {
        self.build_command = command.into();
        self
    }

    /// Builder: replace install command
    #[must_use]
    pub fn with_install_command(mut self, command: impl Into<String>) -> Self {
        self.install_command = command.into();
        self
    }

    /// Artifact layout implied by this recipe
    #[must_use]
    pub fn layout(&self) -> ArtifactLayout {
        ArtifactLayout::new(&self.manifest_path, &self.entry_path)
    }

    /// Non-empty build steps in order
    pub fn build_steps(&self) -> impl Iterator<Item = &str> {
        [self.install_command.as_str(), self.build_command.as_str()]
            .into_iter()
            .filter(|cmd| !cmd.trim().is_empty())
    }

    /// Settle delay
    #[inline]
    #[must_use]
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_millis)
    }

    /// Case-insensitive marker match against one stderr line
    #[must_use]
    pub fn is_ready_line(&self, line: &str) -> bool {
        let line = line.to_lowercase();
        self.readiness_markers
            .iter()
            .any(|marker| !marker.is_empty() && line.contains(&marker.to_lowercase()))
    }
}
