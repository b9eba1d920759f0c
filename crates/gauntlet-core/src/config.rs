//! Harness configuration
//!
//! Loaded from TOML or built in code. Every section is optional and falls
//! back to the documented defaults; unknown keys are rejected.
//!
//! ```toml
//! backend = "process"
//! verdict = "check-threshold"
//!
//! [options]
//! tool_timeout_secs = 5
//! network = "open"
//!
//! [toolchain]
//! run_command = "node build/index.js"
//! ```

use crate::report::VerdictPolicy;
use gauntlet_sandbox::{BackendKind, OptionsError, TestOptions, Toolchain};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// TOML did not match the expected shape
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A limit is out of range
    #[error("invalid options: {0}")]
    Options(#[from] OptionsError),
}

/// Top-level harness configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HarnessConfig {
    /// Execution strategy
    pub backend: BackendKind,
    /// Verdict used for [`crate::TestReport::passed`]
    pub verdict: VerdictPolicy,
    /// Default per-session options
    pub options: TestOptions,
    /// Build/run recipe
    pub toolchain: Toolchain,
    /// Identity sent in the handshake
    pub client_name: String,
    /// Probe `resources/list` after tools
    pub check_resources_list: bool,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            verdict: VerdictPolicy::default(),
            options: TestOptions::default(),
            toolchain: Toolchain::default(),
            client_name: "gauntlet".to_string(),
            check_resources_list: true,
        }
    }
}

impl HarnessConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate TOML text
    ///
    /// # Errors
    /// Returns [`ConfigError::Parse`] or [`ConfigError::Options`].
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.options.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    ///
    /// # Errors
    /// Returns [`ConfigError::Read`] if the file cannot be read, otherwise
    /// see [`HarnessConfig::from_toml_str`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        tracing::debug!(path = %path.display(), backend = %config.backend, "loaded config");
        Ok(config)
    }

    /// With backend
    #[inline]
    #[must_use]
    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    /// With verdict policy
    #[inline]
    #[must_use]
    pub fn with_verdict(mut self, verdict: VerdictPolicy) -> Self {
        self.verdict = verdict;
        self
    }

    /// With default options
    #[inline]
    #[must_use]
    pub fn with_options(mut self, options: TestOptions) -> Self {
        self.options = options;
        self
    }

    /// With toolchain
    #[inline]
    #[must_use]
    pub fn with_toolchain(mut self, toolchain: Toolchain) -> Self {
        self.toolchain = toolchain;
        self
    }

    /// With or without the optional `resources/list` probe
    #[inline]
    #[must_use]
    pub fn with_resources_check(mut self, enabled: bool) -> Self {
        self.check_resources_list = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gauntlet_sandbox::NetworkMode;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_toml_is_default() {
        assert_eq!(HarnessConfig::from_toml_str("").unwrap(), HarnessConfig::default());
    }

    #[test]
    fn partial_sections_keep_defaults() {
        let config = HarnessConfig::from_toml_str(
            r#"
            backend = "process"
            verdict = "all-tools"

            [options]
            tool_timeout_secs = 5
            network = "open"

            [toolchain]
            run_command = "node build/index.js"
            readiness_markers = []
            "#,
        )
        .unwrap();

        assert_eq!(config.backend, BackendKind::Process);
        assert_eq!(config.verdict, VerdictPolicy::AllTools);
        assert_eq!(config.options.tool_timeout_secs, 5);
        assert_eq!(config.options.network, NetworkMode::Open);
        assert_eq!(config.options.memory_limit_mb, 512);
        assert_eq!(config.toolchain.run_command, "node build/index.js");
        assert!(config.toolchain.readiness_markers.is_empty());
        assert_eq!(config.toolchain.base_image, "node:20-alpine");
    }

    #[test]
    fn unknown_keys_rejected() {
        let err = HarnessConfig::from_toml_str("[options]\ncpu = 2\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn zero_limits_rejected() {
        let err = HarnessConfig::from_toml_str("[options]\nmemory_limit_mb = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Options(_)));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gauntlet.toml");
        std::fs::write(&path, "backend = \"container\"\n").unwrap();
        assert_eq!(HarnessConfig::load(&path).unwrap().backend, BackendKind::Container);

        let missing = HarnessConfig::load(dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(missing, ConfigError::Read { .. }));
    }
}
