//! Result aggregation
//!
//! A [`TestReport`] collects checks and per-tool results for one session and
//! derives two verdicts that are deliberately kept apart:
//!
//! - [`TestReport::success`]: every declared tool passed
//! - [`TestReport::validation`]: critical checks passed and at least
//!   [`CHECK_THRESHOLD`] of all checks passed
//!
//! [`VerdictPolicy`] picks which one [`TestReport::passed`] answers with.

use crate::classify::ToolOutcome;
use crate::state::SessionState;
use chrono::{DateTime, Utc};
use gauntlet_protocol::Implementation;
use gauntlet_sandbox::{BackendKind, SessionId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::{self, Write as _};
use std::time::Duration;

/// Share of checks that must pass under [`VerdictPolicy::CheckThreshold`]
pub const CHECK_THRESHOLD: f64 = 0.8;

/// Which verdict gates a report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VerdictPolicy {
    /// Every declared tool passed
    #[default]
    AllTools,
    /// Critical checks passed and at least 80% of all checks passed
    CheckThreshold,
}

impl fmt::Display for VerdictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AllTools => f.write_str("all-tools"),
            Self::CheckThreshold => f.write_str("check-threshold"),
        }
    }
}

/// Phase that ended a session early
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Build,
    Launch,
    Cancelled,
    TimedOut,
    Internal,
}

/// One recorded check
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationCheck {
    pub name: String,
    pub passed: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    pub duration_ms: u64,
    /// Failing this check fails [`TestReport::validation`] outright
    pub critical: bool,
}

impl ValidationCheck {
    /// Passing check
    #[must_use]
    pub fn pass(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(name, true, message)
    }

    /// Failing check
    #[must_use]
    pub fn fail(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(name, false, message)
    }

    fn new(name: impl Into<String>, passed: bool, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed,
            message: message.into(),
            details: None,
            duration_ms: 0,
            critical: false,
        }
    }

    /// Mark as critical
    #[inline]
    #[must_use]
    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }

    /// With structured details
    #[inline]
    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// With measured duration
    #[inline]
    #[must_use]
    pub fn with_duration(mut self, elapsed: Duration) -> Self {
        self.duration_ms = millis(elapsed);
        self
    }
}

/// Outcome of exercising one tool
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolTestResult {
    pub tool: String,
    pub success: bool,
    /// Passed only because the tool wants credentials
    pub soft_pass: bool,
    pub execution_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Answer was a well-formed protocol message, whatever it said
    pub protocol_compliant: bool,
}

impl ToolTestResult {
    /// Build from a classified call
    #[must_use]
    pub fn from_outcome(tool: impl Into<String>, outcome: &ToolOutcome, elapsed: Duration) -> Self {
        Self {
            tool: tool.into(),
            success: outcome.success(),
            soft_pass: matches!(outcome, ToolOutcome::SoftPass { .. }),
            execution_time_ms: millis(elapsed),
            output: outcome.output().cloned(),
            error: outcome.message().map(str::to_string),
            protocol_compliant: outcome.protocol_compliant(),
        }
    }
}

/// Threshold view of a report, used for deployment gating
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub critical_passed: bool,
    pub passed_checks: usize,
    pub total_checks: usize,
    pub pass_rate: f64,
    pub threshold: f64,
    pub failed_critical: Vec<String>,
}

/// Everything known about one session
#[derive(Debug, Clone, Serialize)]
pub struct TestReport {
    pub session_id: SessionId,
    pub artifact_digest: String,
    pub backend: BackendKind,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub build_success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<Implementation>,
    pub declared_tools: usize,
    pub tool_results: Vec<ToolTestResult>,
    pub checks: Vec<ValidationCheck>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    /// Build, launch, handshake and abort messages
    pub errors: Vec<String>,
    /// Cleanup failures and protocol hygiene; never affect a verdict
    pub warnings: Vec<String>,
    pub states: Vec<SessionState>,
    /// All declared tools passed
    pub success: bool,
}

impl TestReport {
    /// Empty report for a session that is about to start
    #[must_use]
    pub fn new(
        session_id: SessionId,
        artifact_digest: impl Into<String>,
        backend: BackendKind,
        declared_tools: usize,
    ) -> Self {
        Self {
            session_id,
            artifact_digest: artifact_digest.into(),
            backend,
            started_at: Utc::now(),
            duration_ms: 0,
            build_success: false,
            server: None,
            declared_tools,
            tool_results: Vec::new(),
            checks: Vec::new(),
            failure: None,
            errors: Vec::new(),
            warnings: Vec::new(),
            states: Vec::new(),
            success: false,
        }
    }

    /// Append a check
    pub fn record_check(&mut self, check: ValidationCheck) {
        tracing::debug!(
            session_id = %self.session_id,
            check = %check.name,
            passed = check.passed,
            "check recorded"
        );
        self.checks.push(check);
    }

    /// Append a tool result
    pub fn record_tool(&mut self, result: ToolTestResult) {
        self.tool_results.push(result);
    }

    /// Append an error message
    pub fn record_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    /// Append a warning
    pub fn record_warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    /// Seal the report and derive [`TestReport::success`]
    pub fn finish(&mut self, states: &[SessionState], elapsed: Duration) {
        self.states = states.to_vec();
        self.duration_ms = millis(elapsed);
        self.success = self.build_success
            && self.failure.is_none()
            && self.tool_results.len() == self.declared_tools
            && self.tool_results.iter().all(|r| r.success);
    }

    /// Number of tools exercised
    #[inline]
    #[must_use]
    pub fn tools_tested(&self) -> usize {
        self.tool_results.len()
    }

    /// Number of tools that passed, soft passes included
    #[must_use]
    pub fn tools_passed(&self) -> usize {
        self.tool_results.iter().filter(|r| r.success).count()
    }

    /// Check by name
    #[must_use]
    pub fn check(&self, name: &str) -> Option<&ValidationCheck> {
        self.checks.iter().find(|c| c.name == name)
    }

    /// Tool result by name
    #[must_use]
    pub fn tool(&self, name: &str) -> Option<&ToolTestResult> {
        self.tool_results.iter().find(|r| r.tool == name)
    }

    /// Threshold verdict
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn validation(&self) -> ValidationReport {
        let total_checks = self.checks.len();
        let passed_checks = self.checks.iter().filter(|c| c.passed).count();
        let failed_critical: Vec<String> = self
            .checks
            .iter()
            .filter(|c| c.critical && !c.passed)
            .map(|c| c.name.clone())
            .collect();
        let pass_rate = if total_checks == 0 {
            0.0
        } else {
            passed_checks as f64 / total_checks as f64
        };
        let critical_passed = failed_critical.is_empty() && self.failure.is_none();
        ValidationReport {
            valid: critical_passed && total_checks > 0 && pass_rate >= CHECK_THRESHOLD,
            critical_passed,
            passed_checks,
            total_checks,
            pass_rate,
            threshold: CHECK_THRESHOLD,
            failed_critical,
        }
    }

    /// Verdict under `policy`
    #[must_use]
    pub fn passed(&self, policy: VerdictPolicy) -> bool {
        match policy {
            VerdictPolicy::AllTools => self.success,
            VerdictPolicy::CheckThreshold => self.validation().valid,
        }
    }

    /// Plain-text rendering for terminals
    #[must_use]
    pub fn generate_text(&self) -> String {
        let mut out = String::new();
        let validation = self.validation();

        let _ = writeln!(out, "Gauntlet Report");
        let _ = writeln!(out, "===============");
        let _ = writeln!(out, "Session:  {}", self.session_id);
        let _ = writeln!(out, "Artifact: {}", self.artifact_digest);
        let _ = writeln!(out, "Backend:  {}", self.backend);
        if let Some(server) = &self.server {
            let _ = writeln!(out, "Server:   {} {}", server.name, server.version);
        }
        let _ = writeln!(out, "Duration: {}ms", self.duration_ms);
        let _ = writeln!(out, "Build:    {}", if self.build_success { "OK" } else { "FAILED" });
        let _ = writeln!(out);

        let _ = writeln!(
            out,
            "Tools: {}/{} passed ({} declared)",
            self.tools_passed(),
            self.tools_tested(),
            self.declared_tools
        );
        for result in &self.tool_results {
            let mark = match (result.success, result.soft_pass) {
                (true, false) => "✓",
                (true, true) => "~",
                (false, _) => "✗",
            };
            let _ = write!(out, "  {mark} {} ({}ms)", result.tool, result.execution_time_ms);
            if let Some(error) = &result.error {
                let _ = write!(out, ": {error}");
            }
            let _ = writeln!(out);
        }
        let _ = writeln!(out);

        let _ = writeln!(
            out,
            "Checks: {}/{} passed ({:.1}%)",
            validation.passed_checks,
            validation.total_checks,
            validation.pass_rate * 100.0
        );
        for check in self.checks.iter().filter(|c| !c.passed) {
            let tag = if check.critical { " [critical]" } else { "" };
            let _ = writeln!(out, "  ✗{tag} {}: {}", check.name, check.message);
        }

        for (title, lines) in [("Errors", &self.errors), ("Warnings", &self.warnings)] {
            if !lines.is_empty() {
                let _ = writeln!(out);
                let _ = writeln!(out, "{title}:");
                for line in lines {
                    let _ = writeln!(out, "  - {line}");
                }
            }
        }

        let _ = writeln!(out);
        let verdict = |ok: bool| if ok { "PASSED" } else { "FAILED" };
        let _ = writeln!(out, "Verdict ({}): {}", VerdictPolicy::AllTools, verdict(self.success));
        let _ = writeln!(
            out,
            "Verdict ({}): {}",
            VerdictPolicy::CheckThreshold,
            verdict(validation.valid)
        );
        out
    }
}

pub(crate) fn millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}
