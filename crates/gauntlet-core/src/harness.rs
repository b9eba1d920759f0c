//! Harness orchestrator
//!
//! Drives one session through build, launch, handshake, tool enumeration,
//! tool exercise and the optional resource probe, then tears it down on
//! every exit path.
//!
//! # Failure handling
//!
//! | Failure | Effect |
//! |---|---|
//! | build / launch | remaining phases skipped, zero tools tested |
//! | handshake | failed critical check, tools still attempted |
//! | one tool | recorded for that tool, next tool still runs |
//! | panic, cancel, total timeout | phases abandoned, teardown still runs |
//! | teardown step | warning only |

use crate::classify::classify_call;
use crate::config::HarnessConfig;
use crate::error::{HarnessError, PhaseError};
use crate::events::{catch_panic, EventBus, ProgressCallback, ProgressEvent, ProgressPhase};
use crate::report::{TestReport, ToolTestResult, ValidationCheck};
use crate::samples::sample_arguments;
use crate::state::{SessionState, StateTracker};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use gauntlet_artifact::GeneratedArtifact;
use gauntlet_protocol::{Implementation, ProtocolClient, ToolDescriptor};
use gauntlet_schema::{SchemaChecker, SchemaReport};
use gauntlet_sandbox::{
    backend_for, BackendKind, ExecutionBackend, ExecutionSession, InstanceStatus, SessionId,
    TestOptions,
};
use serde_json::json;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;

/// Check every declared tool schema without running anything
#[must_use]
pub fn check_declared_schemas(artifact: &GeneratedArtifact) -> Vec<SchemaReport> {
    let checker = SchemaChecker::new();
    artifact
        .tools()
        .iter()
        .map(|tool| checker.check(&tool.name, &tool.input_schema))
        .collect()
}

/// Session orchestrator
///
/// Share one instance (e.g. behind an `Arc`) across concurrent sessions; each
/// session owns its own workspace, instance and protocol client.
pub struct Harness {
    config: HarnessConfig,
    backend: Arc<dyn ExecutionBackend>,
    events: EventBus,
    sessions: DashMap<SessionId, watch::Sender<bool>>,
}

impl fmt::Debug for Harness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Harness")
            .field("backend", &self.backend.kind())
            .field("active_sessions", &self.sessions.len())
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}

impl Harness {
    /// Create a harness using the backend named in `config`
    #[must_use]
    pub fn new(config: HarnessConfig) -> Self {
        let backend = backend_for(config.backend, config.toolchain.clone());
        Self::with_backend(config, backend)
    }

    /// Create a harness with an explicit backend
    #[must_use]
    pub fn with_backend(config: HarnessConfig, backend: Arc<dyn ExecutionBackend>) -> Self {
        Self {
            config,
            backend,
            events: EventBus::new(),
            sessions: DashMap::new(),
        }
    }

    /// Configuration in use
    #[inline]
    #[must_use]
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Backend strategy in use
    #[inline]
    #[must_use]
    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    /// Progress registry
    #[inline]
    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Subscribe to a session's progress; see [`EventBus::register`]
    pub fn register(&self, session_id: SessionId, callback: ProgressCallback) -> Option<ProgressCallback> {
        self.events.register(session_id, callback)
    }

    /// Drop a session's subscription
    pub fn unregister(&self, session_id: SessionId) -> Option<ProgressCallback> {
        self.events.unregister(session_id)
    }

    /// Sessions currently running
    #[must_use]
    pub fn active_sessions(&self) -> Vec<SessionId> {
        self.sessions.iter().map(|entry| *entry.key()).collect()
    }

    /// Abort a running session
    ///
    /// The session stops at its next suspension point, tears down, and
    /// returns a failed report. Returns false if no such session is running.
    pub fn cancel(&self, session_id: SessionId) -> bool {
        match self.sessions.get(&session_id) {
            Some(entry) => {
                tracing::info!(session_id = %session_id, "cancellation requested");
                entry.value().send_replace(true);
                true
            }
            None => false,
        }
    }

    /// Test an artifact with the configured default options
    ///
    /// # Errors
    /// See [`Harness::run_session`].
    pub async fn run(&self, artifact: &GeneratedArtifact) -> Result<TestReport, HarnessError> {
        let options = self.config.options.clone();
        self.run_session(SessionId::new(), artifact, &options).await
    }

    /// Test an artifact under a caller-chosen session id
    ///
    /// Register a progress callback for `session_id` before calling to
    /// observe the run; it is unregistered when the session ends. Every
    /// failure after the workspace exists is reported in the returned
    /// [`TestReport`], never as an error.
    ///
    /// # Errors
    /// - [`HarnessError::InvalidOptions`] if `options` fail validation
    /// - [`HarnessError::DuplicateSession`] if `session_id` is already running
    /// - [`HarnessError::Workspace`] if the workspace cannot be created
    pub async fn run_session(
        &self,
        session_id: SessionId,
        artifact: &GeneratedArtifact,
        options: &TestOptions,
    ) -> Result<TestReport, HarnessError> {
        options.validate()?;

        let cancel_rx = match self.sessions.entry(session_id) {
            Entry::Occupied(_) => return Err(HarnessError::DuplicateSession(session_id.to_string())),
            Entry::Vacant(slot) => {
                let (tx, rx) = watch::channel(false);
                slot.insert(tx);
                rx
            }
        };

        let mut session = match ExecutionSession::create(session_id) {
            Ok(session) => session,
            Err(e) => {
                self.sessions.remove(&session_id);
                self.events.unregister(session_id);
                return Err(HarnessError::Workspace(e));
            }
        };

        let report = self.drive(&mut session, artifact, options, cancel_rx).await;

        self.sessions.remove(&session_id);
        self.events.unregister(session_id);
        Ok(report)
    }

    async fn drive(
        &self,
        session: &mut ExecutionSession,
        artifact: &GeneratedArtifact,
        options: &TestOptions,
        cancel_rx: watch::Receiver<bool>,
    ) -> TestReport {
        let started = Instant::now();
        let id = session.id();
        let digest = artifact.digest();
        tracing::info!(
            session_id = %id,
            artifact = %digest.short(),
            backend = %self.backend.kind(),
            tools = artifact.tools().len(),
            "session started"
        );

        let mut run = SessionRun {
            harness: self,
            id,
            tracker: StateTracker::new(),
            report: TestReport::new(id, digest.short(), self.backend.kind(), artifact.tools().len()),
        };

        let outcome = {
            let phases = catch_panic(run.execute(session, artifact, options));
            tokio::select! {
                result = phases => match result {
                    Ok(result) => result,
                    Err(panic) => Err(PhaseError::Internal(panic)),
                },
                () = tokio::time::sleep(options.total_timeout()) => Err(PhaseError::TimedOut {
                    timeout_secs: options.total_timeout_secs,
                }),
                () = cancelled(cancel_rx) => Err(PhaseError::Cancelled),
            }
        };

        let failure = outcome.err();
        if let Some(error) = &failure {
            tracing::warn!(session_id = %id, error = %error, "session aborted");
            run.report.failure = Some(error.kind());
            run.report.record_error(error.to_string());
        }

        run.teardown(session, options).await;
        run.advance(SessionState::Closed);

        let SessionRun {
            tracker, mut report, ..
        } = run;
        report.finish(tracker.history(), started.elapsed());

        let (phase, message) = match &failure {
            Some(error) => (ProgressPhase::Error, error.to_string()),
            None => (
                ProgressPhase::Complete,
                format!(
                    "{}/{} tools passed",
                    report.tools_passed(),
                    report.declared_tools
                ),
            ),
        };
        self.events.publish(&ProgressEvent::new(id, phase, message));

        tracing::info!(
            session_id = %id,
            success = report.success,
            valid = report.validation().valid,
            elapsed_ms = report.duration_ms,
            "session finished"
        );
        report
    }
}

async fn cancelled(mut rx: watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Mutable state of one session while its phases run
struct SessionRun<'h> {
    harness: &'h Harness,
    id: SessionId,
    tracker: StateTracker,
    report: TestReport,
}

impl SessionRun<'_> {
    fn advance(&mut self, to: SessionState) {
        if let Err(e) = self.tracker.advance(to) {
            tracing::error!(session_id = %self.id, error = %e, "state machine violation");
        }
    }

    fn publish(&self, event: ProgressEvent) {
        self.harness.events.publish(&event);
    }

    fn phase(&self, phase: ProgressPhase, message: impl Into<String>) {
        self.publish(ProgressEvent::new(self.id, phase, message));
    }

    async fn execute(
        &mut self,
        session: &mut ExecutionSession,
        artifact: &GeneratedArtifact,
        options: &TestOptions,
    ) -> Result<(), PhaseError> {
        let harness = self.harness;
        let backend = Arc::clone(&harness.backend);
        let config = &harness.config;

        for schema in check_declared_schemas(artifact) {
            self.record_schema("declared", &schema);
        }

        // Build
        self.advance(SessionState::Building);
        self.phase(ProgressPhase::Building, "building artifact");
        let started = Instant::now();
        if let Err(e) = backend.build(session, artifact, options).await {
            self.advance(SessionState::BuildFailed);
            self.report.record_check(
                ValidationCheck::fail("build", e.to_string())
                    .critical()
                    .with_duration(started.elapsed()),
            );
            return Err(e.into());
        }
        self.advance(SessionState::Built);
        self.report.build_success = true;
        self.report.record_check(
            ValidationCheck::pass("build", "artifact built")
                .critical()
                .with_duration(started.elapsed()),
        );

        // Launch
        self.advance(SessionState::Launching);
        self.phase(ProgressPhase::Starting, "starting server");
        let started = Instant::now();
        let io = match backend.launch(session, options).await {
            Ok(io) => io,
            Err(e) => {
                self.advance(SessionState::LaunchFailed);
                self.report.record_check(
                    ValidationCheck::fail("launch", e.to_string())
                        .critical()
                        .with_duration(started.elapsed()),
                );
                return Err(e.into());
            }
        };
        self.advance(SessionState::Ready);
        self.report.record_check(
            ValidationCheck::pass("launch", "server ready").with_duration(started.elapsed()),
        );

        let client = ProtocolClient::attach(io.reader, io.writer);
        let timeout = options.tool_timeout();

        // Handshake
        self.advance(SessionState::Handshaking);
        self.phase(ProgressPhase::Testing, "performing handshake");
        let started = Instant::now();
        let identity = Implementation::new(config.client_name.clone(), crate::VERSION);
        match client.initialize(identity, timeout).await {
            Ok(init) => {
                self.advance(SessionState::Initialized);
                self.report.record_check(
                    ValidationCheck::pass(
                        "handshake",
                        format!(
                            "connected to {} {} (protocol {})",
                            init.server_info.name, init.server_info.version, init.protocol_version
                        ),
                    )
                    .critical()
                    .with_details(json!({
                        "protocolVersion": init.protocol_version,
                        "capabilities": init.capabilities,
                    }))
                    .with_duration(started.elapsed()),
                );
                self.report.server = Some(init.server_info);
            }
            Err(e) => {
                self.advance(SessionState::HandshakeFailed);
                tracing::warn!(session_id = %self.id, error = %e, "handshake failed, continuing");
                self.report.record_check(
                    ValidationCheck::fail("handshake", e.to_string())
                        .critical()
                        .with_duration(started.elapsed()),
                );
                self.report.record_error(e.to_string());
            }
        }

        // Enumerate tools
        self.advance(SessionState::EnumeratingTools);
        let started = Instant::now();
        match client.list_tools(timeout).await {
            Ok(listed) => {
                self.report.record_check(
                    ValidationCheck::pass("tools/list", format!("{} tools listed", listed.len()))
                        .critical()
                        .with_duration(started.elapsed()),
                );
                self.compare_tools(artifact, &listed);
                let checker = SchemaChecker::new();
                for tool in &listed {
                    self.record_schema("listed", &checker.check(&tool.name, &tool.input_schema));
                }
            }
            Err(e) => {
                self.report.record_check(
                    ValidationCheck::fail("tools/list", e.to_string())
                        .critical()
                        .with_duration(started.elapsed()),
                );
            }
        }

        // Exercise tools, strictly one at a time
        self.advance(SessionState::ExercisingTools);
        let total = artifact.tools().len();
        for (index, tool) in artifact.tools().iter().enumerate() {
            self.publish(
                ProgressEvent::new(self.id, ProgressPhase::TestingTool, format!("testing {}", tool.name))
                    .with_tool(index + 1, total),
            );
            let arguments = sample_arguments(&tool.input_schema);
            let started = Instant::now();
            let outcome = classify_call(client.call_tool(&tool.name, arguments, timeout).await);
            let elapsed = started.elapsed();
            let result = ToolTestResult::from_outcome(&tool.name, &outcome, elapsed);

            tracing::info!(
                session_id = %self.id,
                tool = %tool.name,
                success = result.success,
                elapsed_ms = result.execution_time_ms,
                "tool exercised"
            );
            let check = if result.success {
                ValidationCheck::pass(
                    format!("tool:{}", tool.name),
                    outcome.message().unwrap_or("tool returned content"),
                )
            } else {
                ValidationCheck::fail(
                    format!("tool:{}", tool.name),
                    outcome.message().unwrap_or("tool failed"),
                )
            };
            self.report.record_check(check.with_duration(elapsed));
            self.report.record_tool(result);
        }

        // Optional resources
        if config.check_resources_list {
            self.advance(SessionState::EnumeratingResources);
            let started = Instant::now();
            let check = match client.list_resources(timeout).await {
                Ok(resources) => ValidationCheck::pass(
                    "resources/list",
                    format!("{} resources listed", resources.len()),
                ),
                Err(e) if e.is_method_not_found() => ValidationCheck::pass(
                    "resources/list",
                    "resources capability not implemented",
                ),
                Err(e) => ValidationCheck::fail("resources/list", e.to_string()),
            };
            self.report.record_check(check.with_duration(started.elapsed()));
        }

        if options.check_resources {
            match backend.status(session).await {
                InstanceStatus::Running => self.report.record_check(ValidationCheck::pass(
                    "liveness",
                    "server still running after exercise",
                )),
                InstanceStatus::Exited(status) => self.report.record_check(ValidationCheck::fail(
                    "liveness",
                    format!("server exited during the session ({status})"),
                )),
                InstanceStatus::NotLaunched => {}
            }
        }

        let stats = client.stats();
        if !stats.is_clean() {
            self.report.record_warning(format!(
                "server stdout was not clean: {} non-protocol lines, {} unmatched responses, {} server requests",
                stats.discarded_lines, stats.unmatched_responses, stats.server_requests
            ));
        }
        Ok(())
    }

    fn record_schema(&mut self, source: &str, schema: &SchemaReport) {
        let name = format!("schema:{source}:{}", schema.tool);
        let check = if schema.valid {
            ValidationCheck::pass(name, schema.summary())
        } else {
            ValidationCheck::fail(name, schema.summary())
        };
        let check = if schema.warnings.is_empty() {
            check
        } else {
            check.with_details(json!({ "warnings": schema.warnings }))
        };
        self.report.record_check(check);
    }

    fn compare_tools(&mut self, artifact: &GeneratedArtifact, listed: &[ToolDescriptor]) {
        let declared: BTreeSet<&str> = artifact.tools().iter().map(|t| t.name.as_str()).collect();
        let listed: BTreeSet<&str> = listed.iter().map(|t| t.name.as_str()).collect();
        let missing: Vec<&str> = declared.difference(&listed).copied().collect();
        let extra: Vec<&str> = listed.difference(&declared).copied().collect();

        let check = if missing.is_empty() {
            let message = if extra.is_empty() {
                format!("all {} declared tools listed", declared.len())
            } else {
                format!("all declared tools listed, plus undeclared: {}", extra.join(", "))
            };
            ValidationCheck::pass("tools:declared", message)
        } else {
            ValidationCheck::fail(
                "tools:declared",
                format!("declared but not listed: {}", missing.join(", ")),
            )
        };
        self.report
            .record_check(check.with_details(json!({ "missing": missing, "extra": extra })));
    }

    async fn teardown(&mut self, session: &mut ExecutionSession, options: &TestOptions) {
        self.tracker.begin_teardown();
        self.phase(ProgressPhase::Cleanup, "cleaning up");

        let backend = Arc::clone(&self.harness.backend);
        match catch_panic(backend.teardown(session, options)).await {
            Ok(cleanup) => {
                for message in cleanup.messages() {
                    self.report.record_warning(message);
                }
            }
            Err(panic) => {
                tracing::error!(session_id = %self.id, panic = %panic, "teardown panicked");
                self.report.record_warning(format!("teardown panicked: {panic}"));
            }
        }

        // A panicking or partial teardown can leave the workspace behind.
        if session.has_workspace() {
            let mut cleanup = gauntlet_sandbox::CleanupReport::default();
            session.close_workspace(options.cleanup, &mut cleanup);
            for message in cleanup.messages() {
                self.report.record_warning(message);
            }
        }
    }
}
