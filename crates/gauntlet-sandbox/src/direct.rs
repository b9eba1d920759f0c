//! Direct-process backend
//!
//! Builds and runs the artifact as a same-host subprocess. Network access is
//! left open and no resource ceilings are applied.

use crate::backend::ExecutionBackend;
use crate::error::{BuildError, CleanupReport, LaunchError};
use crate::options::{BackendKind, TestOptions, Toolchain};
use crate::process::{await_ready, drain_stderr, run_step, shell, terminate, ProcessGroup};
use crate::session::{ExecutionSession, InstanceHandle, SessionIo};
use gauntlet_artifact::GeneratedArtifact;
use std::process::Stdio;

/// Same-host subprocess backend
#[derive(Debug, Clone)]
pub struct ProcessBackend {
    toolchain: Toolchain,
}

impl ProcessBackend {
    /// Create backend for a toolchain
    #[inline]
    #[must_use]
    pub fn new(toolchain: Toolchain) -> Self {
        Self { toolchain }
    }

    /// Toolchain in use
    #[inline]
    #[must_use]
    pub fn toolchain(&self) -> &Toolchain {
        &self.toolchain
    }
}

#[async_trait::async_trait]
impl ExecutionBackend for ProcessBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Process
    }

    async fn build(
        &self,
        session: &mut ExecutionSession,
        artifact: &GeneratedArtifact,
        options: &TestOptions,
    ) -> Result<(), BuildError> {
        if !session.has_workspace() {
            return Err(BuildError::WorkspaceMissing);
        }
        artifact.materialize(session.workspace(), &self.toolchain.layout())?;

        for step in self.toolchain.build_steps() {
            tracing::info!(session_id = %session.id(), step, "running build step");
            run_step(
                step,
                shell(step, session.workspace()),
                options.build_timeout(),
                options.kill_grace(),
                session.stderr(),
            )
            .await?;
        }
        Ok(())
    }

    async fn launch(
        &self,
        session: &mut ExecutionSession,
        options: &TestOptions,
    ) -> Result<SessionIo, LaunchError> {
        if !session.has_workspace() {
            return Err(LaunchError::NotBuilt);
        }

        let run = format!("exec {}", self.toolchain.run_command);
        let mut cmd = shell(&run, session.workspace());
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let mut group = ProcessGroup::spawn(&mut cmd).map_err(|source| LaunchError::Spawn {
            program: self.toolchain.run_command.clone(),
            source,
        })?;

        let child = group.child_mut();
        let stdin = child.stdin.take().ok_or(LaunchError::MissingStdio("stdin"))?;
        let stdout = child.stdout.take().ok_or(LaunchError::MissingStdio("stdout"))?;
        let stderr = child.stderr.take().ok_or(LaunchError::MissingStdio("stderr"))?;
        let ready = drain_stderr(stderr, session.stderr().clone(), &self.toolchain);

        tracing::info!(
            session_id = %session.id(),
            pgid = group.pgid().unwrap_or_default(),
            "launched process"
        );
        session.set_instance(InstanceHandle::Process(group));

        let log = session.stderr().clone();
        let Some(InstanceHandle::Process(group)) = session.instance_mut() else {
            return Err(LaunchError::MissingStdio("process handle"));
        };
        await_ready(group.child_mut(), &ready, &self.toolchain, options.readiness_timeout(), &log).await?;

        Ok(SessionIo::new(stdout, stdin))
    }

    async fn teardown(&self, session: &mut ExecutionSession, options: &TestOptions) -> CleanupReport {
        let mut report = CleanupReport::default();

        if let Some(instance) = session.take_instance() {
            let label = instance.label();
            match instance {
                InstanceHandle::Process(mut group) | InstanceHandle::Container { client: mut group, .. } => {
                    match terminate(&mut group, &label, options.kill_grace()).await {
                        Ok(_) => report.stopped_instance = true,
                        Err(e) => report.record(e),
                    }
                }
                InstanceHandle::Task(task) => {
                    task.abort();
                    report.stopped_instance = true;
                }
            }
        }

        session.close_workspace(options.cleanup, &mut report);
        tracing::debug!(session_id = %session.id(), clean = report.is_clean(), "process teardown done");
        report
    }
}
