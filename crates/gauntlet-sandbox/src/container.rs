//! Container backend
//!
//! Builds an image from the materialized workspace and runs it with
//! `docker run -i`, talking to the server through the attached client's
//! stdio. Every launch applies the full isolation policy: no network unless
//! requested, read-only root with a scratch tmpfs, all capabilities dropped,
//! no privilege escalation, and CPU, memory, pid and file-descriptor caps.

use crate::backend::ExecutionBackend;
use crate::error::{BuildError, CleanupError, CleanupReport, LaunchError};
use crate::options::{BackendKind, NetworkMode, TestOptions, Toolchain};
use crate::process::{await_ready, drain_stderr, run_step, terminate, ProcessGroup};
use crate::session::{ExecutionSession, InstanceHandle, SessionIo};
use gauntlet_artifact::GeneratedArtifact;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Deadline for `docker stop` / `rm` / `rmi` beyond the grace period
const CLI_SLACK: Duration = Duration::from_secs(10);

/// Container-isolated backend
#[derive(Debug, Clone)]
pub struct ContainerBackend {
    toolchain: Toolchain,
    docker: String,
}

impl ContainerBackend {
    /// Create backend using the `docker` CLI
    #[inline]
    #[must_use]
    pub fn new(toolchain: Toolchain) -> Self {
        Self {
            toolchain,
            docker: "docker".to_string(),
        }
    }

    /// Builder: use a different CLI binary (e.g. `podman`)
    #[inline]
    #[must_use]
    pub fn with_cli(mut self, program: impl Into<String>) -> Self {
        self.docker = program.into();
        self
    }

    /// Dockerfile for the configured toolchain
    #[must_use]
    pub fn dockerfile(&self) -> String {
        let mut lines = vec![
            format!("FROM {}", self.toolchain.base_image),
            "WORKDIR /app".to_string(),
            "COPY . .".to_string(),
        ];
        for step in self.toolchain.build_steps() {
            lines.push(format!("RUN {step}"));
        }
        let run = serde_json::to_string(&self.toolchain.run_command)
            .unwrap_or_else(|_| format!("\"{}\"", self.toolchain.run_command));
        lines.push(format!("CMD [\"sh\", \"-c\", {run}]"));
        let mut text = lines.join("\n");
        text.push('\n');
        text
    }

    /// Image tag for a session
    #[must_use]
    pub fn image_tag(session: &ExecutionSession, artifact: &GeneratedArtifact) -> String {
        format!("gauntlet-{}-{}", artifact.digest().short(), session.id().slug())
    }

    /// Container name for a session
    #[must_use]
    pub fn container_name(session: &ExecutionSession) -> String {
        format!("gauntlet-{}", session.id().slug())
    }

    /// Arguments to `docker run`, excluding the image
    #[must_use]
    pub fn run_args(name: &str, options: &TestOptions) -> Vec<String> {
        let mut args: Vec<String> = ["run", "-i", "--name", name]
            .into_iter()
            .map(String::from)
            .collect();

        if options.network == NetworkMode::Isolated {
            args.push("--network=none".to_string());
        }
        args.extend(
            [
                "--read-only",
                "--tmpfs",
                "/tmp:rw,noexec,nosuid,size=64m",
                "--cap-drop",
                "ALL",
                "--security-opt",
                "no-new-privileges",
            ]
            .into_iter()
            .map(String::from),
        );
        args.push(format!("--cpus={}", options.cpu_limit));
        args.push(format!("--memory={}m", options.memory_limit_mb));
        args.push(format!("--memory-swap={}m", options.memory_limit_mb));
        args.push(format!("--pids-limit={}", options.pids_limit));
        args.push(format!(
            "--ulimit=nofile={0}:{0}",
            options.nofile_limit
        ));
        args
    }

    fn cli(&self) -> Command {
        let mut cmd = Command::new(&self.docker);
        cmd.stdin(Stdio::null());
        cmd
    }

    /// Run a short CLI command; `Err` carries a readable reason
    async fn cli_quiet(&self, args: &[&str], timeout: Duration) -> Result<(), String> {
        let mut cmd = self.cli();
        cmd.args(args)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let child = cmd.spawn().map_err(|e| e.to_string())?;
        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(out)) if out.status.success() => Ok(()),
            Ok(Ok(out)) => Err(String::from_utf8_lossy(&out.stderr).trim().to_string()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("timed out after {}s", timeout.as_secs())),
        }
    }
}

#[async_trait::async_trait]
impl ExecutionBackend for ContainerBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Container
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

        let dockerfile = session.workspace().join("Dockerfile");
        std::fs::write(&dockerfile, self.dockerfile())
            .map_err(|e| BuildError::Materialize(gauntlet_artifact::ArtifactError::io_error(&dockerfile, e)))?;

        let tag = Self::image_tag(session, artifact);
        // Recorded up front so a half-built image is still removed.
        session.set_image(tag.clone());

        tracing::info!(session_id = %session.id(), image = %tag, "building image");
        let mut cmd = self.cli();
        cmd.arg("build").arg("-t").arg(&tag).arg(".").current_dir(session.workspace());
        run_step(
            "docker build",
            cmd,
            options.build_timeout(),
            options.kill_grace(),
            session.stderr(),
        )
        .await
    }

    async fn launch(
        &self,
        session: &mut ExecutionSession,
        options: &TestOptions,
    ) -> Result<SessionIo, LaunchError> {
        let image = session.image().ok_or(LaunchError::NotBuilt)?.to_string();
        let name = Self::container_name(session);

        let mut cmd = self.cli();
        cmd.args(Self::run_args(&name, options))
            .arg(&image)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let mut client = ProcessGroup::spawn(&mut cmd).map_err(|source| LaunchError::Spawn {
            program: self.docker.clone(),
            source,
        })?;

        let child = client.child_mut();
        let stdin = child.stdin.take().ok_or(LaunchError::MissingStdio("stdin"))?;
        let stdout = child.stdout.take().ok_or(LaunchError::MissingStdio("stdout"))?;
        let stderr = child.stderr.take().ok_or(LaunchError::MissingStdio("stderr"))?;
        let ready = drain_stderr(stderr, session.stderr().clone(), &self.toolchain);

        tracing::info!(session_id = %session.id(), container = %name, "launched container");
        session.set_instance(InstanceHandle::Container { name, client });

        let log = session.stderr().clone();
        let Some(InstanceHandle::Container { client, .. }) = session.instance_mut() else {
            return Err(LaunchError::MissingStdio("container handle"));
        };
        await_ready(client.child_mut(), &ready, &self.toolchain, options.readiness_timeout(), &log).await?;

        Ok(SessionIo::new(stdout, stdin))
    }

    async fn teardown(&self, session: &mut ExecutionSession, options: &TestOptions) -> CleanupReport {
        let mut report = CleanupReport::default();
        let grace = options.kill_grace();
        let cli_timeout = grace + CLI_SLACK;

        if let Some(instance) = session.take_instance() {
            let label = instance.label();
            match instance {
                InstanceHandle::Container { name, mut client } => {
                    let grace_arg = grace.as_secs().to_string();
                    match self.cli_quiet(&["stop", "-t", &grace_arg, &name], cli_timeout).await {
                        Ok(()) => report.stopped_instance = true,
                        Err(message) => tracing::debug!(container = %name, %message, "docker stop failed"),
                    }
                    if let Err(message) = self.cli_quiet(&["rm", "-f", &name], cli_timeout).await {
                        report.record(CleanupError::StopFailed {
                            instance: label.clone(),
                            message,
                        });
                    } else {
                        report.stopped_instance = true;
                    }
                    if let Err(e) = terminate(&mut client, &label, grace).await {
                        report.record(e);
                    }
                }
                InstanceHandle::Process(mut group) => {
                    if let Err(e) = terminate(&mut group, &label, grace).await {
                        report.record(e);
                    } else {
                        report.stopped_instance = true;
                    }
                }
                InstanceHandle::Task(task) => task.abort(),
            }
        }

        if let Some(image) = session.take_image() {
            if options.cleanup {
                match self.cli_quiet(&["rmi", "-f", &image], cli_timeout).await {
                    Ok(()) => report.removed_image = true,
                    Err(message) => report.record(CleanupError::ImageRemoval { image, message }),
                }
            }
        }

        session.close_workspace(options.cleanup, &mut report);
        tracing::debug!(session_id = %session.id(), clean = report.is_clean(), "container teardown done");
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionId;

    #[test]
    fn run_args_apply_isolation_policy() {
        let args = ContainerBackend::run_args("gauntlet-x", &TestOptions::default());
        for expected in [
            "--network=none",
            "--read-only",
            "--cap-drop",
            "ALL",
            "no-new-privileges",
            "--cpus=0.5",
            "--memory=512m",
            "--memory-swap=512m",
            "--pids-limit=64",
            "--ulimit=nofile=1024:1024",
        ] {
            assert!(args.iter().any(|a| a == expected), "missing {expected}");
        }
    }

    #[test]
    fn open_network_drops_network_flag() {
        let opts = TestOptions::default().with_network(NetworkMode::Open);
        let args = ContainerBackend::run_args("gauntlet-x", &opts);
        assert!(!args.iter().any(|a| a.starts_with("--network")));
        assert!(args.iter().any(|a| a == "--read-only"));
    }

    #[test]
    fn dockerfile_runs_build_steps() {
        let backend = ContainerBackend::new(Toolchain::node());
        let text = backend.dockerfile();
        assert!(text.starts_with("FROM node:20-alpine\n"));
        assert!(text.contains("RUN npm install --no-audit --no-fund"));
        assert!(text.contains("RUN npm run build"));
        assert!(text.contains(r#"CMD ["sh", "-c", "node dist/index.js"]"#));
    }

    #[test]
    fn names_are_lowercase() {
        let session = ExecutionSession::create(SessionId::new()).unwrap();
        let name = ContainerBackend::container_name(&session);
        assert_eq!(name, name.to_lowercase());
    }

    /// A container CLI that logs its arguments and always fails
    #[cfg(unix)]
    fn failing_cli(dir: &std::path::Path) -> (String, std::path::PathBuf) {
        use std::os::unix::fs::PermissionsExt;

        let log = dir.join("calls.log");
        let script = dir.join("docker");
        std::fs::write(
            &script,
            format!(
                "#!/bin/sh\necho \"$*\" >> '{}'\necho 'daemon unavailable' >&2\nexit 1\n",
                log.display()
            ),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        (script.display().to_string(), log)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn teardown_attempts_every_step_when_cli_fails() {
        let bin = tempfile::tempdir().unwrap();
        let (cli, calls) = failing_cli(bin.path());
        let backend = ContainerBackend::new(Toolchain::node()).with_cli(cli);

        let mut session = ExecutionSession::create(SessionId::new()).unwrap();
        let workspace = session.workspace().to_path_buf();
        session.set_image("gauntlet-test-image");
        let mut cmd = Command::new("sleep");
        cmd.arg("30").kill_on_drop(true);
        let client = ProcessGroup::spawn(&mut cmd).unwrap();
        session.set_instance(InstanceHandle::Container {
            name: "gauntlet-test".to_string(),
            client,
        });

        let opts = TestOptions::default().with_kill_grace_secs(1);
        let report = backend.teardown(&mut session, &opts).await;

        let calls = std::fs::read_to_string(calls).unwrap();
        let calls: Vec<&str> = calls.lines().collect();
        assert_eq!(
            calls,
            vec!["stop -t 1 gauntlet-test", "rm -f gauntlet-test", "rmi -f gauntlet-test-image"]
        );

        assert!(!report.is_clean());
        assert!(report
            .errors
            .iter()
            .any(|e| matches!(e, CleanupError::StopFailed { message, .. } if message.contains("daemon unavailable"))));
        assert!(report.errors.iter().any(|e| matches!(
            e,
            CleanupError::ImageRemoval { image, .. } if image == "gauntlet-test-image"
        )));
        assert!(!report.removed_image);
        assert!(report.removed_workspace);
        assert!(!workspace.exists());
        assert_eq!(session.instance_status(), crate::session::InstanceStatus::NotLaunched);
        assert!(session.image().is_none());
    }

    #[tokio::test]
    async fn launch_without_build_fails() {
        let backend = ContainerBackend::new(Toolchain::node());
        let mut session = ExecutionSession::create(SessionId::new()).unwrap();
        let err = backend
            .launch(&mut session, &TestOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LaunchError::NotBuilt));
    }
}
