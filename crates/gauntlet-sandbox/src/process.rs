//! Child-process plumbing shared by both backends
//!
//! Every child is spawned as the leader of its own process group so that
//! termination reaches anything it forked. Also covers bounded build steps,
//! stderr draining and readiness waiting.

use crate::error::{BuildError, CleanupError, LaunchError};
use crate::options::Toolchain;
use crate::session::StderrLog;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Bytes of build output kept in a [`BuildError`]
const OUTPUT_TAIL_BYTES: usize = 2000;

/// Wait after a forced kill before giving up
const KILL_WAIT: Duration = Duration::from_secs(2);

/// Readiness poll interval
const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Time given to the stderr drain after the child exits
const DRAIN_SETTLE: Duration = Duration::from_millis(100);

/// Time given to collect a finished step's output
const OUTPUT_WAIT: Duration = Duration::from_secs(1);

/// Lines of stderr quoted in launch errors
pub(crate) const STDERR_TAIL_LINES: usize = 8;

/// A child running as the leader of its own process group
///
/// The group id is captured at spawn time, so stragglers can still be
/// signalled after the leader itself has been reaped.
#[derive(Debug)]
pub struct ProcessGroup {
    child: Child,
    pgid: Option<u32>,
}

impl ProcessGroup {
    /// Spawn `cmd` in a new process group
    ///
    /// # Errors
    /// Any spawn failure from the OS.
    pub(crate) fn spawn(cmd: &mut Command) -> std::io::Result<Self> {
        #[cfg(unix)]
        cmd.process_group(0);
        let child = cmd.spawn()?;
        let pgid = child.id();
        Ok(Self { child, pgid })
    }

    /// Process group id (the leader's pid)
    #[inline]
    #[must_use]
    pub fn pgid(&self) -> Option<u32> {
        self.pgid
    }

    /// The group leader
    #[inline]
    pub fn child_mut(&mut self) -> &mut Child {
        &mut self.child
    }

    /// Poll the leader without blocking
    ///
    /// # Errors
    /// OS error from the wait call.
    pub fn try_wait(&mut self) -> std::io::Result<Option<ExitStatus>> {
        self.child.try_wait()
    }
}

/// Shell command in `dir` with no stdin
pub(crate) fn shell(command: &str, dir: &Path) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command).current_dir(dir).stdin(Stdio::null());
    cmd
}

/// Run a command to completion within `timeout`
///
/// On deadline the whole process group is terminated: graceful signal,
/// `grace` to exit, then a forced kill. Members left behind by a step that
/// exits on its own are killed as well.
///
/// # Errors
/// - [`BuildError::Spawn`] if the program cannot be started
/// - [`BuildError::Timeout`] on deadline
/// - [`BuildError::StepFailed`] on non-zero exit, with the output tail
pub(crate) async fn run_step(
    step: &str,
    mut cmd: Command,
    timeout: Duration,
    grace: Duration,
    log: &StderrLog,
) -> Result<(), BuildError> {
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped()).kill_on_drop(true);
    let program = format!("{:?}", cmd.as_std().get_program());
    let mut group =
        ProcessGroup::spawn(&mut cmd).map_err(|source| BuildError::Spawn { program, source })?;
    let stdout = collect_output(group.child.stdout.take());
    let stderr = collect_output(group.child.stderr.take());

    let started = Instant::now();
    let waited = tokio::time::timeout(timeout, group.child.wait()).await;
    let status = match waited {
        Ok(Ok(status)) => status,
        Ok(Err(source)) => {
            stop_step(&mut group, step, grace).await;
            return Err(BuildError::Spawn {
                program: step.to_string(),
                source,
            });
        }
        Err(_) => {
            tracing::warn!(step, timeout_secs = timeout.as_secs(), "build step timed out");
            stop_step(&mut group, step, grace).await;
            return Err(BuildError::Timeout {
                step: step.to_string(),
                timeout_secs: timeout.as_secs(),
            });
        }
    };
    stop_step(&mut group, step, grace).await;

    let stdout = join_output(stdout).await;
    let stderr = join_output(stderr).await;
    let stderr = String::from_utf8_lossy(&stderr);
    for line in stderr.lines().filter(|l| !l.trim().is_empty()) {
        log.push(line);
    }

    tracing::debug!(
        step,
        status = %status,
        elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        "build step finished"
    );

    if status.success() {
        return Ok(());
    }

    let mut combined = String::from_utf8_lossy(&stdout).into_owned();
    combined.push_str(&stderr);
    Err(BuildError::StepFailed {
        step: step.to_string(),
        status: status.to_string(),
        output: tail_chars(combined.trim(), OUTPUT_TAIL_BYTES),
    })
}

async fn stop_step(group: &mut ProcessGroup, step: &str, grace: Duration) {
    if let Err(e) = terminate(group, step, grace).await {
        tracing::warn!(step, error = %e, "build step left processes behind");
    }
}

fn collect_output<R>(reader: Option<R>) -> JoinHandle<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut reader) = reader {
            if let Err(e) = reader.read_to_end(&mut buf).await {
                tracing::debug!(error = %e, "failed to read step output");
            }
        }
        buf
    })
}

async fn join_output(task: JoinHandle<Vec<u8>>) -> Vec<u8> {
    match tokio::time::timeout(OUTPUT_WAIT, task).await {
        Ok(Ok(buf)) => buf,
        _ => Vec::new(),
    }
}

fn tail_chars(text: &str, max: usize) -> String {
    let count = text.chars().count();
    if count <= max {
        return text.to_string();
    }
    text.chars().skip(count - max).collect()
}

/// Forward stderr lines to tracing and the ring; flag readiness markers
pub(crate) fn drain_stderr(
    stderr: ChildStderr,
    log: StderrLog,
    toolchain: &Toolchain,
) -> watch::Receiver<bool> {
    let (ready_tx, ready_rx) = watch::channel(false);
    let toolchain = toolchain.clone();

    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::debug!(target: "gauntlet::instance", "{line}");
            if toolchain.is_ready_line(&line) {
                ready_tx.send_replace(true);
            }
            log.push(line);
        }
    });

    ready_rx
}

/// Wait for a readiness marker, or for the settle delay when none are set
///
/// # Errors
/// - [`LaunchError::ExitedEarly`] if the child exits first
/// - [`LaunchError::NotReady`] on deadline
pub(crate) async fn await_ready(
    child: &mut Child,
    ready: &watch::Receiver<bool>,
    toolchain: &Toolchain,
    timeout: Duration,
    log: &StderrLog,
) -> Result<(), LaunchError> {
    let started = Instant::now();
    let settle = toolchain.readiness_markers.is_empty().then(|| toolchain.settle_delay());

    loop {
        if *ready.borrow() {
            return Ok(());
        }

        match child.try_wait() {
            Ok(Some(status)) => {
                tokio::time::sleep(DRAIN_SETTLE).await;
                return Err(LaunchError::ExitedEarly {
                    status: status.to_string(),
                    stderr_tail: log.tail_text(STDERR_TAIL_LINES),
                });
            }
            Ok(None) => {}
            Err(e) => {
                return Err(LaunchError::ExitedEarly {
                    status: format!("unknown: {e}"),
                    stderr_tail: log.tail_text(STDERR_TAIL_LINES),
                });
            }
        }

        let elapsed = started.elapsed();
        if settle.is_some_and(|delay| elapsed >= delay.min(timeout)) {
            return Ok(());
        }
        if elapsed >= timeout {
            return Err(LaunchError::NotReady {
                timeout_secs: timeout.as_secs(),
                stderr_tail: log.tail_text(STDERR_TAIL_LINES),
            });
        }

        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// How a child ended during teardown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Termination {
    /// Already gone
    AlreadyExited,
    /// Exited after the graceful signal
    Graceful,
    /// Exited after the forced kill
    Killed,
}

/// Stop a process group: graceful signal, bounded wait, forced kill, bounded wait
///
/// Once the leader is gone, surviving group members are killed outright.
///
/// # Errors
/// - [`CleanupError::StopFailed`] if a signal cannot be delivered
/// - [`CleanupError::StillRunning`] when the leader survives both stages
pub(crate) async fn terminate(
    group: &mut ProcessGroup,
    label: &str,
    grace: Duration,
) -> Result<Termination, CleanupError> {
    let stop_failed = |message: String| CleanupError::StopFailed {
        instance: label.to_string(),
        message,
    };

    if let Ok(Some(_)) = group.child.try_wait() {
        sweep_group(group.pgid, label).map_err(stop_failed)?;
        return Ok(Termination::AlreadyExited);
    }

    match signal_group(group.pgid, GroupSignal::Terminate) {
        Ok(_) => {
            if tokio::time::timeout(grace, group.child.wait()).await.is_ok() {
                tracing::debug!(instance = label, "instance exited after graceful signal");
                sweep_group(group.pgid, label).map_err(stop_failed)?;
                return Ok(Termination::Graceful);
            }
            tracing::warn!(
                instance = label,
                grace_secs = grace.as_secs(),
                "instance ignored graceful signal, forcing kill"
            );
        }
        Err(message) => tracing::warn!(instance = label, %message, "graceful signal failed"),
    }

    let group_killed = signal_group(group.pgid, GroupSignal::Kill);
    if let Err(e) = group.child.start_kill() {
        if let Err(message) = group_killed {
            return Err(stop_failed(format!("{message}; {e}")));
        }
    }

    match tokio::time::timeout(KILL_WAIT, group.child.wait()).await {
        Ok(_) => Ok(Termination::Killed),
        Err(_) => Err(CleanupError::StillRunning {
            instance: label.to_string(),
        }),
    }
}

/// Kill whatever is left in a group whose leader has exited
fn sweep_group(pgid: Option<u32>, label: &str) -> Result<(), String> {
    if signal_group(pgid, GroupSignal::Kill)? {
        tracing::debug!(instance = label, "killed remaining members of process group");
    }
    Ok(())
}

#[derive(Debug, Clone, Copy)]
enum GroupSignal {
    Terminate,
    Kill,
}

/// Signal every member of a process group
///
/// Returns false when the group no longer has any members.
#[cfg(unix)]
fn signal_group(pgid: Option<u32>, signal: GroupSignal) -> Result<bool, String> {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pgid) = pgid.and_then(|pid| i32::try_from(pid).ok()) else {
        return Ok(false);
    };
    let signal = match signal {
        GroupSignal::Terminate => Signal::SIGTERM,
        GroupSignal::Kill => Signal::SIGKILL,
    };
    match killpg(Pid::from_raw(pgid), signal) {
        Ok(()) => Ok(true),
        Err(Errno::ESRCH) => Ok(false),
        Err(errno) => Err(format!("{signal:?} to process group {pgid}: {errno}")),
    }
}

#[cfg(not(unix))]
fn signal_group(_pgid: Option<u32>, _signal: GroupSignal) -> Result<bool, String> {
    Ok(false)
}
