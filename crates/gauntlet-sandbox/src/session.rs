//! Execution session
//!
//! One session owns one private workspace directory and at most one running
//! instance. The orchestrator owns the session; backends are lent it to fill
//! in the instance handle and image tag.

use crate::error::{CleanupError, CleanupReport};
use crate::process::ProcessGroup;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;

/// Session identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(ulid::Ulid);

impl SessionId {
    /// Generate a fresh id
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(ulid::Ulid::new())
    }

    /// Lowercase form, safe for container and image names
    #[must_use]
    pub fn slug(&self) -> String {
        self.0.to_string().to_lowercase()
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for SessionId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ulid::Ulid::from_string(s).map(Self)
    }
}

/// Bounded ring of recent stderr lines
#[derive(Debug, Clone)]
pub struct StderrLog {
    lines: Arc<Mutex<VecDeque<String>>>,
    capacity: usize,
}

impl Default for StderrLog {
    fn default() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }
}

impl StderrLog {
    /// Lines kept by default
    pub const DEFAULT_CAPACITY: usize = 64;

    /// Create ring with a custom capacity
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            lines: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    /// Append a line, evicting the oldest when full
    pub fn push(&self, line: impl Into<String>) {
        let mut lines = self.lines.lock();
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(line.into());
    }

    /// Last `n` lines, oldest first
    #[must_use]
    pub fn tail(&self, n: usize) -> Vec<String> {
        let lines = self.lines.lock();
        let skip = lines.len().saturating_sub(n);
        lines.iter().skip(skip).cloned().collect()
    }

    /// Last `n` lines joined with ` | `
    #[must_use]
    pub fn tail_text(&self, n: usize) -> String {
        self.tail(n).join(" | ")
    }

    /// Number of buffered lines
    #[must_use]
    pub fn len(&self) -> usize {
        self.lines.lock().len()
    }

    /// True when nothing was captured
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Byte-stream channel to a running instance
pub struct SessionIo {
    /// Instance output (its stdout)
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
    /// Instance input (its stdin)
    pub writer: Box<dyn AsyncWrite + Send + Unpin>,
}

impl SessionIo {
    /// Box a reader/writer pair
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
        }
    }
}

impl fmt::Debug for SessionIo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionIo").finish_non_exhaustive()
    }
}

/// Handle to whatever is running for a session
#[derive(Debug)]
pub enum InstanceHandle {
    /// Same-host subprocess group
    Process(ProcessGroup),
    /// Container, driven through an attached client process
    Container { name: String, client: ProcessGroup },
    /// In-memory server task
    Task(JoinHandle<()>),
}

/// Liveness of an instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum InstanceStatus {
    /// Nothing was launched
    NotLaunched,
    /// Still running
    Running,
    /// Exited with the given status text
    Exited(String),
}

impl InstanceHandle {
    /// Short label for logs and errors
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Self::Process(group) => group
                .pgid()
                .map_or_else(|| "process".to_string(), |pid| format!("process group {pid}")),
            Self::Container { name, .. } => format!("container {name}"),
            Self::Task(_) => "task".to_string(),
        }
    }

    /// Poll liveness without blocking
    pub fn status(&mut self) -> InstanceStatus {
        let group = match self {
            Self::Process(group) | Self::Container { client: group, .. } => group,
            Self::Task(task) => {
                return if task.is_finished() {
                    InstanceStatus::Exited("task finished".to_string())
                } else {
                    InstanceStatus::Running
                };
            }
        };
        match group.try_wait() {
            Ok(None) => InstanceStatus::Running,
            Ok(Some(status)) => InstanceStatus::Exited(status.to_string()),
            Err(e) => InstanceStatus::Exited(format!("unknown: {e}")),
        }
    }
}

/// One end-to-end test run
#[derive(Debug)]
pub struct ExecutionSession {
    id: SessionId,
    workspace_path: PathBuf,
    workspace: Option<TempDir>,
    instance: Option<InstanceHandle>,
    image: Option<String>,
    stderr: StderrLog,
}

impl ExecutionSession {
    /// Create a session with a fresh private workspace
    ///
    /// # Errors
    /// Returns IO errors from creating the temporary directory.
    pub fn create(id: SessionId) -> std::io::Result<Self> {
        let workspace = tempfile::Builder::new()
            .prefix(&format!("gauntlet-{}-", id.slug()))
            .tempdir()?;
        Ok(Self {
            id,
            workspace_path: workspace.path().to_path_buf(),
            workspace: Some(workspace),
            instance: None,
            image: None,
            stderr: StderrLog::default(),
        })
    }

    /// Session id
    #[inline]
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Workspace directory
    #[inline]
    #[must_use]
    pub fn workspace(&self) -> &Path {
        &self.workspace_path
    }

    /// True until the workspace has been closed
    #[inline]
    #[must_use]
    pub fn has_workspace(&self) -> bool {
        self.workspace.is_some()
    }

    /// Recent stderr of the instance and build steps
    #[inline]
    #[must_use]
    pub fn stderr(&self) -> &StderrLog {
        &self.stderr
    }

    /// Record the running instance
    pub fn set_instance(&mut self, instance: InstanceHandle) {
        tracing::debug!(session_id = %self.id, instance = %instance.label(), "instance attached");
        self.instance = Some(instance);
    }

    /// Running instance, if any
    #[inline]
    pub fn instance_mut(&mut self) -> Option<&mut InstanceHandle> {
        self.instance.as_mut()
    }

    /// Detach the instance for teardown
    #[inline]
    pub fn take_instance(&mut self) -> Option<InstanceHandle> {
        self.instance.take()
    }

    /// Record a built image tag
    pub fn set_image(&mut self, tag: impl Into<String>) {
        self.image = Some(tag.into());
    }

    /// Built image tag, if any
    #[inline]
    #[must_use]
    pub fn image(&self) -> Option<&str> {
        self.image.as_deref()
    }

    /// Detach the image tag for teardown
    #[inline]
    pub fn take_image(&mut self) -> Option<String> {
        self.image.take()
    }

    /// Liveness of the instance
    pub fn instance_status(&mut self) -> InstanceStatus {
        self.instance
            .as_mut()
            .map_or(InstanceStatus::NotLaunched, InstanceHandle::status)
    }

    /// Remove (or keep) the workspace directory
    ///
    /// Idempotent: a second call does nothing.
    pub fn close_workspace(&mut self, remove: bool, report: &mut CleanupReport) {
        let Some(dir) = self.workspace.take() else {
            return;
        };
        if remove {
            match dir.close() {
                Ok(()) => report.removed_workspace = true,
                Err(source) => report.record(CleanupError::Workspace {
                    path: self.workspace_path.clone(),
                    source,
                }),
            }
        } else {
            let kept = dir.keep();
            tracing::info!(session_id = %self.id, path = %kept.display(), "keeping workspace");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_are_unique_and_parse() {
        let a = SessionId::new();
        let b = SessionId::new();
        assert_ne!(a, b);
        assert_eq!(a.to_string().parse::<SessionId>().unwrap(), a);
        assert!(a.slug().chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn stderr_ring_evicts_oldest() {
        let log = StderrLog::with_capacity(3);
        for i in 0..5 {
            log.push(format!("line {i}"));
        }
        assert_eq!(log.len(), 3);
        assert_eq!(log.tail(2), vec!["line 3", "line 4"]);
        assert_eq!(log.tail_text(10), "line 2 | line 3 | line 4");
    }

    #[test]
    fn workspace_removed_on_close() {
        let mut session = ExecutionSession::create(SessionId::new()).unwrap();
        let path = session.workspace().to_path_buf();
        std::fs::write(path.join("x.txt"), "x").unwrap();
        assert!(path.exists());

        let mut report = CleanupReport::default();
        session.close_workspace(true, &mut report);
        assert!(report.removed_workspace);
        assert!(!path.exists());
        assert!(!session.has_workspace());

        // Second close is a no-op.
        session.close_workspace(true, &mut report);
        assert!(report.is_clean());
    }

    #[test]
    fn workspace_kept_when_requested() {
        let mut session = ExecutionSession::create(SessionId::new()).unwrap();
        let path = session.workspace().to_path_buf();
        let mut report = CleanupReport::default();
        session.close_workspace(false, &mut report);
        assert!(path.exists());
        assert!(!report.removed_workspace);
        std::fs::remove_dir_all(path).unwrap();
    }

    #[tokio::test]
    async fn task_instance_status() {
        let mut session = ExecutionSession::create(SessionId::new()).unwrap();
        assert_eq!(session.instance_status(), InstanceStatus::NotLaunched);
        session.set_instance(InstanceHandle::Task(tokio::spawn(async {})));
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(matches!(session.instance_status(), InstanceStatus::Exited(_)));
    }
}
