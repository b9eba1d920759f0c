//! Execution backend interface
//!
//! The orchestrator depends only on [`ExecutionBackend`]. Implementations are
//! chosen once per harness with [`backend_for`].

use crate::container::ContainerBackend;
use crate::direct::ProcessBackend;
use crate::error::{BuildError, CleanupReport, LaunchError};
use crate::options::{BackendKind, TestOptions, Toolchain};
use crate::session::{ExecutionSession, InstanceStatus, SessionIo};
use gauntlet_artifact::GeneratedArtifact;
use std::sync::Arc;

/// Build, launch and tear down generated servers
///
/// # Contract
/// - `build` writes the artifact into the session workspace and compiles it
/// - `launch` starts the instance, records its handle on the session, and
///   returns the stdio channel once the instance is ready
/// - `teardown` stops the instance, removes build products and the workspace,
///   and never fails; per-step failures go into the [`CleanupReport`]
#[async_trait::async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Strategy implemented
    fn kind(&self) -> BackendKind;

    /// Materialize and compile the artifact
    async fn build(
        &self,
        session: &mut ExecutionSession,
        artifact: &GeneratedArtifact,
        options: &TestOptions,
    ) -> Result<(), BuildError>;

    /// Start the built artifact and wait for readiness
    async fn launch(
        &self,
        session: &mut ExecutionSession,
        options: &TestOptions,
    ) -> Result<SessionIo, LaunchError>;

    /// Stop everything the session owns
    async fn teardown(&self, session: &mut ExecutionSession, options: &TestOptions) -> CleanupReport;

    /// Liveness probe after the instance has been exercised
    async fn status(&self, session: &mut ExecutionSession) -> InstanceStatus {
        session.instance_status()
    }
}

/// Create the backend for `kind`
#[must_use]
pub fn backend_for(kind: BackendKind, toolchain: Toolchain) -> Arc<dyn ExecutionBackend> {
    match kind {
        BackendKind::Container => Arc::new(ContainerBackend::new(toolchain)),
        BackendKind::Process => Arc::new(ProcessBackend::new(toolchain)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_selects_strategy() {
        let toolchain = Toolchain::default();
        assert_eq!(
            backend_for(BackendKind::Container, toolchain.clone()).kind(),
            BackendKind::Container
        );
        assert_eq!(
            backend_for(BackendKind::Process, toolchain).kind(),
            BackendKind::Process
        );
    }
}
