//! Gauntlet Sandbox
//!
//! Execution sessions and the two interchangeable strategies that build,
//! launch and tear down a generated tool server.
//!
//! # Core Concepts
//!
//! - [`ExecutionSession`]: private workspace, instance handle, stderr ring
//! - [`ExecutionBackend`]: build / launch / teardown contract
//! - [`ContainerBackend`]: image build plus an isolated `docker run -i`
//! - [`ProcessBackend`]: same-host subprocess with relaxed isolation
//! - [`TestOptions`] and [`Toolchain`]: limits and the build/run recipe
//!
//! # Teardown
//!
//! Teardown never fails. Instances run in their own process group; the
//! group first receives a graceful termination signal, then a forced kill
//! after the grace period, and every wait is bounded. Failed steps are collected in a [`CleanupReport`].

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod backend;
mod container;
mod direct;
mod error;
mod options;
mod process;
mod session;

pub use backend::{backend_for, ExecutionBackend};
pub use container::ContainerBackend;
pub use direct::ProcessBackend;
pub use error::{BuildError, CleanupError, CleanupReport, LaunchError};
pub use options::{BackendKind, NetworkMode, OptionsError, TestOptions, Toolchain, UnknownBackend};
pub use process::ProcessGroup;
pub use session::{ExecutionSession, InstanceHandle, InstanceStatus, SessionId, SessionIo, StderrLog};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
