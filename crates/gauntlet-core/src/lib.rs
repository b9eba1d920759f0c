//! Gauntlet Core - protocol-compliance harness
//!
//! Takes a generated tool server and answers one question: does it build,
//! start, and speak the protocol correctly? It:
//! - Builds and launches the artifact through an execution backend
//! - Performs the handshake and enumerates tools
//! - Exercises every declared tool with generated sample arguments
//! - Tears the session down on every exit path
//! - Reports progress to per-session observers
//!
//! # Example
//!
//! ```rust,ignore
//! use gauntlet_core::{Harness, HarnessConfig, VerdictPolicy};
//! use gauntlet_artifact::GeneratedArtifact;
//!
//! # async fn example(artifact: GeneratedArtifact) -> Result<(), Box<dyn std::error::Error>> {
//! let harness = Harness::new(HarnessConfig::new());
//! let report = harness.run(&artifact).await?;
//!
//! println!("{}", report.generate_text());
//! assert!(report.passed(VerdictPolicy::AllTools));
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod classify;
pub mod config;
pub mod error;
pub mod events;
pub mod harness;
pub mod report;
pub mod samples;
pub mod state;

pub use classify::{classify_call, is_credential_error, ToolOutcome, CREDENTIAL_VOCABULARY};
pub use config::{ConfigError, HarnessConfig};
pub use error::{HarnessError, PhaseError};
pub use events::{EventBus, ProgressCallback, ProgressEvent, ProgressPhase};
pub use harness::{check_declared_schemas, Harness};
pub use report::{
    FailureKind, TestReport, ToolTestResult, ValidationCheck, ValidationReport, VerdictPolicy,
    CHECK_THRESHOLD,
};
pub use samples::{sample_arguments, sample_value};
pub use state::{allowed_transitions, validate_transition, IllegalTransition, SessionState, StateTracker};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for running the harness
    pub use crate::{
        Harness, HarnessConfig, ProgressEvent, ProgressPhase, TestReport, VerdictPolicy,
    };
    pub use gauntlet_artifact::{GeneratedArtifact, ToolDeclaration};
    pub use gauntlet_sandbox::{BackendKind, NetworkMode, SessionId, TestOptions, Toolchain};
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
