//! Testing utilities for the Gauntlet workspace
//!
//! A simulated execution backend and fixture artifacts covering the main
//! harness scenarios: a working two-tool server, a compile failure, and a
//! server that never becomes ready.

#![allow(missing_docs)]
#![allow(clippy::missing_panics_doc)]

pub mod fixtures;
pub mod simulated;

pub use fixtures::*;
pub use simulated::{
    settle, BuildBehavior, InitBehavior, LaunchBehavior, ResourcesBehavior, ScriptedTool,
    ServerScript, SimulatedBackend, SimulatorStats, ToolBehavior,
};
