//! Gauntlet Artifact Model
//!
//! Immutable description of a machine-generated tool server as it is handed
//! to the harness.
//!
//! # Core Concepts
//!
//! - [`GeneratedArtifact`]: entry point, manifest, supporting files, declared tools
//! - [`ToolDeclaration`]: name, description and parameter schema of one tool
//! - [`ArtifactDigest`]: SHA-256 over the artifact's canonical form
//! - [`RelativePath`]: validated workspace-relative file location
//! - [`ArtifactLayout`]: where the entry point and manifest land on disk
//!
//! # Example
//!
//! ```rust,ignore
//! use gauntlet_artifact::{ArtifactLayout, GeneratedArtifact, ToolDeclaration};
//!
//! let artifact = GeneratedArtifact::builder(entry_source, manifest)
//!     .file("tsconfig.json", tsconfig)
//!     .tool(ToolDeclaration::new("add", "Add two numbers", schema))
//!     .build()?;
//!
//! let written = artifact.materialize(workspace.path(), &ArtifactLayout::default())?;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod artifact;
mod hash;
mod layout;
mod path;

pub use artifact::{ArtifactBuilder, ArtifactError, GeneratedArtifact, ToolDeclaration};
pub use hash::ArtifactDigest;
pub use layout::ArtifactLayout;
pub use path::{PathError, RelativePath};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
