//! Gauntlet Schema Checker
//!
//! Validates a tool's declared parameter schema against the subset of JSON
//! Schema that tool servers are expected to use. The checker is pure: no I/O,
//! no running process, and the same input always yields the same
//! [`SchemaReport`].
//!
//! # Example
//!
//! ```rust,ignore
//! use gauntlet_schema::SchemaChecker;
//!
//! let report = SchemaChecker::new().check("add", &schema);
//! if !report.valid {
//!     for error in &report.errors {
//!         eprintln!("{error}");
//!     }
//! }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod checker;

pub use checker::{SchemaChecker, SchemaReport, PRIMITIVE_TYPES};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
