//! Workspace-relative file paths
//!
//! Supporting files arrive keyed by untrusted strings. [`RelativePath`] only
//! admits paths that stay inside the session workspace once joined.

use std::fmt::{self, Display, Formatter};
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

/// Validated relative path inside an artifact workspace
///
/// # Invariants
/// - Non-empty, at least one normal component
/// - No root, prefix, `.` or `..` components
/// - No NUL bytes
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RelativePath(String);

impl RelativePath {
    /// Parse and validate a relative path
    ///
    /// # Errors
    /// Returns [`PathError`] when the path could escape the workspace
    pub fn parse(raw: &str) -> Result<Self, PathError> {
        if raw.trim().is_empty() {
            return Err(PathError::Empty);
        }
        if raw.contains('\0') {
            return Err(PathError::InvalidCharacter(raw.to_string()));
        }

        let normalized = raw.replace('\\', "/");
        let mut segments = Vec::new();
        for component in Path::new(&normalized).components() {
            match component {
                Component::Normal(seg) => segments.push(seg.to_string_lossy().into_owned()),
                Component::CurDir => {}
                Component::ParentDir => return Err(PathError::Traversal(raw.to_string())),
                Component::RootDir | Component::Prefix(_) => {
                    return Err(PathError::Absolute(raw.to_string()))
                }
            }
        }

        if segments.is_empty() {
            return Err(PathError::Empty);
        }
        Ok(Self(segments.join("/")))
    }

    /// Get the normalized string form
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Join onto a workspace root
    #[inline]
    #[must_use]
    pub fn under(&self, root: &Path) -> PathBuf {
        self.0.split('/').fold(root.to_path_buf(), |acc, seg| acc.join(seg))
    }
}

impl Display for RelativePath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl serde::Serialize for RelativePath {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl FromStr for RelativePath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Path validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    /// Empty path or only `.` segments
    #[error("empty path")]
    Empty,

    /// Absolute path or drive prefix
    #[error("absolute path not allowed: {0}")]
    Absolute(String),

    /// Contains a `..` component
    #[error("path escapes workspace: {0}")]
    Traversal(String),

    /// Contains a forbidden character
    #[error("invalid character in path: {0:?}")]
    InvalidCharacter(String),
}
