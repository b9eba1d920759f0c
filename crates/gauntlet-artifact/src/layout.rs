//! Workspace layout and materialization
//!
//! Writes an artifact into a private workspace directory so a toolchain can
//! build it.

use crate::artifact::{ArtifactError, GeneratedArtifact};
use crate::path::RelativePath;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Where the entry point and manifest are placed inside the workspace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArtifactLayout {
    /// Manifest / build descriptor file
    pub manifest_path: String,
    /// Entry-point source file
    pub entry_path: String,
}

impl Default for ArtifactLayout {
    fn default() -> Self {
        Self {
            manifest_path: "package.json".to_string(),
            entry_path: "src/index.ts".to_string(),
        }
    }
}

impl ArtifactLayout {
    /// Create a layout with explicit paths
    #[inline]
    #[must_use]
    pub fn new(manifest_path: impl Into<String>, entry_path: impl Into<String>) -> Self {
        Self {
            manifest_path: manifest_path.into(),
            entry_path: entry_path.into(),
        }
    }
}

impl GeneratedArtifact {
    /// Write the artifact into `root`
    ///
    /// Returns the files written, manifest and entry point first.
    ///
    /// # Errors
    /// - [`ArtifactError::InvalidFilePath`] if a layout path is unsafe
    /// - [`ArtifactError::PathCollision`] if a supporting file shadows the
    ///   manifest or entry point
    /// - [`ArtifactError::Io`] on write failure
    pub fn materialize(
        &self,
        root: &Path,
        layout: &ArtifactLayout,
    ) -> Result<Vec<PathBuf>, ArtifactError> {
        let manifest = parse_layout_path(&layout.manifest_path)?;
        let entry = parse_layout_path(&layout.entry_path)?;

        for path in self.files().keys() {
            if *path == manifest || *path == entry {
                return Err(ArtifactError::PathCollision(path.to_string()));
            }
        }

        let mut written = Vec::with_capacity(self.files().len() + 2);
        if !self.manifest().is_empty() {
            written.push(write_file(root, &manifest, self.manifest())?);
        }
        written.push(write_file(root, &entry, self.entry_point())?);
        for (path, content) in self.files() {
            written.push(write_file(root, path, content)?);
        }

        tracing::debug!(
            root = %root.display(),
            files = written.len(),
            "materialized artifact"
        );
        Ok(written)
    }
}

fn parse_layout_path(raw: &str) -> Result<RelativePath, ArtifactError> {
    RelativePath::parse(raw).map_err(|source| ArtifactError::InvalidFilePath {
        path: raw.to_string(),
        source,
    })
}

fn write_file(root: &Path, path: &RelativePath, content: &str) -> Result<PathBuf, ArtifactError> {
    let target = path.under(root);
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(|e| ArtifactError::io_error(parent, e))?;
    }
    fs::write(&target, content).map_err(|e| ArtifactError::io_error(&target, e))?;
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::ToolDeclaration;
    use serde_json::json;

    #[test]
    fn materialize_writes_all_files() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = GeneratedArtifact::builder("console.log('hi')", r#"{"name":"x"}"#)
            .file("tsconfig.json", "{}")
            .file("src/tools/util.ts", "export {}")
            .tool(ToolDeclaration::new("noop", "", json!({"type": "object"})))
            .build()
            .unwrap();

        let written = artifact
            .materialize(dir.path(), &ArtifactLayout::default())
            .unwrap();

        assert_eq!(written.len(), 4);
        assert_eq!(
            fs::read_to_string(dir.path().join("src/index.ts")).unwrap(),
            "console.log('hi')"
        );
        assert!(dir.path().join("package.json").exists());
        assert!(dir.path().join("src/tools/util.ts").exists());
    }

    #[test]
    fn materialize_rejects_collisions() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = GeneratedArtifact::builder("main", "{}")
            .file("package.json", "{}")
            .build()
            .unwrap();

        let result = artifact.materialize(dir.path(), &ArtifactLayout::default());
        assert!(matches!(result, Err(ArtifactError::PathCollision(p)) if p == "package.json"));
    }

    #[test]
    fn materialize_rejects_unsafe_layout() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = GeneratedArtifact::builder("main", "{}").build().unwrap();
        let layout = ArtifactLayout::new("../package.json", "index.js");

        let result = artifact.materialize(dir.path(), &layout);
        assert!(matches!(result, Err(ArtifactError::InvalidFilePath { .. })));
    }
}
