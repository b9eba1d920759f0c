//! Generated artifact and tool declarations
//!
//! A [`GeneratedArtifact`] is produced by an external code-generation
//! pipeline and handed to the harness. It is immutable once built: fields are
//! private and only exposed through accessors.

use crate::hash::ArtifactDigest;
use crate::path::{PathError, RelativePath};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

/// Declared metadata for one tool exposed by the generated server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDeclaration {
    /// Tool name as it must appear in `tools/list`
    pub name: String,
    /// Human description
    #[serde(default)]
    pub description: String,
    /// Declared parameter schema
    #[serde(default = "empty_object_schema", alias = "input_schema")]
    pub input_schema: Value,
}

impl ToolDeclaration {
    /// Create new tool declaration
    #[inline]
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

fn empty_object_schema() -> Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

/// Errors related to artifact construction and materialization
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    /// Entry point source is empty
    #[error("entry point source is empty")]
    EmptyEntryPoint,

    /// Supporting file key is not a safe relative path
    #[error("invalid supporting file path '{path}': {source}")]
    InvalidFilePath {
        path: String,
        #[source]
        source: PathError,
    },

    /// Supporting file would overwrite the entry point or manifest
    #[error("supporting file '{0}' collides with a reserved layout path")]
    PathCollision(String),

    /// Tool declared without a name
    #[error("tool declaration #{0} has an empty name")]
    EmptyToolName(usize),

    /// Same tool name declared twice
    #[error("duplicate tool declaration: {0}")]
    DuplicateTool(String),

    /// IO error while writing the workspace
    #[error("io error writing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ArtifactError {
    /// Create IO error for path
    pub fn io_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Wire form accepted from the code-generation pipeline
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawArtifact {
    entry_point: String,
    #[serde(default)]
    manifest: String,
    #[serde(default)]
    files: BTreeMap<String, String>,
    #[serde(default)]
    tools: Vec<ToolDeclaration>,
}

/// Immutable generated server bundle
///
/// # Invariants
/// - Entry point is non-empty
/// - Every supporting file key is a valid [`RelativePath`]
/// - Tool names are non-empty and unique, kept in declaration order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawArtifact", rename_all = "camelCase")]
pub struct GeneratedArtifact {
    entry_point: String,
    manifest: String,
    files: BTreeMap<RelativePath, String>,
    tools: Vec<ToolDeclaration>,
}

impl GeneratedArtifact {
    /// Start building an artifact
    #[inline]
    #[must_use]
    pub fn builder(entry_point: impl Into<String>, manifest: impl Into<String>) -> ArtifactBuilder {
        ArtifactBuilder {
            raw: RawArtifact {
                entry_point: entry_point.into(),
                manifest: manifest.into(),
                files: BTreeMap::new(),
                tools: Vec::new(),
            },
        }
    }

    /// Parse from the JSON wire form
    ///
    /// # Errors
    /// Returns a serde error when the JSON is malformed or violates
    /// artifact invariants
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Entry-point source text
    #[inline]
    #[must_use]
    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    /// Manifest / build descriptor text
    #[inline]
    #[must_use]
    pub fn manifest(&self) -> &str {
        &self.manifest
    }

    /// Supporting files keyed by relative path
    #[inline]
    #[must_use]
    pub fn files(&self) -> &BTreeMap<RelativePath, String> {
        &self.files
    }

    /// Declared tools in declaration order
    #[inline]
    #[must_use]
    pub fn tools(&self) -> &[ToolDeclaration] {
        &self.tools
    }

    /// Look up a declared tool by name
    #[must_use]
    pub fn tool(&self, name: &str) -> Option<&ToolDeclaration> {
        self.tools.iter().find(|t| t.name == name)
    }

    /// Content digest over entry point, manifest, files and declarations
    #[must_use]
    pub fn digest(&self) -> ArtifactDigest {
        let tools = serde_json::to_vec(&self.tools).unwrap_or_default();
        let mut parts: Vec<(&str, &[u8])> = vec![
            ("entry", self.entry_point.as_bytes()),
            ("manifest", self.manifest.as_bytes()),
        ];
        for (path, content) in &self.files {
            parts.push((path.as_str(), content.as_bytes()));
        }
        parts.push(("tools", &tools));
        ArtifactDigest::of_parts(parts)
    }
}

impl TryFrom<RawArtifact> for GeneratedArtifact {
    type Error = ArtifactError;

    fn try_from(raw: RawArtifact) -> Result<Self, Self::Error> {
        if raw.entry_point.trim().is_empty() {
            return Err(ArtifactError::EmptyEntryPoint);
        }

        let mut files = BTreeMap::new();
        for (key, content) in raw.files {
            let path = RelativePath::parse(&key).map_err(|source| ArtifactError::InvalidFilePath {
                path: key.clone(),
                source,
            })?;
            files.insert(path, content);
        }

        let mut seen = HashSet::new();
        for (idx, tool) in raw.tools.iter().enumerate() {
            if tool.name.trim().is_empty() {
                return Err(ArtifactError::EmptyToolName(idx));
            }
            if !seen.insert(tool.name.as_str()) {
                return Err(ArtifactError::DuplicateTool(tool.name.clone()));
            }
        }

        Ok(Self {
            entry_point: raw.entry_point,
            manifest: raw.manifest,
            files,
            tools: raw.tools,
        })
    }
}

/// Builder for [`GeneratedArtifact`]
#[derive(Debug, Clone)]
pub struct ArtifactBuilder {
    raw: RawArtifact,
}

impl ArtifactBuilder {
    /// Add a supporting file
    #[inline]
    #[must_use]
    pub fn file(mut self, path: impl Into<String>, content: impl Into<String>) -> Self {
        self.raw.files.insert(path.into(), content.into());
        self
    }

    /// Declare a tool
    #[inline]
    #[must_use]
    pub fn tool(mut self, tool: ToolDeclaration) -> Self {
        self.raw.tools.push(tool);
        self
    }

    /// Validate and freeze the artifact
    ///
    /// # Errors
    /// Returns [`ArtifactError`] if any invariant is violated
    pub fn build(self) -> Result<GeneratedArtifact, ArtifactError> {
        GeneratedArtifact::try_from(self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Value {
        json!({ "type": "object", "properties": { "a": { "type": "number" } } })
    }

    #[test]
    fn builder_keeps_declaration_order() {
        let artifact = GeneratedArtifact::builder("main()", "{}")
            .tool(ToolDeclaration::new("zeta", "", schema()))
            .tool(ToolDeclaration::new("alpha", "", schema()))
            .build()
            .unwrap();

        let names: Vec<_> = artifact.tools().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["zeta", "alpha"]);
        assert!(artifact.tool("alpha").is_some());
    }

    #[test]
    fn rejects_duplicate_and_empty_tools() {
        let dup = GeneratedArtifact::builder("main()", "{}")
            .tool(ToolDeclaration::new("add", "", schema()))
            .tool(ToolDeclaration::new("add", "", schema()))
            .build();
        assert!(matches!(dup, Err(ArtifactError::DuplicateTool(name)) if name == "add"));

        let empty = GeneratedArtifact::builder("main()", "{}")
            .tool(ToolDeclaration::new(" ", "", schema()))
            .build();
        assert!(matches!(empty, Err(ArtifactError::EmptyToolName(0))));
    }

    #[test]
    fn rejects_unsafe_file_paths() {
        let result = GeneratedArtifact::builder("main()", "{}")
            .file("../outside.ts", "x")
            .build();
        assert!(matches!(result, Err(ArtifactError::InvalidFilePath { .. })));
    }

    #[test]
    fn rejects_empty_entry_point() {
        let result = GeneratedArtifact::builder("  ", "{}").build();
        assert!(matches!(result, Err(ArtifactError::EmptyEntryPoint)));
    }

    #[test]
    fn parses_wire_json() {
        let artifact = GeneratedArtifact::from_json(
            r#"{
                "entryPoint": "console.log(1)",
                "manifest": "{}",
                "files": { "tsconfig.json": "{}" },
                "tools": [{ "name": "add", "description": "Add", "inputSchema": { "type": "object" } }]
            }"#,
        )
        .unwrap();
        assert_eq!(artifact.tools().len(), 1);
        assert_eq!(artifact.files().len(), 1);

        let bad = GeneratedArtifact::from_json(r#"{ "entryPoint": "x", "files": { "/etc/x": "" } }"#);
        assert!(bad.is_err());
    }

    #[test]
    fn digest_tracks_content() {
        let a = GeneratedArtifact::builder("a", "{}").build().unwrap();
        let b = GeneratedArtifact::builder("b", "{}").build().unwrap();
        assert_eq!(a.digest(), a.clone().digest());
        assert_ne!(a.digest(), b.digest());
    }
}
