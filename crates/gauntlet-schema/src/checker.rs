//! Tool parameter schema checker
//!
//! Errors make a declaration unusable. Warnings flag declarations that are
//! tolerated because generated code sometimes runs ahead of its metadata
//! (e.g. a `required` name without a matching property).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Type names accepted in a `type` keyword
pub const PRIMITIVE_TYPES: [&str; 7] = [
    "string", "number", "integer", "boolean", "array", "object", "null",
];

const NUMERIC_KEYWORDS: [&str; 5] = [
    "minimum",
    "maximum",
    "exclusiveMinimum",
    "exclusiveMaximum",
    "multipleOf",
];

const COUNT_KEYWORDS: [&str; 4] = ["minLength", "maxLength", "minItems", "maxItems"];

const COMBINATORS: [&str; 3] = ["allOf", "anyOf", "oneOf"];

/// Outcome of checking one tool schema
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SchemaReport {
    /// Tool the schema belongs to
    pub tool: String,
    /// True when no errors were found
    pub valid: bool,
    /// Fatal findings
    pub errors: Vec<String>,
    /// Tolerated findings
    pub warnings: Vec<String>,
}

impl SchemaReport {
    /// Human summary line
    #[must_use]
    pub fn summary(&self) -> String {
        if self.valid {
            format!(
                "schema for '{}' is valid ({} warning(s))",
                self.tool,
                self.warnings.len()
            )
        } else {
            format!(
                "schema for '{}' is invalid: {}",
                self.tool,
                self.errors.join("; ")
            )
        }
    }
}

#[derive(Debug, Default)]
struct Findings {
    errors: Vec<String>,
    warnings: Vec<String>,
}

impl Findings {
    fn error(&mut self, path: &str, message: impl AsRef<str>) {
        self.errors.push(format!("{path}: {}", message.as_ref()));
    }

    fn warn(&mut self, path: &str, message: impl AsRef<str>) {
        self.warnings.push(format!("{path}: {}", message.as_ref()));
    }
}

/// Pure schema checker
///
/// Validates declarations taken from artifact metadata and from a live
/// `tools/list` response with the same rules.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchemaChecker;

impl SchemaChecker {
    /// Create new checker instance
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Check a tool's parameter schema
    #[must_use]
    pub fn check(&self, tool: &str, schema: &Value) -> SchemaReport {
        let mut findings = Findings::default();

        match schema {
            Value::Object(map) => {
                if let Some(ty) = map.get("type") {
                    if ty.as_str() != Some("object") {
                        findings.warn(
                            "$",
                            format!("root type is {ty}; tool parameters should be an object"),
                        );
                    }
                }
                Self::check_node(map, "$", &mut findings);
            }
            Value::Null => findings.error("$", "schema must be a non-null object"),
            other => findings.error(
                "$",
                format!("schema must be an object, found {}", json_kind(other)),
            ),
        }

        SchemaReport {
            tool: tool.to_string(),
            valid: findings.errors.is_empty(),
            errors: findings.errors,
            warnings: findings.warnings,
        }
    }

    fn check_node(node: &Map<String, Value>, path: &str, findings: &mut Findings) {
        if let Some(ty) = node.get("type") {
            Self::check_type_keyword(ty, path, findings);
        }

        let property_names = Self::check_properties(node, path, findings);
        Self::check_required(node, property_names.as_deref(), path, findings);
        Self::check_numeric(node, path, findings);
        Self::check_strings(node, path, findings);
        Self::check_enum_const(node, path, findings);

        for keyword in COMBINATORS {
            let Some(value) = node.get(keyword) else {
                continue;
            };
            match value.as_array() {
                Some(members) if !members.is_empty() => {
                    for (idx, member) in members.iter().enumerate() {
                        Self::check_subschema(member, &format!("{path}.{keyword}[{idx}]"), findings);
                    }
                }
                _ => findings.error(path, format!("`{keyword}` must be a non-empty array")),
            }
        }

        if let Some(items) = node.get("items") {
            match items {
                Value::Array(tuple) => {
                    for (idx, member) in tuple.iter().enumerate() {
                        Self::check_subschema(member, &format!("{path}.items[{idx}]"), findings);
                    }
                }
                other => Self::check_subschema(other, &format!("{path}.items"), findings),
            }
        }

        if let Some(extra) = node.get("additionalProperties") {
            if !extra.is_boolean() {
                Self::check_subschema(extra, &format!("{path}.additionalProperties"), findings);
            }
        }

        if let Some(not) = node.get("not") {
            Self::check_subschema(not, &format!("{path}.not"), findings);
        }
    }

    fn check_subschema(value: &Value, path: &str, findings: &mut Findings) {
        match value {
            Value::Object(map) => Self::check_node(map, path, findings),
            Value::Bool(_) => {}
            other => findings.error(
                path,
                format!("must be a schema object, found {}", json_kind(other)),
            ),
        }
    }

    fn check_type_keyword(ty: &Value, path: &str, findings: &mut Findings) {
        match ty {
            Value::String(name) => {
                if !PRIMITIVE_TYPES.contains(&name.as_str()) {
                    findings.error(path, format!("unknown type '{name}'"));
                }
            }
            Value::Array(names) if !names.is_empty() => {
                for name in names {
                    match name.as_str() {
                        Some(n) if PRIMITIVE_TYPES.contains(&n) => {}
                        Some(n) => findings.error(path, format!("unknown type '{n}' in union")),
                        None => findings.error(path, "type union members must be strings"),
                    }
                }
            }
            _ => findings.error(path, "`type` must be a type name or a non-empty array of names"),
        }
    }

    /// Returns declared property names when `properties` is a valid map
    fn check_properties(
        node: &Map<String, Value>,
        path: &str,
        findings: &mut Findings,
    ) -> Option<Vec<String>> {
        let properties = node.get("properties")?;
        let Some(map) = properties.as_object() else {
            findings.error(path, "`properties` must be an object");
            return None;
        };

        for (name, schema) in map {
            Self::check_subschema(schema, &format!("{path}.properties.{name}"), findings);
        }
        Some(map.keys().cloned().collect())
    }

    fn check_required(
        node: &Map<String, Value>,
        property_names: Option<&[String]>,
        path: &str,
        findings: &mut Findings,
    ) {
        let Some(required) = node.get("required") else {
            return;
        };
        let Some(entries) = required.as_array() else {
            findings.error(path, "`required` must be an array of strings");
            return;
        };

        for entry in entries {
            let Some(name) = entry.as_str() else {
                findings.error(path, format!("`required` entry {entry} is not a string"));
                continue;
            };
            let declared = property_names.is_some_and(|names| names.iter().any(|n| n == name));
            if !declared {
                findings.warn(
                    path,
                    format!("required property '{name}' is not declared in `properties`"),
                );
            }
        }
    }

    fn check_numeric(node: &Map<String, Value>, path: &str, findings: &mut Findings) {
        for keyword in NUMERIC_KEYWORDS {
            if let Some(value) = node.get(keyword) {
                if !value.is_number() {
                    findings.error(path, format!("`{keyword}` must be a number"));
                }
            }
        }

        if let Some(step) = node.get("multipleOf").and_then(Value::as_f64) {
            if step <= 0.0 {
                findings.error(path, "`multipleOf` must be greater than zero");
            }
        }

        if let (Some(min), Some(max)) = (
            node.get("minimum").and_then(Value::as_f64),
            node.get("maximum").and_then(Value::as_f64),
        ) {
            if min > max {
                findings.error(path, format!("`minimum` ({min}) exceeds `maximum` ({max})"));
            }
        }

        for keyword in COUNT_KEYWORDS {
            if let Some(value) = node.get(keyword) {
                if value.as_u64().is_none() {
                    findings.error(path, format!("`{keyword}` must be a non-negative integer"));
                }
            }
        }

        for (low, high) in [("minLength", "maxLength"), ("minItems", "maxItems")] {
            if let (Some(min), Some(max)) = (
                node.get(low).and_then(Value::as_u64),
                node.get(high).and_then(Value::as_u64),
            ) {
                if min > max {
                    findings.error(path, format!("`{low}` ({min}) exceeds `{high}` ({max})"));
                }
            }
        }
    }

    fn check_strings(node: &Map<String, Value>, path: &str, findings: &mut Findings) {
        if let Some(pattern) = node.get("pattern") {
            match pattern.as_str() {
                // `regex` lacks ECMA-262 look-around and backreferences.
                Some(source) => {
                    if let Err(e) = regex::Regex::new(source) {
                        findings.warn(path, format!("`pattern` could not be verified: {e}"));
                    }
                }
                None => findings.error(path, "`pattern` must be a string"),
            }
        }

        // Unknown formats are accepted; only the keyword's type is checked.
        if let Some(format) = node.get("format") {
            if !format.is_string() {
                findings.error(path, "`format` must be a string");
            }
        }
    }

    fn check_enum_const(node: &Map<String, Value>, path: &str, findings: &mut Findings) {
        if let Some(values) = node.get("enum") {
            match values.as_array() {
                Some(members) if members.is_empty() => {
                    findings.error(path, "`enum` must not be empty");
                }
                Some(_) => {}
                None => findings.error(path, "`enum` must be an array"),
            }
        }

        if node.contains_key("enum") && node.contains_key("const") {
            findings.error(path, "`enum` and `const` are mutually exclusive");
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
