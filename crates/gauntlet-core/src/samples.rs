//! Representative sample arguments for a tool schema
//!
//! Produces one plausible argument object per tool so every tool can be
//! exercised without a human in the loop. Only `properties` of the root
//! object are filled; the generated values are deliberately small.

use serde_json::{json, Map, Value};

/// Build an argument object for a tool's input schema
#[must_use]
pub fn sample_arguments(schema: &Value) -> Value {
    let mut args = Map::new();
    if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
        for (name, property) in properties {
            args.insert(name.clone(), sample_value(name, property));
        }
    }
    Value::Object(args)
}

/// Sample for a single property
#[must_use]
pub fn sample_value(name: &str, schema: &Value) -> Value {
    if let Some(value) = schema.get("const") {
        return value.clone();
    }
    if let Some(first) = schema.get("enum").and_then(Value::as_array).and_then(|v| v.first()) {
        return first.clone();
    }
    if let Some(value) = schema.get("default") {
        return value.clone();
    }

    match primary_type(schema).as_deref() {
        Some("string") => Value::String(sample_string(name, schema)),
        Some("integer") => json!(sample_integer(schema)),
        Some("number") => sample_number(schema),
        Some("boolean") => Value::Bool(true),
        Some("array") => json!([]),
        Some("object") => json!({}),
        Some("null") => Value::Null,
        _ => Value::String(sample_string(name, schema)),
    }
}

/// First non-null member of `type`, or the first `anyOf`/`oneOf` branch's
fn primary_type(schema: &Value) -> Option<String> {
    match schema.get("type") {
        Some(Value::String(t)) => return Some(t.clone()),
        Some(Value::Array(types)) => {
            let names: Vec<&str> = types.iter().filter_map(Value::as_str).collect();
            return names
                .iter()
                .find(|t| **t != "null")
                .or_else(|| names.first())
                .map(|t| (*t).to_string());
        }
        _ => {}
    }
    ["anyOf", "oneOf"]
        .iter()
        .filter_map(|k| schema.get(*k).and_then(Value::as_array))
        .flatten()
        .find_map(primary_type)
}

fn sample_string(name: &str, schema: &Value) -> String {
    let format = schema.get("format").and_then(Value::as_str).unwrap_or_default();
    let by_format = match format {
        "uri" | "url" | "uri-reference" => Some("https://example.com"),
        "email" => Some("test@example.com"),
        "date" => Some("2024-01-01"),
        "date-time" => Some("2024-01-01T00:00:00Z"),
        "uuid" => Some("00000000-0000-4000-8000-000000000000"),
        _ => None,
    };
    if let Some(sample) = by_format {
        return sample.to_string();
    }

    let lower = name.to_lowercase();
    let sample = if lower.contains("url") || lower.contains("uri") || lower.contains("link") {
        "https://example.com".to_string()
    } else if lower.contains("email") {
        "test@example.com".to_string()
    } else {
        "test".to_string()
    };

    let min_len = schema
        .get("minLength")
        .and_then(Value::as_u64)
        .and_then(|n| usize::try_from(n).ok())
        .unwrap_or(0);
    if sample.len() < min_len {
        let mut padded = sample;
        padded.push_str(&"x".repeat(min_len - padded.len()));
        return padded;
    }
    sample
}

fn sample_integer(schema: &Value) -> i64 {
    schema
        .get("minimum")
        .and_then(Value::as_i64)
        .or_else(|| schema.get("exclusiveMinimum").and_then(Value::as_i64).map(|n| n + 1))
        .unwrap_or(1)
}

fn sample_number(schema: &Value) -> Value {
    if let Some(min) = schema.get("minimum").filter(|v| v.is_number()) {
        return min.clone();
    }
    if let Some(min) = schema.get("exclusiveMinimum").and_then(Value::as_f64) {
        return json!(min + 1.0);
    }
    json!(1)
}
