//! Conversion utilities between JSON and Firestore REST values.
//!
//! Firestore's REST API wraps every value in a typed envelope (`{"stringValue": "x"}`,
//! `{"mapValue": {"fields": {...}}}`). Tool payloads are plain JSON, so everything crossing
//! the store boundary goes through [`json_to_value`] / [`value_to_json`].

use serde_json::{json, Map, Value as JsonValue};

use crate::error::{McpError, Result};

/// Convert a plain JSON value into a Firestore `Value` envelope.
pub fn json_to_value(json: &JsonValue) -> JsonValue {
    match json {
        JsonValue::Null => json!({ "nullValue": null }),
        JsonValue::Bool(b) => json!({ "booleanValue": b }),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                // int64 travels as a decimal string
                json!({ "integerValue": i.to_string() })
            } else if let Some(u) = n.as_u64() {
                json!({ "integerValue": u.to_string() })
            } else {
                json!({ "doubleValue": n.as_f64().unwrap_or(f64::NAN) })
            }
        }
        JsonValue::String(s) => json!({ "stringValue": s }),
        JsonValue::Array(arr) => {
            let values: Vec<JsonValue> = arr.iter().map(json_to_value).collect();
            json!({ "arrayValue": { "values": values } })
        }
        JsonValue::Object(map) => json!({ "mapValue": { "fields": map_to_fields(map) } }),
    }
}

/// Convert a JSON object into a Firestore `fields` map.
pub fn map_to_fields(map: &Map<String, JsonValue>) -> JsonValue {
    let fields: Map<String, JsonValue> = map
        .iter()
        .map(|(k, v)| (k.clone(), json_to_value(v)))
        .collect();
    JsonValue::Object(fields)
}

/// A value the store sent back that cannot be decoded.
fn malformed(message: String) -> McpError {
    McpError::Store {
        code: "INTERNAL".to_string(),
        message,
    }
}

/// Convert a Firestore `Value` envelope back into plain JSON.
pub fn value_to_json(value: &JsonValue) -> Result<JsonValue> {
    let obj = value
        .as_object()
        .ok_or_else(|| malformed(format!("malformed Firestore value: {}", value)))?;
    let (kind, inner) = obj
        .iter()
        .next()
        .ok_or_else(|| malformed("empty Firestore value".to_string()))?;

    match kind.as_str() {
        "nullValue" => Ok(JsonValue::Null),
        "booleanValue" => Ok(JsonValue::Bool(inner.as_bool().unwrap_or(false))),
        "integerValue" => {
            let parsed = match inner {
                JsonValue::String(s) => s.parse::<i64>().ok(),
                other => other.as_i64(),
            };
            parsed.map(JsonValue::from).ok_or_else(|| {
                malformed(format!("malformed integerValue: {}", inner))
            })
        }
        "doubleValue" => match inner {
            // NaN and the infinities are sent as strings
            JsonValue::String(s) => Ok(JsonValue::String(s.clone())),
            other => Ok(other.clone()),
        },
        "stringValue" | "timestampValue" | "referenceValue" | "bytesValue" => {
            Ok(inner.clone())
        }
        "geoPointValue" => Ok(json!({
            "latitude": inner.get("latitude").cloned().unwrap_or(json!(0.0)),
            "longitude": inner.get("longitude").cloned().unwrap_or(json!(0.0)),
        })),
        "arrayValue" => {
            let values = inner
                .get("values")
                .and_then(|v| v.as_array())
                .map(|arr| arr.iter().map(value_to_json).collect::<Result<Vec<_>>>())
                .transpose()?
                .unwrap_or_default();
            Ok(JsonValue::Array(values))
        }
        "mapValue" => {
            let fields = inner.get("fields").cloned().unwrap_or_else(|| json!({}));
            Ok(JsonValue::Object(fields_to_map(&fields)?))
        }
        other => Err(malformed(format!(
            "unsupported Firestore value type: {}",
            other
        ))),
    }
}

/// Convert a Firestore `fields` map into a JSON object.
pub fn fields_to_map(fields: &JsonValue) -> Result<Map<String, JsonValue>> {
    match fields {
        JsonValue::Object(map) => map
            .iter()
            .map(|(k, v)| Ok((k.clone(), value_to_json(v)?)))
            .collect(),
        JsonValue::Null => Ok(Map::new()),
        other => Err(malformed(format!(
            "malformed Firestore fields: {}",
            other
        ))),
    }
}

/// Leaf field paths of a payload, as used by a merging write's update mask.
///
/// Nested maps contribute their own leaves so that they merge deeply; an empty map is
/// itself a leaf.
pub fn field_paths(map: &Map<String, JsonValue>) -> Vec<String> {
    let mut paths = Vec::new();
    collect_paths(map, &mut Vec::new(), &mut paths);
    paths
}

fn collect_paths(map: &Map<String, JsonValue>, prefix: &mut Vec<String>, out: &mut Vec<String>) {
    for (key, value) in map {
        prefix.push(quote_segment(key));
        match value {
            JsonValue::Object(inner) if !inner.is_empty() => collect_paths(inner, prefix, out),
            _ => out.push(prefix.join(".")),
        }
        prefix.pop();
    }
}

/// Quote a field path segment with backticks unless it is a simple identifier.
pub fn quote_segment(segment: &str) -> String {
    let simple = !segment.is_empty()
        && segment
            .chars()
            .next()
            .map_or(false, |c| c.is_ascii_alphabetic() || c == '_')
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if simple {
        segment.to_string()
    } else {
        format!("`{}`", segment.replace('\\', "\\\\").replace('`', "\\`"))
    }
}

/// Helper to get a required string argument from JSON arguments.
pub fn get_string_arg(args: &Map<String, JsonValue>, name: &str) -> Result<String> {
    args.get(name)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| McpError::MissingArg(name.to_string()))
}

/// Helper to get a required object argument from JSON arguments.
pub fn get_object_arg(args: &Map<String, JsonValue>, name: &str) -> Result<Map<String, JsonValue>> {
    match args.get(name) {
        Some(JsonValue::Object(map)) => Ok(map.clone()),
        Some(_) => Err(McpError::InvalidArg {
            name: name.to_string(),
            reason: "Expected an object".to_string(),
        }),
        None => Err(McpError::MissingArg(name.to_string())),
    }
}

/// Helper to get an optional u64 argument from JSON arguments.
///
/// Integral floats such as `2.0` count as integers.
pub fn get_optional_u64(args: &Map<String, JsonValue>, name: &str) -> Option<u64> {
    args.get(name).and_then(|v| {
        v.as_u64().or_else(|| {
            v.as_f64()
                .filter(|f| f.fract() == 0.0 && *f >= 0.0 && *f <= u64::MAX as f64)
                .map(|f| f as u64)
        })
    })
}

/// Helper to get an optional boolean argument.
pub fn get_optional_bool(args: &Map<String, JsonValue>, name: &str) -> Option<bool> {
    args.get(name).and_then(|v| v.as_bool())
}
