//! Schema checks for tool payloads.
//!
//! Understands the subset of JSON Schema that `schema!` emits: `type`, `properties`,
//! `required`, `items`, `enum` and `minimum`. Every violation is collected so callers see
//! all offending fields at once.

use serde_json::Value as JsonValue;

use crate::error::FieldError;

/// Check `value` against `schema`, returning every field-level violation.
pub fn check(schema: &JsonValue, value: &JsonValue) -> Result<(), Vec<FieldError>> {
    let mut errors = Vec::new();
    check_at(schema, value, "", &mut errors);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_at(schema: &JsonValue, value: &JsonValue, path: &str, errors: &mut Vec<FieldError>) {
    let fail = |errors: &mut Vec<FieldError>, reason: String| {
        errors.push(FieldError {
            field: path.to_string(),
            reason,
        })
    };

    if let Some(expected) = schema.get("type").and_then(|t| t.as_str()) {
        if !has_type(value, expected) {
            fail(
                errors,
                format!("must be {} (got {})", with_article(expected), type_name(value)),
            );
            return;
        }
    }

    if let Some(allowed) = schema.get("enum").and_then(|e| e.as_array()) {
        if !allowed.contains(value) {
            let options: Vec<String> = allowed.iter().map(|v| v.to_string()).collect();
            fail(errors, format!("must be one of {}", options.join(", ")));
        }
    }

    if let (Some(min), Some(actual)) = (
        schema.get("minimum").and_then(|m| m.as_f64()),
        value.as_f64(),
    ) {
        if actual < min {
            fail(errors, format!("must be at least {}", min));
        }
    }

    if let Some(obj) = value.as_object() {
        if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
            for name in required.iter().filter_map(|n| n.as_str()) {
                if !obj.contains_key(name) {
                    errors.push(FieldError {
                        field: join(path, name),
                        reason: "is required".to_string(),
                    });
                }
            }
        }
        if let Some(props) = schema.get("properties").and_then(|p| p.as_object()) {
            for (name, prop_schema) in props {
                if let Some(prop_value) = obj.get(name) {
                    check_at(prop_schema, prop_value, &join(path, name), errors);
                }
            }
        }
    }

    if let (Some(items), Some(arr)) = (schema.get("items"), value.as_array()) {
        for (i, item) in arr.iter().enumerate() {
            check_at(items, item, &format!("{}[{}]", path, i), errors);
        }
    }
}

fn join(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", path, name)
    }
}

fn has_type(value: &JsonValue, expected: &str) -> bool {
    match expected {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        "number" => value.is_number(),
        "integer" => {
            value.is_i64()
                || value.is_u64()
                || value.as_f64().map_or(false, |f| f.fract() == 0.0)
        }
        _ => true,
    }
}

fn type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

fn with_article(type_name: &str) -> String {
    match type_name.chars().next() {
        Some('a' | 'e' | 'i' | 'o' | 'u') => format!("an {}", type_name),
        _ => format!("a {}", type_name),
    }
}
