//! Tool registry and category definitions.
//!
//! Provides the infrastructure for registering and dispatching MCP tools.

pub mod document;
pub mod query;
pub mod validate;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as JsonValue};

use crate::error::{FieldError, McpError, Result};
use crate::store::StoreConnector;

/// A tool definition for the MCP tools/list response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDef {
    /// Tool name (e.g., "get_document")
    pub name: String,
    /// Human-readable display name
    pub title: String,
    /// Tool description
    pub description: String,
    /// JSON Schema for the input parameters
    #[serde(rename = "inputSchema")]
    pub input_schema: JsonValue,
    /// JSON Schema for the structured result
    #[serde(rename = "outputSchema")]
    pub output_schema: JsonValue,
}

impl ToolDef {
    /// Create a new tool definition.
    pub fn new(
        name: &str,
        title: &str,
        description: &str,
        input_schema: JsonValue,
        output_schema: JsonValue,
    ) -> Self {
        Self {
            name: name.to_string(),
            title: title.to_string(),
            description: description.to_string(),
            input_schema,
            output_schema,
        }
    }
}

/// Structured payload returned by a tool.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    /// Payload matching the tool's output schema
    pub structured: JsonValue,
}

impl ToolResult {
    /// Wrap a structured payload.
    pub fn new(structured: JsonValue) -> Self {
        Self { structured }
    }

    /// Pretty-printed text form of the payload.
    pub fn text(&self) -> String {
        serde_json::to_string_pretty(&self.structured).unwrap_or_else(|_| "null".to_string())
    }

    /// The `tools/call` result object.
    pub fn into_call_result(self) -> JsonValue {
        json!({
            "content": [{ "type": "text", "text": self.text() }],
            "structuredContent": self.structured,
        })
    }

    /// The `tools/call` result object for a tool that failed while running.
    pub fn error_call_result(err: &McpError) -> JsonValue {
        json!({
            "content": [{ "type": "text", "text": err.to_string() }],
            "isError": true,
        })
    }
}

/// Registry of all available tools.
pub struct ToolRegistry {
    tools: Vec<ToolDef>,
    timeout: Option<Duration>,
}

impl ToolRegistry {
    /// Create a new registry with all tools registered.
    pub fn new() -> Self {
        let mut tools = Vec::new();

        tools.extend(document::tools());
        tools.extend(query::tools());

        Self {
            tools,
            timeout: None,
        }
    }

    /// Apply a deadline to every tool call.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Get all tool definitions.
    pub fn tools(&self) -> &[ToolDef] {
        &self.tools
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<&ToolDef> {
        self.tools.iter().find(|t| t.name == name)
    }

    /// Validate, run, and check a tool call.
    ///
    /// Input is checked against the tool's input schema before the store is touched, and
    /// the handler's payload is checked against the output schema before it is returned.
    pub async fn dispatch(
        &self,
        store: &StoreConnector,
        name: &str,
        args: Map<String, JsonValue>,
    ) -> Result<ToolResult> {
        let def = self
            .get(name)
            .ok_or_else(|| McpError::UnknownTool(name.to_string()))?;

        let args = JsonValue::Object(args);
        validate::check(&def.input_schema, &args).map_err(|errors| McpError::Validation {
            tool: name.to_string(),
            direction: "input".to_string(),
            errors,
        })?;
        let JsonValue::Object(args) = args else {
            return Err(McpError::Internal("arguments are not an object".to_string()));
        };

        let call = self.route(store, name, args);
        let payload = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| McpError::Timeout {
                    tool: name.to_string(),
                    seconds: limit.as_secs(),
                })?,
            None => call.await,
        }
        .map_err(|e| attribute_to_tool(name, e))?;

        validate::check(&def.output_schema, &payload).map_err(|errors| {
            tracing::error!(tool = name, ?errors, "Tool produced a payload outside its schema");
            McpError::Validation {
                tool: name.to_string(),
                direction: "output".to_string(),
                errors,
            }
        })?;

        Ok(ToolResult::new(payload))
    }

    async fn route(
        &self,
        store: &StoreConnector,
        name: &str,
        args: Map<String, JsonValue>,
    ) -> Result<JsonValue> {
        match name {
            "get_document" | "set_document" | "delete_document" | "add_document" => {
                document::dispatch(store, name, args).await
            }
            "query_collection" => query::dispatch(store, name, args).await,
            _ => Err(McpError::UnknownTool(name.to_string())),
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Report argument errors raised by a handler as validation errors of that tool.
fn attribute_to_tool(tool: &str, err: McpError) -> McpError {
    match err {
        McpError::MissingArg(field) => McpError::invalid_input(tool, &field, "is required"),
        McpError::InvalidArg { name, reason } => McpError::Validation {
            tool: tool.to_string(),
            direction: "input".to_string(),
            errors: vec![FieldError {
                field: name,
                reason,
            }],
        },
        other => other,
    }
}

/// Helper macro for creating JSON Schema for tool input and output shapes.
///
/// Each property is `"name": type`, optionally followed by `= "description"`.
#[macro_export]
macro_rules! schema {
    // Object with required and optional properties
    (object {
        required: { $($req_name:literal : $req_type:tt $(= $req_desc:literal)?),* $(,)? },
        optional: { $($opt_name:literal : $opt_type:tt $(= $opt_desc:literal)?),* $(,)? }
    }) => {{
        #[allow(unused_mut)]
        let mut required: Vec<&str> = Vec::new();
        $(required.push($req_name);)*

        #[allow(unused_mut)]
        let mut props = serde_json::Map::new();
        $(props.insert($req_name.to_string(), $crate::schema!(@prop $req_type $($req_desc)?));)*
        $(props.insert($opt_name.to_string(), $crate::schema!(@prop $opt_type $($opt_desc)?));)*

        serde_json::json!({
            "type": "object",
            "properties": props,
            "required": required
        })
    }};

    // Object with only required properties
    (object {
        required: { $($req_name:literal : $req_type:tt $(= $req_desc:literal)?),* $(,)? }
    }) => {
        $crate::schema!(object {
            required: { $($req_name : $req_type $(= $req_desc)?),* },
            optional: {}
        })
    };

    // Property with an optional description
    (@prop $ty:tt) => { $crate::schema!(@type $ty) };
    (@prop $ty:tt $desc:literal) => {{
        let mut prop = $crate::schema!(@type $ty);
        prop["description"] = serde_json::json!($desc);
        prop
    }};

    // Type mappings
    (@type string) => { serde_json::json!({"type": "string"}) };
    (@type number) => { serde_json::json!({"type": "number"}) };
    (@type integer) => { serde_json::json!({"type": "integer"}) };
    (@type positive_integer) => { serde_json::json!({"type": "integer", "minimum": 1}) };
    (@type boolean) => { serde_json::json!({"type": "boolean"}) };
    (@type any) => { serde_json::json!({}) };
    (@type object) => { serde_json::json!({"type": "object"}) };
    (@type array_object) => { serde_json::json!({"type": "array", "items": {"type": "object"}}) };
    (@type operator) => {
        serde_json::json!({"type": "string", "enum": $crate::store::FilterOp::ALL})
    };
    (@type array_filter) => {{
        let item = $crate::schema!(object {
            required: {
                "field": string = "Field path to compare (dots address nested fields)",
                "operator": operator,
                "value": any = "Value to compare against"
            }
        });
        serde_json::json!({"type": "array", "items": item})
    }};
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::sync::Arc;

    fn connector() -> StoreConnector {
        StoreConnector::from_store(Arc::new(MemoryStore::new()))
    }

    fn args(value: JsonValue) -> Map<String, JsonValue> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_registry_has_every_tool_once() {
        let registry = ToolRegistry::new();
        let mut names: Vec<_> = registry.tools().iter().map(|t| t.name.as_str()).collect();
        names.sort();
        assert_eq!(
            names,
            vec![
                "add_document",
                "delete_document",
                "get_document",
                "query_collection",
                "set_document"
            ]
        );
        for tool in registry.tools() {
            assert_eq!(tool.input_schema["type"], "object");
            assert_eq!(tool.output_schema["type"], "object");
            assert!(!tool.title.is_empty());
        }
    }

    #[test]
    fn test_schema_macro_descriptions() {
        let schema = schema!(object {
            required: { "path": string = "Document path" },
            optional: { "merge": boolean }
        });
        assert_eq!(schema["properties"]["path"]["description"], "Document path");
        assert!(schema["properties"]["merge"].get("description").is_none());
        assert_eq!(schema["required"], json!(["path"]));
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let registry = ToolRegistry::new();
        let err = registry
            .dispatch(&connector(), "drop_database", Map::new())
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::UnknownTool(_)));
    }

    #[tokio::test]
    async fn test_input_validation_names_tool_and_field() {
        let registry = ToolRegistry::new();
        let err = registry
            .dispatch(&connector(), "set_document", args(json!({"path": 7})))
            .await
            .unwrap_err();
        match err {
            McpError::Validation {
                tool,
                direction,
                errors,
            } => {
                assert_eq!(tool, "set_document");
                assert_eq!(direction, "input");
                let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
                assert!(fields.contains(&"path"));
                assert!(fields.contains(&"data"));
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_handler_argument_errors_are_attributed() {
        let registry = ToolRegistry::new();
        let err = registry
            .dispatch(&connector(), "get_document", args(json!({"path": "users"})))
            .await
            .unwrap_err();
        match err {
            McpError::Validation { tool, errors, .. } => {
                assert_eq!(tool, "get_document");
                assert_eq!(errors[0].field, "path");
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_call_result_shapes() {
        let ok = ToolResult::new(json!({"success": true})).into_call_result();
        assert_eq!(ok["structuredContent"], json!({"success": true}));
        assert_eq!(ok["content"][0]["type"], "text");
        let text = ok["content"][0]["text"].as_str().unwrap();
        assert_eq!(
            serde_json::from_str::<JsonValue>(text).unwrap(),
            json!({"success": true})
        );

        let failed = ToolResult::error_call_result(&McpError::Store {
            code: "PERMISSION_DENIED".to_string(),
            message: "Missing or insufficient permissions.".to_string(),
        });
        assert_eq!(failed["isError"], true);
        assert!(failed["content"][0]["text"]
            .as_str()
            .unwrap()
            .contains("PERMISSION_DENIED"));
    }
}
