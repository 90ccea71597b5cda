//! MCP server implementation.
//!
//! Handles JSON-RPC 2.0 messages according to the MCP protocol. The server is transport
//! agnostic: every binding hands it one decoded message at a time and writes back whatever
//! response it returns.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as JsonValue};

use crate::error::{rpc_codes, McpError};
use crate::store::StoreConnector;
use crate::tools::{ToolRegistry, ToolResult};

/// MCP protocol version we prefer.
pub const PROTOCOL_VERSION: &str = "2025-06-18";

/// Protocol versions echoed back when a client asks for them.
const SUPPORTED_VERSIONS: [&str; 3] = [PROTOCOL_VERSION, "2025-03-26", "2024-11-05"];

/// Server information.
const SERVER_NAME: &str = "firestore-mcp";
const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// JSON-RPC 2.0 request.
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: Option<JsonValue>,
    pub method: String,
    #[serde(default)]
    pub params: Option<JsonValue>,
}

/// JSON-RPC 2.0 response.
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    /// `null` when the request id could not be determined.
    pub id: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<JsonValue>,
}

impl JsonRpcResponse {
    /// Create a success response.
    pub fn success(id: Option<JsonValue>, result: JsonValue) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response.
    pub fn error(id: Option<JsonValue>, code: i32, message: String) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message,
                data: None,
            }),
        }
    }

    /// Create an error response from an McpError.
    pub fn from_error(id: Option<JsonValue>, err: McpError) -> Self {
        let data = match &err {
            McpError::Validation { tool, errors, .. } => Some(json!({
                "tool": tool,
                "errors": errors,
            })),
            _ => None,
        };
        let mut response = Self::error(id, err.rpc_code(), err.to_string());
        if let Some(error) = response.error.as_mut() {
            error.data = data;
        }
        response
    }

    /// The parse-error response sent for undecodable input.
    pub fn parse_error(detail: impl std::fmt::Display) -> Self {
        Self::error(
            None,
            rpc_codes::PARSE_ERROR,
            format!("Parse error: {}", detail),
        )
    }
}

/// MCP server.
///
/// Shared by every connection of a binding; all state lives in the store connector and the
/// static tool registry.
pub struct McpServer {
    store: StoreConnector,
    registry: ToolRegistry,
}

impl McpServer {
    /// Create a server around a store connector and a tool registry.
    pub fn new(store: StoreConnector, registry: ToolRegistry) -> Self {
        Self { store, registry }
    }

    /// The store connector tools run against.
    pub fn store(&self) -> &StoreConnector {
        &self.store
    }

    /// Decode and handle one line of text.
    ///
    /// Undecodable input is answered with a parse error. Notifications yield `None`.
    pub async fn handle_line(&self, line: &str) -> Option<JsonRpcResponse> {
        match serde_json::from_str::<JsonValue>(line) {
            Ok(message) => self.handle_message(message).await,
            Err(e) => Some(JsonRpcResponse::parse_error(e)),
        }
    }

    /// Handle one decoded JSON-RPC message. Notifications yield `None`.
    pub async fn handle_message(&self, message: JsonValue) -> Option<JsonRpcResponse> {
        let id = message.get("id").cloned();
        let request = match serde_json::from_value::<JsonRpcRequest>(message) {
            Ok(request) => request,
            Err(e) => {
                return Some(JsonRpcResponse::error(
                    id,
                    rpc_codes::INVALID_REQUEST,
                    format!("Invalid request: {}", e),
                ))
            }
        };

        if request.id.is_none() {
            self.handle_notification(&request);
            return None;
        }

        Some(self.handle_request(request).await)
    }

    fn handle_notification(&self, request: &JsonRpcRequest) {
        match request.method.as_str() {
            "notifications/initialized" | "initialized" => {
                tracing::debug!("Client initialized");
            }
            "notifications/cancelled" => {
                tracing::debug!(params = ?request.params, "Client cancelled a request");
            }
            other => {
                tracing::debug!(method = other, "Ignoring notification");
            }
        }
    }

    /// Handle a single JSON-RPC request.
    async fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        // Validate JSON-RPC version
        if request.jsonrpc != "2.0" {
            return JsonRpcResponse::error(
                request.id,
                rpc_codes::INVALID_REQUEST,
                "Invalid JSON-RPC version".to_string(),
            );
        }

        // Route to appropriate handler
        match request.method.as_str() {
            "initialize" => self.handle_initialize(request),
            "tools/list" => self.handle_tools_list(request),
            "tools/call" => self.handle_tools_call(request).await,
            "ping" => JsonRpcResponse::success(request.id, json!({})),
            _ => JsonRpcResponse::error(
                request.id,
                rpc_codes::METHOD_NOT_FOUND,
                format!("Unknown method: {}", request.method),
            ),
        }
    }

    /// Handle the initialize request.
    fn handle_initialize(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let requested = request
            .params
            .as_ref()
            .and_then(|p| p.get("protocolVersion"))
            .and_then(|v| v.as_str());
        let version = requested
            .filter(|v| SUPPORTED_VERSIONS.contains(v))
            .unwrap_or(PROTOCOL_VERSION);

        tracing::info!(
            requested = requested.unwrap_or("none"),
            negotiated = version,
            "Client initializing"
        );

        JsonRpcResponse::success(
            request.id,
            json!({
                "protocolVersion": version,
                "capabilities": {
                    "tools": { "listChanged": false }
                },
                "serverInfo": {
                    "name": SERVER_NAME,
                    "version": SERVER_VERSION
                }
            }),
        )
    }

    /// Handle the tools/list request.
    fn handle_tools_list(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let tools: Vec<JsonValue> = self
            .registry
            .tools()
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "title": t.title,
                    "description": t.description,
                    "inputSchema": t.input_schema,
                    "outputSchema": t.output_schema
                })
            })
            .collect();

        JsonRpcResponse::success(request.id, json!({ "tools": tools }))
    }

    /// Handle the tools/call request.
    async fn handle_tools_call(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        // Extract name and arguments from params
        let params = match &request.params {
            Some(JsonValue::Object(obj)) => obj,
            _ => {
                return JsonRpcResponse::error(
                    request.id,
                    rpc_codes::INVALID_PARAMS,
                    "Missing params object".to_string(),
                )
            }
        };

        let name = match params.get("name").and_then(|v| v.as_str()) {
            Some(n) => n.to_string(),
            None => {
                return JsonRpcResponse::error(
                    request.id,
                    rpc_codes::INVALID_PARAMS,
                    "Missing 'name' in params".to_string(),
                )
            }
        };

        let arguments = match params.get("arguments") {
            Some(JsonValue::Object(obj)) => obj.clone(),
            Some(JsonValue::Null) | None => Map::new(),
            _ => {
                return JsonRpcResponse::error(
                    request.id,
                    rpc_codes::INVALID_PARAMS,
                    "'arguments' must be an object".to_string(),
                )
            }
        };

        tracing::debug!(tool = %name, "Calling tool");
        match self.registry.dispatch(&self.store, &name, arguments).await {
            Ok(result) => JsonRpcResponse::success(request.id, result.into_call_result()),
            Err(err) if err.is_tool_failure() => {
                tracing::warn!(tool = %name, error = %err, "Tool failed");
                JsonRpcResponse::success(request.id, ToolResult::error_call_result(&err))
            }
            Err(err) => {
                tracing::debug!(tool = %name, error = %err, "Tool call rejected");
                JsonRpcResponse::from_error(request.id, err)
            }
        }
    }
}
