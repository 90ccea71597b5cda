//! Error types for the MCP server.
//!
//! Maps Firestore, Firebase Auth and transport failures to MCP-friendly error responses.

use serde::{Deserialize, Serialize};

/// A single field-level validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// Dotted path to the offending field (`data.tags[2]`), or empty for the root.
    pub field: String,
    /// Why the field was rejected.
    pub reason: String,
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.field.is_empty() {
            write!(f, "{}", self.reason)
        } else {
            write!(f, "'{}' {}", self.field, self.reason)
        }
    }
}

fn join_field_errors(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// MCP server errors.
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
pub enum McpError {
    /// Required configuration is missing or malformed.
    #[error("configuration error: {0}")]
    Config(String),

    /// Firebase rejected the configured credentials.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Error returned by the backing document store.
    #[error("firestore error ({code}): {message}")]
    Store {
        /// Status reported by the store (e.g. `PERMISSION_DENIED`)
        code: String,
        /// Human-readable error message
        message: String,
    },

    /// Unknown tool requested.
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    /// Missing required argument.
    #[error("missing required argument: {0}")]
    MissingArg(String),

    /// Invalid argument value.
    #[error("invalid argument '{name}': {reason}")]
    InvalidArg {
        /// Argument name
        name: String,
        /// Reason why it's invalid
        reason: String,
    },

    /// Tool input or output did not match its declared schema.
    #[error("invalid {direction} for tool '{tool}': {}", join_field_errors(.errors))]
    Validation {
        /// Tool whose schema was violated
        tool: String,
        /// `input` or `output`
        direction: String,
        /// Every offending field
        errors: Vec<FieldError>,
    },

    /// A tool call exceeded the configured deadline.
    #[error("tool '{tool}' timed out after {seconds}s")]
    Timeout {
        /// Tool that timed out
        tool: String,
        /// Deadline in seconds
        seconds: u64,
    },

    /// JSON-RPC protocol error.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for McpError {
    fn from(err: std::io::Error) -> Self {
        McpError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for McpError {
    fn from(err: serde_json::Error) -> Self {
        McpError::Protocol(format!("JSON error: {}", err))
    }
}

impl From<reqwest::Error> for McpError {
    fn from(err: reqwest::Error) -> Self {
        McpError::Store {
            code: "UNAVAILABLE".to_string(),
            message: err.to_string(),
        }
    }
}

/// JSON-RPC error codes.
pub mod rpc_codes {
    /// Parse error - Invalid JSON was received.
    pub const PARSE_ERROR: i32 = -32700;
    /// Invalid Request - The JSON sent is not a valid Request object.
    pub const INVALID_REQUEST: i32 = -32600;
    /// Method not found - The method does not exist / is not available.
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Invalid params - Invalid method parameter(s).
    pub const INVALID_PARAMS: i32 = -32602;
    /// Internal error - Internal JSON-RPC error.
    pub const INTERNAL_ERROR: i32 = -32603;
}

impl McpError {
    /// Convert to JSON-RPC error code.
    pub fn rpc_code(&self) -> i32 {
        match self {
            McpError::UnknownTool(_) => rpc_codes::METHOD_NOT_FOUND,
            McpError::MissingArg(_) | McpError::InvalidArg { .. } => rpc_codes::INVALID_PARAMS,
            McpError::Validation { direction, .. } if direction == "input" => {
                rpc_codes::INVALID_PARAMS
            }
            McpError::Protocol(_) => rpc_codes::INVALID_REQUEST,
            _ => rpc_codes::INTERNAL_ERROR,
        }
    }

    /// Whether this error belongs in a failed tool result rather than a JSON-RPC error.
    ///
    /// Failures that happen while talking to the store are reported to the caller as
    /// `isError` tool results; everything rejected before the store is reached is a
    /// protocol-level error.
    pub fn is_tool_failure(&self) -> bool {
        matches!(
            self,
            McpError::Config(_)
                | McpError::Auth(_)
                | McpError::Store { .. }
                | McpError::Timeout { .. }
        )
    }

    /// Build an input validation error for a single field.
    pub fn invalid_input(tool: &str, field: &str, reason: impl Into<String>) -> Self {
        McpError::Validation {
            tool: tool.to_string(),
            direction: "input".to_string(),
            errors: vec![FieldError {
                field: field.to_string(),
                reason: reason.into(),
            }],
        }
    }
}

/// Result type for MCP operations.
pub type Result<T> = std::result::Result<T, McpError>;
