//! # firestore-mcp
//!
//! MCP (Model Context Protocol) server for Cloud Firestore.
//!
//! This crate exposes basic Firestore document operations as MCP tools for AI agents,
//! speaking JSON-RPC 2.0 over one of three bindings chosen at startup.
//!
//! ## Features
//!
//! - **5 tools**: `get_document`, `set_document`, `delete_document`, `add_document`,
//!   `query_collection`
//! - **Schema-checked calls**: tool input and output are validated against the declared
//!   schemas, with field-level errors
//! - **Lazy connection**: Firebase sign-in happens on first tool use and is shared by every
//!   caller
//! - **Transports**: stdio, stateless HTTP (`POST /mcp`) and SSE (`GET /sse` +
//!   `POST /messages`)
//!
//! ## Usage
//!
//! The server is typically run as an executable and configured in AI tools like Claude Desktop:
//!
//! ```json
//! {
//!   "mcpServers": {
//!     "firestore": {
//!       "command": "/path/to/firestore-mcp",
//!       "env": {
//!         "MCP_TRANSPORT": "stdio",
//!         "FIREBASE_API_KEY": "...",
//!         "FIREBASE_PROJECT_ID": "my-project",
//!         "FIREBASE_USER_EMAIL": "agent@example.com",
//!         "FIREBASE_USER_PASSWORD": "..."
//!       }
//!     }
//!   }
//! }
//! ```
//!
//! ## Library Usage
//!
//! For testing or embedding, the server can run against the in-memory store:
//!
//! ```no_run
//! use std::sync::Arc;
//! use firestore_mcp::{McpServer, MemoryFactory, StoreConnector, ToolRegistry};
//!
//! # async fn demo() {
//! let server = McpServer::new(StoreConnector::new(MemoryFactory::new()), ToolRegistry::new());
//! let response = server
//!     .handle_line(r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#)
//!     .await;
//! # let _ = (Arc::new(server), response);
//! # }
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod convert;
pub mod error;
pub mod server;
pub mod store;
pub mod tools;
pub mod transport;

pub use config::{FirebaseConfig, ServerConfig, TransportMode};
pub use error::{FieldError, McpError, Result};
pub use server::{JsonRpcRequest, JsonRpcResponse, McpServer};
pub use store::{
    Document, DocumentStore, FirestoreFactory, MemoryFactory, MemoryStore, StoreConnector,
    StoreFactory,
};
pub use tools::{ToolDef, ToolRegistry, ToolResult};
