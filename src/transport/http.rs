//! Stateless HTTP binding: one JSON-RPC message per `POST /mcp`.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::Value as JsonValue;

use crate::server::{JsonRpcResponse, McpServer};

/// Build the `/mcp` router.
pub fn router(server: Arc<McpServer>) -> Router {
    Router::new()
        .route("/mcp", post(handle_mcp).fallback(method_not_allowed))
        .fallback(not_found)
        .with_state(server)
}

async fn handle_mcp(State(server): State<Arc<McpServer>>, body: Bytes) -> Response {
    let message: JsonValue = match serde_json::from_slice(&body) {
        Ok(message) => message,
        Err(e) => {
            tracing::debug!(error = %e, "Rejecting malformed request body");
            return (
                StatusCode::BAD_REQUEST,
                Json(JsonRpcResponse::parse_error(e)),
            )
                .into_response();
        }
    };

    match server.handle_message(message).await {
        Some(response) => Json(response).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

async fn method_not_allowed() -> impl IntoResponse {
    (StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed")
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "Not Found - Use /mcp endpoint")
}
