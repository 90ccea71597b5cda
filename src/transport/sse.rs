//! Server-sent events binding.
//!
//! `GET /sse` opens a stream and registers a session; `POST /messages?sessionId=<id>` queues a
//! message for that session. Each session has one worker that handles its messages in order
//! and pushes the responses onto the stream as `message` events.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::{self, Stream, StreamExt};
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use crate::server::{JsonRpcResponse, McpServer};

/// Messages a session may have queued before posts are held back.
const INBOUND_CAPACITY: usize = 64;

/// Responses a session may have buffered before its worker waits for the client.
const OUTBOUND_CAPACITY: usize = 64;

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Session ID
pub type SessionId = String;

/// Open SSE sessions, keyed by id.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, mpsc::Sender<JsonValue>>>,
}

impl SessionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session
    pub fn insert(&self, id: SessionId, inbox: mpsc::Sender<JsonValue>) {
        self.sessions.write().insert(id, inbox);
    }

    /// Look up a session's inbox
    pub fn get(&self, id: &str) -> Option<mpsc::Sender<JsonValue>> {
        self.sessions.read().get(id).cloned()
    }

    /// Unregister a session
    pub fn remove(&self, id: &str) -> bool {
        self.sessions.write().remove(id).is_some()
    }

    /// Number of open sessions
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Whether no session is open
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

#[derive(Clone)]
struct SseState {
    server: Arc<McpServer>,
    sessions: Arc<SessionRegistry>,
}

#[derive(Debug, Deserialize)]
struct MessageParams {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

/// Build the SSE router with a fresh session registry.
pub fn router(server: Arc<McpServer>) -> Router {
    router_with_sessions(server, Arc::new(SessionRegistry::new()))
}

/// Build the SSE router around an existing session registry.
pub fn router_with_sessions(server: Arc<McpServer>, sessions: Arc<SessionRegistry>) -> Router {
    Router::new()
        .route("/sse", get(open_stream).fallback(not_found))
        .route("/messages", post(post_message).fallback(not_found))
        .fallback(not_found)
        .with_state(SseState { server, sessions })
}

type EventStream = Pin<Box<dyn Stream<Item = Result<Event, axum::Error>> + Send>>;

async fn open_stream(State(state): State<SseState>) -> Sse<SessionStream> {
    let session_id = Uuid::new_v4().to_string();
    let (inbox, mut inbound) = mpsc::channel::<JsonValue>(INBOUND_CAPACITY);
    let (outbound, responses) = mpsc::channel::<JsonRpcResponse>(OUTBOUND_CAPACITY);

    state.sessions.insert(session_id.clone(), inbox);
    tracing::info!(session = %session_id, open = state.sessions.len(), "SSE session opened");

    let server = state.server.clone();
    let worker_session = session_id.clone();
    tokio::spawn(async move {
        while let Some(message) = inbound.recv().await {
            if let Some(response) = server.handle_message(message).await {
                if outbound.send(response).await.is_err() {
                    break;
                }
            }
        }
        tracing::debug!(session = %worker_session, "Session worker stopped");
    });

    let endpoint = Event::default()
        .event("endpoint")
        .data(format!("/messages?sessionId={}", session_id));
    let messages = ReceiverStream::new(responses)
        .map(|response| Event::default().event("message").json_data(&response));
    let events: EventStream = Box::pin(stream::once(async move { Ok(endpoint) }).chain(messages));

    let stream = SessionStream {
        events,
        _guard: SessionGuard {
            id: session_id,
            sessions: state.sessions,
        },
    };
    Sse::new(stream).keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL))
}

async fn post_message(
    State(state): State<SseState>,
    Query(params): Query<MessageParams>,
    body: Bytes,
) -> Response {
    let Some((session_id, inbox)) = params
        .session_id
        .and_then(|id| state.sessions.get(&id).map(|inbox| (id, inbox)))
    else {
        return invalid_session();
    };

    let message: JsonValue = match serde_json::from_slice(&body) {
        Ok(message) => message,
        Err(e) => {
            tracing::debug!(session = %session_id, error = %e, "Rejecting malformed message");
            return (
                StatusCode::BAD_REQUEST,
                Json(JsonRpcResponse::parse_error(e)),
            )
                .into_response();
        }
    };

    if !deliver(&state.sessions, &session_id, &inbox, message).await {
        tracing::debug!(session = %session_id, "Session closed before the message was queued");
        return invalid_session();
    }
    (StatusCode::ACCEPTED, "Accepted").into_response()
}

/// Queue a message for a session, reporting whether the session was still open afterwards.
///
/// The stream may close between the lookup and the send while the worker still holds its
/// receiver; the registry check catches that window.
async fn deliver(
    sessions: &SessionRegistry,
    id: &str,
    inbox: &mpsc::Sender<JsonValue>,
    message: JsonValue,
) -> bool {
    inbox.send(message).await.is_ok() && sessions.get(id).is_some()
}

fn invalid_session() -> Response {
    (StatusCode::BAD_REQUEST, "Invalid session").into_response()
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "Not Found")
}

/// Removes its session from the registry when the event stream is dropped.
struct SessionGuard {
    id: SessionId,
    sessions: Arc<SessionRegistry>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.sessions.remove(&self.id) {
            tracing::info!(session = %self.id, "SSE session closed");
        }
    }
}

/// The event stream of one session.
pub struct SessionStream {
    events: EventStream,
    _guard: SessionGuard,
}

impl Stream for SessionStream {
    type Item = Result<Event, axum::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.as_mut().poll_next(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_insert_lookup_remove() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = mpsc::channel(1);
        registry.insert("s1".to_string(), tx);

        assert_eq!(registry.len(), 1);
        assert!(registry.get("s1").is_some());
        assert!(registry.get("s2").is_none());
        assert!(registry.remove("s1"));
        assert!(!registry.remove("s1"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_guard_unregisters_on_drop() {
        let registry = Arc::new(SessionRegistry::new());
        let (tx, _rx) = mpsc::channel(1);
        registry.insert("s1".to_string(), tx);

        let guard = SessionGuard {
            id: "s1".to_string(),
            sessions: registry.clone(),
        };
        assert_eq!(registry.len(), 1);
        drop(guard);
        assert!(registry.get("s1").is_none());
    }

    #[tokio::test]
    async fn test_deliver_to_open_session() {
        let registry = SessionRegistry::new();
        let (tx, mut rx) = mpsc::channel(1);
        registry.insert("s1".to_string(), tx.clone());

        assert!(deliver(&registry, "s1", &tx, JsonValue::Bool(true)).await);
        assert_eq!(rx.recv().await, Some(JsonValue::Bool(true)));
    }

    #[tokio::test]
    async fn test_deliver_after_stream_closed_is_rejected() {
        let registry = Arc::new(SessionRegistry::new());
        let (tx, _worker_rx) = mpsc::channel(1);
        registry.insert("s1".to_string(), tx);

        // a post looked up the inbox, then the stream went away
        let inbox = registry.get("s1").unwrap();
        drop(SessionGuard {
            id: "s1".to_string(),
            sessions: registry.clone(),
        });

        assert!(!deliver(&registry, "s1", &inbox, JsonValue::Null).await);
    }

    #[tokio::test]
    async fn test_send_to_closed_session_fails() {
        let registry = SessionRegistry::new();
        let (tx, rx) = mpsc::channel(1);
        registry.insert("s1".to_string(), tx);
        drop(rx);
        let inbox = registry.get("s1").unwrap();
        assert!(inbox.send(JsonValue::Null).await.is_err());
    }
}
