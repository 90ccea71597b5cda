//! Document store abstraction and the process-wide connection.
//!
//! Tools never talk to Firestore directly: they ask the [`StoreConnector`] for the shared
//! [`DocumentStore`] handle, which is created on first use by a [`StoreFactory`].

pub mod firestore;
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::error::{McpError, Result};

pub use firestore::{FirestoreFactory, FirestoreStore};
pub use memory::{MemoryFactory, MemoryStore};

/// A document returned by a query, tagged with its id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Last path segment of the document.
    pub id: String,
    /// Document fields.
    pub data: Map<String, JsonValue>,
}

impl Document {
    /// Flatten into `{id, ...fields}`, the shape returned to tool callers.
    pub fn into_tagged(self) -> JsonValue {
        let mut obj = Map::with_capacity(self.data.len() + 1);
        obj.insert("id".to_string(), JsonValue::String(self.id));
        for (k, v) in self.data {
            // the document id wins over a stored field named `id`
            obj.entry(k).or_insert(v);
        }
        JsonValue::Object(obj)
    }
}

/// Comparison operators accepted by `query_collection`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    LessThan,
    LessThanOrEqual,
    Equal,
    NotEqual,
    GreaterThan,
    GreaterThanOrEqual,
    ArrayContains,
    ArrayContainsAny,
    In,
    NotIn,
}

impl FilterOp {
    /// Every operator string callers may use.
    pub const ALL: [&'static str; 10] = [
        "<",
        "<=",
        "==",
        "!=",
        ">",
        ">=",
        "array-contains",
        "array-contains-any",
        "in",
        "not-in",
    ];

    /// Parse the operator spelling used by the Firebase client SDKs.
    pub fn parse(op: &str) -> Option<Self> {
        let op = match op.trim() {
            "<" => FilterOp::LessThan,
            "<=" => FilterOp::LessThanOrEqual,
            "==" => FilterOp::Equal,
            "!=" => FilterOp::NotEqual,
            ">" => FilterOp::GreaterThan,
            ">=" => FilterOp::GreaterThanOrEqual,
            "array-contains" => FilterOp::ArrayContains,
            "array-contains-any" => FilterOp::ArrayContainsAny,
            "in" => FilterOp::In,
            "not-in" => FilterOp::NotIn,
            _ => return None,
        };
        Some(op)
    }

    /// Whether the comparison value must be an array.
    pub fn takes_list(&self) -> bool {
        matches!(
            self,
            FilterOp::ArrayContainsAny | FilterOp::In | FilterOp::NotIn
        )
    }
}

/// One `field <op> value` condition. Filters in a query are ANDed.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: JsonValue,
}

/// A collection query.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Query {
    /// Collection path (`users` or `users/alice/posts`).
    pub collection: String,
    pub filters: Vec<Filter>,
    pub limit: Option<u64>,
}

/// Operations the tools need from the backing store.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Point read. `None` when the document does not exist.
    async fn get(&self, path: &str) -> Result<Option<Map<String, JsonValue>>>;

    /// Overwrite the document, or merge into it when `merge` is set.
    async fn set(&self, path: &str, data: Map<String, JsonValue>, merge: bool) -> Result<()>;

    /// Delete the document. Deleting a missing document succeeds.
    async fn delete(&self, path: &str) -> Result<()>;

    /// Insert into `collection` under a generated id, returning the id.
    async fn add(&self, collection: &str, data: Map<String, JsonValue>) -> Result<String>;

    /// Run a filtered read.
    async fn query(&self, query: &Query) -> Result<Vec<Document>>;
}

/// Opens an authenticated store handle.
#[async_trait]
pub trait StoreFactory: Send + Sync {
    /// Authenticate and return a ready handle.
    async fn connect(&self) -> Result<Arc<dyn DocumentStore>>;
}

/// Lazily created, process-wide store handle.
///
/// The first caller runs the factory; concurrent callers await that same attempt and
/// receive its outcome. A successful handle is kept for the life of the process. A failure
/// is returned to every caller that was waiting on it but not cached, so a later call
/// tries again.
pub struct StoreConnector {
    factory: Arc<dyn StoreFactory>,
    state: Mutex<ConnectState>,
}

type Connecting = Shared<BoxFuture<'static, Result<Arc<dyn DocumentStore>>>>;

enum ConnectState {
    Idle,
    Connecting(Connecting),
    Ready(Arc<dyn DocumentStore>),
}

impl StoreConnector {
    /// Create a connector around a factory. Nothing is opened until [`Self::handle`].
    pub fn new(factory: impl StoreFactory + 'static) -> Self {
        Self {
            factory: Arc::new(factory),
            state: Mutex::new(ConnectState::Idle),
        }
    }

    /// Wrap an already-open store.
    pub fn from_store(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            factory: Arc::new(Preopened(store.clone())),
            state: Mutex::new(ConnectState::Ready(store)),
        }
    }

    /// Get the shared handle, connecting on first use.
    pub async fn handle(&self) -> Result<Arc<dyn DocumentStore>> {
        let pending = {
            let mut state = self.state.lock();
            match &*state {
                ConnectState::Ready(handle) => return Ok(Arc::clone(handle)),
                ConnectState::Connecting(pending) => pending.clone(),
                ConnectState::Idle => {
                    let factory = Arc::clone(&self.factory);
                    let pending = async move {
                        tracing::debug!("Connecting to document store");
                        factory.connect().await
                    }
                    .boxed()
                    .shared();
                    *state = ConnectState::Connecting(pending.clone());
                    pending
                }
            }
        };

        let outcome = pending.clone().await;

        let mut state = self.state.lock();
        if let ConnectState::Connecting(current) = &*state {
            // only the attempt we awaited may settle the state
            if current.ptr_eq(&pending) {
                *state = match &outcome {
                    Ok(handle) => {
                        tracing::info!("Document store connected");
                        ConnectState::Ready(Arc::clone(handle))
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Document store connection failed");
                        ConnectState::Idle
                    }
                };
            }
        }
        outcome
    }

    /// Whether a handle has been established.
    pub fn is_connected(&self) -> bool {
        matches!(*self.state.lock(), ConnectState::Ready(_))
    }
}

struct Preopened(Arc<dyn DocumentStore>);

#[async_trait]
impl StoreFactory for Preopened {
    async fn connect(&self) -> Result<Arc<dyn DocumentStore>> {
        Ok(Arc::clone(&self.0))
    }
}

/// Validate and normalise a document path (`collection/id[/collection/id...]`).
pub fn document_path(path: &str) -> Result<String> {
    let segments = split_path(path, "path")?;
    if segments.len() % 2 != 0 {
        return Err(McpError::InvalidArg {
            name: "path".to_string(),
            reason: format!(
                "'{}' is not a document path (expected collection/id segments)",
                path
            ),
        });
    }
    Ok(segments.join("/"))
}

/// Validate and normalise a collection path (`collection[/id/collection...]`).
pub fn collection_path(path: &str) -> Result<String> {
    let segments = split_path(path, "collection")?;
    if segments.len() % 2 != 1 {
        return Err(McpError::InvalidArg {
            name: "collection".to_string(),
            reason: format!(
                "'{}' is not a collection path (expected an odd number of segments)",
                path
            ),
        });
    }
    Ok(segments.join("/"))
}

fn split_path<'a>(path: &'a str, arg: &str) -> Result<Vec<&'a str>> {
    let trimmed = path.trim().trim_matches('/');
    if trimmed.is_empty() {
        return Err(McpError::InvalidArg {
            name: arg.to_string(),
            reason: "must not be empty".to_string(),
        });
    }
    let segments: Vec<&str> = trimmed.split('/').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(McpError::InvalidArg {
            name: arg.to_string(),
            reason: format!("'{}' contains an empty segment", path),
        });
    }
    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingFactory {
        attempts: Arc<AtomicUsize>,
        fail_first: bool,
    }

    #[async_trait]
    impl StoreFactory for CountingFactory {
        async fn connect(&self) -> Result<Arc<dyn DocumentStore>> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            if self.fail_first && n == 0 {
                return Err(McpError::Auth("INVALID_PASSWORD".to_string()));
            }
            Ok(Arc::new(MemoryStore::new()))
        }
    }

    #[tokio::test]
    async fn test_concurrent_first_use_connects_once() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let connector = Arc::new(StoreConnector::new(CountingFactory {
            attempts: attempts.clone(),
            fail_first: false,
        }));

        let calls: Vec<_> = (0..8)
            .map(|_| {
                let c = connector.clone();
                tokio::spawn(async move { c.handle().await.map(|_| ()) })
            })
            .collect();
        for call in futures::future::join_all(calls).await {
            call.unwrap().unwrap();
        }

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(connector.is_connected());
    }

    #[tokio::test]
    async fn test_failure_is_not_cached() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let connector = StoreConnector::new(CountingFactory {
            attempts: attempts.clone(),
            fail_first: true,
        });

        let err = connector.handle().await.err().unwrap();
        assert!(matches!(err, McpError::Auth(_)));
        assert!(!connector.is_connected());

        connector.handle().await.unwrap();
        connector.handle().await.unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_concurrent_waiters_share_a_failure() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let connector = Arc::new(StoreConnector::new(CountingFactory {
            attempts: attempts.clone(),
            fail_first: true,
        }));

        let calls: Vec<_> = (0..4)
            .map(|_| {
                let c = connector.clone();
                tokio::spawn(async move { c.handle().await.map(|_| ()) })
            })
            .collect();
        for call in futures::future::join_all(calls).await {
            assert!(matches!(call.unwrap(), Err(McpError::Auth(_))));
        }
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_preopened_store_is_connected() {
        let connector = StoreConnector::from_store(Arc::new(MemoryStore::new()));
        assert!(connector.is_connected());
        connector.handle().await.unwrap();
    }

    #[test]
    fn test_document_paths() {
        assert_eq!(document_path("users/alice").unwrap(), "users/alice");
        assert_eq!(document_path("/users/alice/").unwrap(), "users/alice");
        assert_eq!(
            document_path("users/alice/posts/p1").unwrap(),
            "users/alice/posts/p1"
        );
        assert!(document_path("users").is_err());
        assert!(document_path("").is_err());
        assert!(document_path("users//alice").is_err());
    }

    #[test]
    fn test_collection_paths() {
        assert_eq!(collection_path("users").unwrap(), "users");
        assert_eq!(
            collection_path("users/alice/posts").unwrap(),
            "users/alice/posts"
        );
        assert!(collection_path("users/alice").is_err());
        assert!(collection_path("/").is_err());
    }

    #[test]
    fn test_filter_op_parse() {
        for op in FilterOp::ALL {
            assert!(FilterOp::parse(op).is_some(), "{} should parse", op);
        }
        assert_eq!(FilterOp::parse(">="), Some(FilterOp::GreaterThanOrEqual));
        assert_eq!(FilterOp::parse("like"), None);
        assert!(FilterOp::In.takes_list());
        assert!(!FilterOp::ArrayContains.takes_list());
    }

    #[test]
    fn test_tagged_document_keeps_document_id() {
        let doc = Document {
            id: "alice".to_string(),
            data: json!({"id": "stale", "age": 30}).as_object().unwrap().clone(),
        };
        assert_eq!(doc.into_tagged(), json!({"id": "alice", "age": 30}));
    }
}
