//! In-memory document store.
//!
//! Mirrors Firestore's observable behaviour closely enough for `--memory` mode and tests:
//! deep merges, idempotent deletes, generated ids, and conjunctive filters evaluated in
//! document-id order.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::{Map, Value as JsonValue};

use super::{Document, DocumentStore, Filter, FilterOp, Query, StoreFactory};
use crate::error::Result;

/// Length of generated document ids, as in the Firebase SDKs.
const AUTO_ID_LEN: usize = 20;

/// Documents keyed by their full path.
#[derive(Default)]
pub struct MemoryStore {
    docs: RwLock<BTreeMap<String, Map<String, JsonValue>>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored documents.
    pub fn len(&self) -> usize {
        self.docs.read().len()
    }

    /// Whether the store holds no documents.
    pub fn is_empty(&self) -> bool {
        self.docs.read().is_empty()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, path: &str) -> Result<Option<Map<String, JsonValue>>> {
        Ok(self.docs.read().get(path).cloned())
    }

    async fn set(&self, path: &str, data: Map<String, JsonValue>, merge: bool) -> Result<()> {
        let mut docs = self.docs.write();
        if merge {
            if let Some(existing) = docs.get_mut(path) {
                deep_merge(existing, data);
                return Ok(());
            }
        }
        docs.insert(path.to_string(), data);
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.docs.write().remove(path);
        Ok(())
    }

    async fn add(&self, collection: &str, data: Map<String, JsonValue>) -> Result<String> {
        let mut docs = self.docs.write();
        loop {
            let id = auto_id();
            let path = format!("{}/{}", collection, id);
            if !docs.contains_key(&path) {
                docs.insert(path, data);
                return Ok(id);
            }
        }
    }

    async fn query(&self, query: &Query) -> Result<Vec<Document>> {
        let prefix = format!("{}/", query.collection);
        let limit = query.limit.map_or(usize::MAX, |l| l as usize);
        let docs = self.docs.read();

        let matches = docs
            .range(prefix.clone()..)
            .take_while(|(path, _)| path.starts_with(&prefix))
            // direct children only, not documents of subcollections
            .filter(|(path, _)| !path[prefix.len()..].contains('/'))
            .filter(|(_, data)| query.filters.iter().all(|f| matches_filter(data, f)))
            .take(limit)
            .map(|(path, data)| Document {
                id: path[prefix.len()..].to_string(),
                data: data.clone(),
            })
            .collect();
        Ok(matches)
    }
}

/// Factory that hands out one shared in-memory store.
#[derive(Default, Clone)]
pub struct MemoryFactory {
    store: Arc<MemoryStore>,
}

impl MemoryFactory {
    /// Create a factory around a fresh store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StoreFactory for MemoryFactory {
    async fn connect(&self) -> Result<Arc<dyn DocumentStore>> {
        Ok(self.store.clone())
    }
}

fn auto_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(AUTO_ID_LEN)
        .map(char::from)
        .collect()
}

fn deep_merge(target: &mut Map<String, JsonValue>, source: Map<String, JsonValue>) {
    for (key, value) in source {
        match value {
            JsonValue::Object(incoming) if !incoming.is_empty() => {
                if let Some(JsonValue::Object(existing)) = target.get_mut(&key) {
                    deep_merge(existing, incoming);
                } else {
                    target.insert(key, JsonValue::Object(incoming));
                }
            }
            value => {
                target.insert(key, value);
            }
        }
    }
}

/// Resolve a dotted field path inside a document.
fn lookup<'a>(data: &'a Map<String, JsonValue>, field: &str) -> Option<&'a JsonValue> {
    let mut parts = field.split('.');
    let mut current = data.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

fn matches_filter(data: &Map<String, JsonValue>, filter: &Filter) -> bool {
    let Some(actual) = lookup(data, &filter.field) else {
        // documents without the field never match, not even `!=`
        return false;
    };
    let expected = &filter.value;

    match filter.op {
        FilterOp::Equal => values_equal(actual, expected),
        FilterOp::NotEqual => !actual.is_null() && !values_equal(actual, expected),
        FilterOp::LessThan => compare(actual, expected) == Some(Ordering::Less),
        FilterOp::LessThanOrEqual => matches!(
            compare(actual, expected),
            Some(Ordering::Less | Ordering::Equal)
        ),
        FilterOp::GreaterThan => compare(actual, expected) == Some(Ordering::Greater),
        FilterOp::GreaterThanOrEqual => matches!(
            compare(actual, expected),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        FilterOp::ArrayContains => actual
            .as_array()
            .map_or(false, |items| items.iter().any(|i| values_equal(i, expected))),
        FilterOp::ArrayContainsAny => match (actual.as_array(), expected.as_array()) {
            (Some(items), Some(wanted)) => items
                .iter()
                .any(|i| wanted.iter().any(|w| values_equal(i, w))),
            _ => false,
        },
        FilterOp::In => expected
            .as_array()
            .map_or(false, |wanted| wanted.iter().any(|w| values_equal(actual, w))),
        FilterOp::NotIn => {
            !actual.is_null()
                && expected
                    .as_array()
                    .map_or(false, |wanted| !wanted.iter().any(|w| values_equal(actual, w)))
        }
    }
}

fn values_equal(a: &JsonValue, b: &JsonValue) -> bool {
    match (a, b) {
        (JsonValue::Number(x), JsonValue::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// Ordering comparison; values of different types are incomparable.
fn compare(a: &JsonValue, b: &JsonValue) -> Option<Ordering> {
    match (a, b) {
        (JsonValue::Number(x), JsonValue::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (JsonValue::String(x), JsonValue::String(y)) => Some(x.cmp(y)),
        (JsonValue::Bool(x), JsonValue::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(value: JsonValue) -> Map<String, JsonValue> {
        value.as_object().cloned().unwrap()
    }

    fn filter(field: &str, op: &str, value: JsonValue) -> Filter {
        Filter {
            field: field.to_string(),
            op: FilterOp::parse(op).unwrap(),
            value,
        }
    }

    async fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        for (id, age, tags) in [
            ("ann", 17, json!(["a"])),
            ("bob", 18, json!(["a", "b"])),
            ("cat", 42, json!(["c"])),
            ("dan", 65, json!([])),
        ] {
            store
                .set(
                    &format!("people/{}", id),
                    obj(json!({"age": age, "tags": tags, "name": id})),
                    false,
                )
                .await
                .unwrap();
        }
        store
            .set("people/ann/pets/rex", obj(json!({"age": 99})), false)
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_merge_is_deep() {
        let store = MemoryStore::new();
        store
            .set("c/d", obj(json!({"a": 1, "m": {"x": 1, "y": 2}})), false)
            .await
            .unwrap();
        store
            .set("c/d", obj(json!({"b": 2, "m": {"y": 3}})), true)
            .await
            .unwrap();
        let doc = store.get("c/d").await.unwrap().unwrap();
        assert_eq!(
            JsonValue::Object(doc),
            json!({"a": 1, "b": 2, "m": {"x": 1, "y": 3}})
        );
    }

    #[tokio::test]
    async fn test_merge_into_missing_document_creates_it() {
        let store = MemoryStore::new();
        store.set("c/new", obj(json!({"a": 1})), true).await.unwrap();
        assert!(store.get("c/new").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_add_generates_distinct_ids() {
        let store = MemoryStore::new();
        let a = store.add("notes", obj(json!({"n": 1}))).await.unwrap();
        let b = store.add("notes", obj(json!({"n": 2}))).await.unwrap();
        assert_ne!(a, b);
        assert_eq!(a.len(), AUTO_ID_LEN);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_query_excludes_subcollections() {
        let store = seeded().await;
        let docs = store
            .query(&Query {
                collection: "people".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        let ids: Vec<_> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["ann", "bob", "cat", "dan"]);
    }

    #[tokio::test]
    async fn test_query_filters_are_conjunctive() {
        let store = seeded().await;
        let docs = store
            .query(&Query {
                collection: "people".to_string(),
                filters: vec![
                    filter("age", ">=", json!(18)),
                    filter("tags", "array-contains", json!("a")),
                ],
                limit: None,
            })
            .await
            .unwrap();
        let ids: Vec<_> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["bob"]);
    }

    #[tokio::test]
    async fn test_query_limit() {
        let store = seeded().await;
        let docs = store
            .query(&Query {
                collection: "people".to_string(),
                filters: vec![filter("age", ">=", json!(18))],
                limit: Some(2),
            })
            .await
            .unwrap();
        assert_eq!(docs.len(), 2);
    }

    #[test]
    fn test_operator_semantics() {
        let doc = obj(json!({"n": 5, "s": "m", "tags": ["x", "y"], "nested": {"k": 1}}));
        assert!(matches_filter(&doc, &filter("n", "==", json!(5.0))));
        assert!(matches_filter(&doc, &filter("n", "!=", json!(4))));
        assert!(!matches_filter(&doc, &filter("n", "<", json!("z"))));
        assert!(matches_filter(&doc, &filter("s", "<", json!("z"))));
        assert!(matches_filter(&doc, &filter("n", "in", json!([1, 5]))));
        assert!(matches_filter(&doc, &filter("n", "not-in", json!([1, 2]))));
        assert!(matches_filter(
            &doc,
            &filter("tags", "array-contains-any", json!(["q", "y"]))
        ));
        assert!(matches_filter(&doc, &filter("nested.k", "==", json!(1))));
        assert!(!matches_filter(&doc, &filter("missing", "!=", json!(1))));
    }
}
