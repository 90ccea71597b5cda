//! Firestore REST client authenticated as a Firebase user.
//!
//! Signing in with email and password (rather than a service account) means every request
//! carries the user's ID token, so Firestore Security Rules apply to everything the tools do.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value as JsonValue};
use tokio::sync::RwLock;

use super::{Document, DocumentStore, Filter, FilterOp, Query, StoreFactory};
use crate::config::{FirebaseConfig, FirebaseSettings};
use crate::convert::{field_paths, fields_to_map, json_to_value, map_to_fields, quote_segment};
use crate::error::{McpError, Result};

const AUTH_URL: &str = "https://identitytoolkit.googleapis.com/v1";
const TOKEN_URL: &str = "https://securetoken.googleapis.com/v1";
const FIRESTORE_URL: &str = "https://firestore.googleapis.com/v1";

/// Refresh the ID token this long before it expires.
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Endpoints used by the client, pointed at local emulators when configured.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Endpoints {
    auth: String,
    token: String,
    firestore: String,
}

impl Endpoints {
    fn for_settings(settings: &FirebaseSettings) -> Self {
        let (auth, token) = match &settings.auth_emulator_host {
            Some(host) => (
                format!("http://{}/identitytoolkit.googleapis.com/v1", host),
                format!("http://{}/securetoken.googleapis.com/v1", host),
            ),
            None => (AUTH_URL.to_string(), TOKEN_URL.to_string()),
        };
        let firestore = match &settings.firestore_emulator_host {
            Some(host) => format!("http://{}/v1", host),
            None => FIRESTORE_URL.to_string(),
        };
        Self {
            auth,
            token,
            firestore,
        }
    }
}

#[derive(Debug, Clone)]
struct Tokens {
    id_token: String,
    refresh_token: String,
    expires_at: Instant,
}

impl Tokens {
    fn needs_refresh(&self) -> bool {
        Instant::now() + REFRESH_MARGIN >= self.expires_at
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignInResponse {
    id_token: String,
    refresh_token: String,
    expires_in: String,
    #[serde(default)]
    local_id: String,
}

#[derive(Deserialize)]
struct RefreshResponse {
    id_token: String,
    refresh_token: String,
    expires_in: String,
}

fn expiry(expires_in: &str) -> Instant {
    let secs = expires_in.parse::<u64>().unwrap_or(3600);
    Instant::now() + Duration::from_secs(secs)
}

/// Authenticated Firestore session.
pub struct FirestoreStore {
    client: reqwest::Client,
    settings: FirebaseSettings,
    endpoints: Endpoints,
    tokens: RwLock<Tokens>,
}

impl FirestoreStore {
    /// Sign in with the configured user and return a ready store.
    pub async fn connect(settings: FirebaseSettings) -> Result<Self> {
        let client = reqwest::Client::new();
        let endpoints = Endpoints::for_settings(&settings);

        let url = format!(
            "{}/accounts:signInWithPassword?key={}",
            endpoints.auth, settings.api_key
        );
        let response = client
            .post(&url)
            .json(&json!({
                "email": settings.user_email,
                "password": settings.user_password,
                "returnSecureToken": true,
            }))
            .send()
            .await
            .map_err(|e| McpError::Auth(e.to_string()))?;

        if !response.status().is_success() {
            let message = error_message(response).await;
            return Err(McpError::Auth(format!(
                "{} (check FIREBASE_USER_EMAIL and FIREBASE_USER_PASSWORD)",
                message
            )));
        }

        let signed_in: SignInResponse = response
            .json()
            .await
            .map_err(|e| McpError::Auth(format!("Failed to parse sign-in response: {}", e)))?;

        tracing::info!(
            project = %settings.project_id,
            user = %signed_in.local_id,
            "Signed in to Firebase"
        );

        Ok(Self {
            client,
            tokens: RwLock::new(Tokens {
                id_token: signed_in.id_token,
                refresh_token: signed_in.refresh_token,
                expires_at: expiry(&signed_in.expires_in),
            }),
            endpoints,
            settings,
        })
    }

    /// Current ID token, refreshed first if it is about to expire.
    async fn id_token(&self) -> Result<String> {
        {
            let tokens = self.tokens.read().await;
            if !tokens.needs_refresh() {
                return Ok(tokens.id_token.clone());
            }
        }

        let mut tokens = self.tokens.write().await;
        // another caller may have refreshed while we waited for the lock
        if !tokens.needs_refresh() {
            return Ok(tokens.id_token.clone());
        }

        tracing::debug!("Refreshing Firebase ID token");
        let url = format!("{}/token?key={}", self.endpoints.token, self.settings.api_key);
        let response = self
            .client
            .post(&url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", tokens.refresh_token.as_str()),
            ])
            .send()
            .await
            .map_err(|e| McpError::Auth(e.to_string()))?;

        if !response.status().is_success() {
            let message = error_message(response).await;
            return Err(McpError::Auth(format!("token refresh failed: {}", message)));
        }

        let refreshed: RefreshResponse = response
            .json()
            .await
            .map_err(|e| McpError::Auth(format!("Failed to parse refresh response: {}", e)))?;

        *tokens = Tokens {
            id_token: refreshed.id_token,
            refresh_token: refreshed.refresh_token,
            expires_at: expiry(&refreshed.expires_in),
        };
        Ok(tokens.id_token.clone())
    }

    /// `projects/{p}/databases/{d}/documents`
    fn documents_root(&self) -> String {
        format!(
            "projects/{}/databases/{}/documents",
            self.settings.project_id, self.settings.database_id
        )
    }

    fn document_url(&self, path: &str) -> String {
        format!(
            "{}/{}/{}",
            self.endpoints.firestore,
            self.documents_root(),
            path
        )
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let token = self.id_token().await?;
        let response = request.bearer_auth(token).send().await?;
        Ok(response)
    }
}

#[async_trait]
impl DocumentStore for FirestoreStore {
    async fn get(&self, path: &str) -> Result<Option<Map<String, JsonValue>>> {
        let response = self.send(self.client.get(self.document_url(path))).await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = checked_json(response).await?;
        Ok(Some(fields_to_map(body.get("fields").unwrap_or(&JsonValue::Null))?))
    }

    async fn set(&self, path: &str, data: Map<String, JsonValue>, merge: bool) -> Result<()> {
        // an empty update mask cannot be expressed, and omitting it would overwrite
        if merge && data.is_empty() {
            if self.get(path).await?.is_none() {
                return self.set(path, data, false).await;
            }
            return Ok(());
        }

        let mut request = self
            .client
            .patch(self.document_url(path))
            .json(&json!({ "fields": map_to_fields(&data) }));
        if merge {
            let mask: Vec<(&str, String)> = field_paths(&data)
                .into_iter()
                .map(|p| ("updateMask.fieldPaths", p))
                .collect();
            request = request.query(&mask);
        }

        checked_json(self.send(request).await?).await?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let response = self.send(self.client.delete(self.document_url(path))).await?;
        checked_json(response).await?;
        Ok(())
    }

    async fn add(&self, collection: &str, data: Map<String, JsonValue>) -> Result<String> {
        let request = self
            .client
            .post(self.document_url(collection))
            .json(&json!({ "fields": map_to_fields(&data) }));
        let body = checked_json(self.send(request).await?).await?;

        body.get("name")
            .and_then(|n| n.as_str())
            .and_then(|n| n.rsplit('/').next())
            .map(|id| id.to_string())
            .ok_or_else(|| McpError::Store {
                code: "INTERNAL".to_string(),
                message: "create response has no document name".to_string(),
            })
    }

    async fn query(&self, query: &Query) -> Result<Vec<Document>> {
        let (parent, collection_id) = split_collection(&query.collection);
        let url = match parent {
            Some(parent) => format!("{}:runQuery", self.document_url(parent)),
            None => format!(
                "{}/{}:runQuery",
                self.endpoints.firestore,
                self.documents_root()
            ),
        };

        let body = json!({ "structuredQuery": structured_query(collection_id, query) });
        let response = self.send(self.client.post(url).json(&body)).await?;
        let results = checked_json(response).await?;

        // runQuery streams one entry per result plus progress entries without `document`
        let mut documents = Vec::new();
        for entry in results.as_array().into_iter().flatten() {
            if let Some(doc) = entry.get("document") {
                let id = doc
                    .get("name")
                    .and_then(|n| n.as_str())
                    .and_then(|n| n.rsplit('/').next())
                    .unwrap_or_default()
                    .to_string();
                let data = fields_to_map(doc.get("fields").unwrap_or(&JsonValue::Null))?;
                documents.push(Document { id, data });
            }
        }
        Ok(documents)
    }
}

/// Opens a [`FirestoreStore`] from the startup configuration.
pub struct FirestoreFactory {
    config: FirebaseConfig,
}

impl FirestoreFactory {
    /// Nothing is validated or contacted until the first connection attempt.
    pub fn new(config: FirebaseConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl StoreFactory for FirestoreFactory {
    async fn connect(&self) -> Result<Arc<dyn DocumentStore>> {
        let settings = self.config.validate()?;
        let store = FirestoreStore::connect(settings).await?;
        Ok(Arc::new(store))
    }
}

/// Split `a/b/c` into parent document `a/b` and collection id `c`.
fn split_collection(collection: &str) -> (Option<&str>, &str) {
    match collection.rsplit_once('/') {
        Some((parent, id)) => (Some(parent), id),
        None => (None, collection),
    }
}

fn operator_name(op: FilterOp) -> &'static str {
    match op {
        FilterOp::LessThan => "LESS_THAN",
        FilterOp::LessThanOrEqual => "LESS_THAN_OR_EQUAL",
        FilterOp::Equal => "EQUAL",
        FilterOp::NotEqual => "NOT_EQUAL",
        FilterOp::GreaterThan => "GREATER_THAN",
        FilterOp::GreaterThanOrEqual => "GREATER_THAN_OR_EQUAL",
        FilterOp::ArrayContains => "ARRAY_CONTAINS",
        FilterOp::ArrayContainsAny => "ARRAY_CONTAINS_ANY",
        FilterOp::In => "IN",
        FilterOp::NotIn => "NOT_IN",
    }
}

fn field_reference(field: &str) -> JsonValue {
    let path: Vec<String> = field.split('.').map(quote_segment).collect();
    json!({ "fieldPath": path.join(".") })
}

/// Encode one filter, using unary filters for null comparisons.
///
/// JSON has no NaN, so every other value is compared as given.
fn encode_filter(filter: &Filter) -> JsonValue {
    let unary = match (filter.op, &filter.value) {
        (FilterOp::Equal, JsonValue::Null) => Some("IS_NULL"),
        (FilterOp::NotEqual, JsonValue::Null) => Some("IS_NOT_NULL"),
        _ => None,
    };

    match unary {
        Some(op) => json!({
            "unaryFilter": { "op": op, "field": field_reference(&filter.field) }
        }),
        None => json!({
            "fieldFilter": {
                "field": field_reference(&filter.field),
                "op": operator_name(filter.op),
                "value": json_to_value(&filter.value),
            }
        }),
    }
}

fn structured_query(collection_id: &str, query: &Query) -> JsonValue {
    let mut structured = json!({ "from": [{ "collectionId": collection_id }] });

    let mut filters: Vec<JsonValue> = query.filters.iter().map(encode_filter).collect();
    match filters.len() {
        0 => {}
        1 => structured["where"] = filters.remove(0),
        _ => {
            structured["where"] = json!({
                "compositeFilter": { "op": "AND", "filters": filters }
            })
        }
    }

    if let Some(limit) = query.limit {
        structured["limit"] = json!(limit);
    }
    structured
}

/// Turn a non-success response into a store error, otherwise return its JSON body.
async fn checked_json(response: reqwest::Response) -> Result<JsonValue> {
    let status = response.status();
    if !status.is_success() {
        let body: JsonValue = response.json().await.unwrap_or(JsonValue::Null);
        let error = body.get("error");
        let code = error
            .and_then(|e| e.get("status"))
            .and_then(|s| s.as_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| status.as_u16().to_string());
        let message = error
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str())
            .map(|m| m.to_string())
            .unwrap_or_else(|| status.to_string());
        return Err(McpError::Store { code, message });
    }

    let text = response.text().await?;
    parse_body(&text)
}

/// Decode a success body; an undecodable one is a store failure, not a client error.
fn parse_body(text: &str) -> Result<JsonValue> {
    if text.trim().is_empty() {
        return Ok(json!({}));
    }
    serde_json::from_str(text).map_err(|e| McpError::Store {
        code: "INTERNAL".to_string(),
        message: format!("undecodable response body: {}", e),
    })
}

/// Pull the `error.message` out of a Firebase Auth error body.
async fn error_message(response: reqwest::Response) -> String {
    let status = response.status();
    let body: JsonValue = response.json().await.unwrap_or(JsonValue::Null);
    body.get("error")
        .and_then(|e| e.get("message"))
        .and_then(|m| m.as_str())
        .map(|m| m.to_string())
        .unwrap_or_else(|| format!("HTTP {}", status))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(field: &str, op: &str, value: JsonValue) -> Filter {
        Filter {
            field: field.to_string(),
            op: FilterOp::parse(op).unwrap(),
            value,
        }
    }

    fn settings(emulator: Option<&str>) -> FirebaseSettings {
        FirebaseSettings {
            api_key: "key".to_string(),
            project_id: "demo".to_string(),
            user_email: "a@b.c".to_string(),
            user_password: "pw".to_string(),
            auth_domain: "demo.firebaseapp.com".to_string(),
            storage_bucket: "demo.appspot.com".to_string(),
            app_id: None,
            database_id: "(default)".to_string(),
            auth_emulator_host: emulator.map(|_| "localhost:9099".to_string()),
            firestore_emulator_host: emulator.map(|h| h.to_string()),
        }
    }

    #[test]
    fn test_single_filter_query() {
        let query = Query {
            collection: "users".to_string(),
            filters: vec![filter("age", ">=", json!(18))],
            limit: Some(2),
        };
        assert_eq!(
            structured_query("users", &query),
            json!({
                "from": [{"collectionId": "users"}],
                "where": {"fieldFilter": {
                    "field": {"fieldPath": "age"},
                    "op": "GREATER_THAN_OR_EQUAL",
                    "value": {"integerValue": "18"}
                }},
                "limit": 2
            })
        );
    }

    #[test]
    fn test_multiple_filters_are_anded_in_order() {
        let query = Query {
            collection: "users".to_string(),
            filters: vec![
                filter("age", ">=", json!(18)),
                filter("tags", "array-contains", json!("admin")),
            ],
            limit: None,
        };
        let structured = structured_query("users", &query);
        let composite = &structured["where"]["compositeFilter"];
        assert_eq!(composite["op"], "AND");
        assert_eq!(composite["filters"][0]["fieldFilter"]["field"]["fieldPath"], "age");
        assert_eq!(composite["filters"][1]["fieldFilter"]["op"], "ARRAY_CONTAINS");
        assert!(structured.get("limit").is_none());
    }

    #[test]
    fn test_null_becomes_unary_filter() {
        assert_eq!(
            encode_filter(&filter("deleted", "==", JsonValue::Null)),
            json!({"unaryFilter": {"op": "IS_NULL", "field": {"fieldPath": "deleted"}}})
        );
        assert_eq!(
            encode_filter(&filter("deleted", "!=", JsonValue::Null))["unaryFilter"]["op"],
            "IS_NOT_NULL"
        );
    }

    #[test]
    fn test_nan_string_is_compared_as_string() {
        assert_eq!(
            encode_filter(&filter("name", "==", json!("NaN"))),
            json!({"fieldFilter": {
                "field": {"fieldPath": "name"},
                "op": "EQUAL",
                "value": {"stringValue": "NaN"}
            }})
        );
    }

    #[test]
    fn test_undecodable_body_is_a_store_failure() {
        assert_eq!(parse_body("").unwrap(), json!({}));
        assert_eq!(parse_body("{\"name\": \"x\"}").unwrap(), json!({"name": "x"}));

        let err = parse_body("<html>bad gateway</html>").unwrap_err();
        assert!(matches!(err, McpError::Store { ref code, .. } if code == "INTERNAL"));
        assert!(err.is_tool_failure());
    }

    #[test]
    fn test_nested_field_reference_is_quoted() {
        assert_eq!(
            field_reference("address.zip code"),
            json!({"fieldPath": "address.`zip code`"})
        );
    }

    #[test]
    fn test_split_collection() {
        assert_eq!(split_collection("users"), (None, "users"));
        assert_eq!(
            split_collection("users/alice/posts"),
            (Some("users/alice"), "posts")
        );
    }

    #[test]
    fn test_endpoints() {
        let prod = Endpoints::for_settings(&settings(None));
        assert_eq!(prod.firestore, FIRESTORE_URL);

        let emu = Endpoints::for_settings(&settings(Some("localhost:8080")));
        assert_eq!(emu.firestore, "http://localhost:8080/v1");
        assert_eq!(
            emu.auth,
            "http://localhost:9099/identitytoolkit.googleapis.com/v1"
        );
    }

    #[tokio::test]
    async fn test_factory_reports_missing_config_before_network() {
        let factory = FirestoreFactory::new(FirebaseConfig::default());
        let err = factory.connect().await.err().unwrap();
        assert!(matches!(err, McpError::Config(_)));
        assert!(err.to_string().contains("FIREBASE_API_KEY"));
    }
}
