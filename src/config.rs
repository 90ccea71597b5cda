//! Startup configuration.
//!
//! Everything is read once when the process starts. Transport selection is resolved into a
//! single [`TransportMode`]; Firebase settings are captured as-is and only validated when the
//! store is first used, so a misconfigured server still answers `initialize` and `tools/list`.

use std::time::Duration;

use crate::error::{McpError, Result};

/// Default listen port for the HTTP bindings.
pub const DEFAULT_PORT: u16 = 3003;

/// Default bind address for the HTTP bindings.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Which wire binding to serve on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    /// Newline-delimited JSON-RPC over stdin/stdout.
    Stdio,
    /// Stateless `POST /mcp`, one transport per request.
    HttpStream,
    /// `GET /sse` event stream plus `POST /messages?sessionId=`.
    Sse,
}

impl TransportMode {
    /// Resolve the transport from the `MCP_TRANSPORT` value and whether stdin is a terminal.
    ///
    /// An explicit value always wins. With no value, a piped (non-terminal) stdin forces
    /// stdio; otherwise the HTTP stream binding is used.
    pub fn resolve(requested: Option<&str>, stdin_is_terminal: bool) -> Result<Self> {
        let requested = requested.map(str::trim).filter(|s| !s.is_empty());
        match requested.map(str::to_ascii_lowercase).as_deref() {
            Some("stdio") => Ok(TransportMode::Stdio),
            Some("sse") => Ok(TransportMode::Sse),
            Some("http") | Some("http-stream") | Some("streamable-http") => {
                Ok(TransportMode::HttpStream)
            }
            Some(other) => Err(McpError::Config(format!(
                "unknown MCP_TRANSPORT '{}' (expected stdio, sse or http)",
                other
            ))),
            None if !stdin_is_terminal => Ok(TransportMode::Stdio),
            None => Ok(TransportMode::HttpStream),
        }
    }

    /// Short name used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportMode::Stdio => "stdio",
            TransportMode::HttpStream => "http",
            TransportMode::Sse => "sse",
        }
    }
}

/// Server-wide settings shared by every binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Selected transport.
    pub transport: TransportMode,
    /// Bind address for HTTP bindings.
    pub host: String,
    /// Listen port for HTTP bindings.
    pub port: u16,
    /// Optional deadline applied to every tool call.
    pub tool_timeout: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            transport: TransportMode::HttpStream,
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            tool_timeout: None,
        }
    }
}

/// Firebase project and user credentials.
///
/// Required values are kept optional here so that their absence can be reported, by name,
/// when the store connection is first attempted.
#[derive(Debug, Clone, Default)]
pub struct FirebaseConfig {
    pub api_key: Option<String>,
    pub project_id: Option<String>,
    pub user_email: Option<String>,
    pub user_password: Option<String>,
    pub auth_domain: Option<String>,
    pub storage_bucket: Option<String>,
    pub app_id: Option<String>,
    /// Firestore database id, `(default)` unless overridden.
    pub database_id: Option<String>,
    /// `host:port` of a local Firebase Auth emulator.
    pub auth_emulator_host: Option<String>,
    /// `host:port` of a local Firestore emulator.
    pub firestore_emulator_host: Option<String>,
}

/// Validated Firebase settings with derived defaults applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirebaseSettings {
    pub api_key: String,
    pub project_id: String,
    pub user_email: String,
    pub user_password: String,
    pub auth_domain: String,
    pub storage_bucket: String,
    pub app_id: Option<String>,
    pub database_id: String,
    pub auth_emulator_host: Option<String>,
    pub firestore_emulator_host: Option<String>,
}

impl FirebaseConfig {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            api_key: get("FIREBASE_API_KEY"),
            project_id: get("FIREBASE_PROJECT_ID"),
            user_email: get("FIREBASE_USER_EMAIL"),
            user_password: get("FIREBASE_USER_PASSWORD"),
            auth_domain: get("FIREBASE_AUTH_DOMAIN"),
            storage_bucket: get("FIREBASE_STORAGE_BUCKET"),
            app_id: get("FIREBASE_APP_ID"),
            database_id: get("FIRESTORE_DATABASE_ID"),
            auth_emulator_host: get("FIREBASE_AUTH_EMULATOR_HOST"),
            firestore_emulator_host: get("FIRESTORE_EMULATOR_HOST"),
        }
    }

    /// Check that every required value is present and fill in derived defaults.
    pub fn validate(&self) -> Result<FirebaseSettings> {
        let required = [
            ("FIREBASE_API_KEY", &self.api_key),
            ("FIREBASE_PROJECT_ID", &self.project_id),
            ("FIREBASE_USER_EMAIL", &self.user_email),
            ("FIREBASE_USER_PASSWORD", &self.user_password),
        ];
        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, value)| value.is_none())
            .map(|(name, _)| *name)
            .collect();
        if !missing.is_empty() {
            return Err(McpError::Config(format!(
                "missing required environment variables: {}",
                missing.join(", ")
            )));
        }

        // Presence was checked above.
        let project_id = self.project_id.clone().unwrap_or_default();
        Ok(FirebaseSettings {
            api_key: self.api_key.clone().unwrap_or_default(),
            user_email: self.user_email.clone().unwrap_or_default(),
            user_password: self.user_password.clone().unwrap_or_default(),
            auth_domain: self
                .auth_domain
                .clone()
                .unwrap_or_else(|| format!("{}.firebaseapp.com", project_id)),
            storage_bucket: self
                .storage_bucket
                .clone()
                .unwrap_or_else(|| format!("{}.appspot.com", project_id)),
            app_id: self.app_id.clone(),
            database_id: self
                .database_id
                .clone()
                .unwrap_or_else(|| "(default)".to_string()),
            auth_emulator_host: self.auth_emulator_host.clone(),
            firestore_emulator_host: self.firestore_emulator_host.clone(),
            project_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_explicit_transport_wins() {
        assert_eq!(
            TransportMode::resolve(Some("stdio"), true).unwrap(),
            TransportMode::Stdio
        );
        assert_eq!(
            TransportMode::resolve(Some("sse"), false).unwrap(),
            TransportMode::Sse
        );
        assert_eq!(
            TransportMode::resolve(Some("HTTP"), false).unwrap(),
            TransportMode::HttpStream
        );
    }

    #[test]
    fn test_unset_transport_without_terminal_forces_stdio() {
        assert_eq!(
            TransportMode::resolve(None, false).unwrap(),
            TransportMode::Stdio
        );
        assert_eq!(
            TransportMode::resolve(Some("  "), false).unwrap(),
            TransportMode::Stdio
        );
    }

    #[test]
    fn test_unset_transport_on_terminal_is_http() {
        assert_eq!(
            TransportMode::resolve(None, true).unwrap(),
            TransportMode::HttpStream
        );
    }

    #[test]
    fn test_unknown_transport_rejected() {
        let err = TransportMode::resolve(Some("websocket"), true).unwrap_err();
        assert!(matches!(err, McpError::Config(_)));
        assert!(err.to_string().contains("websocket"));
    }

    #[test]
    fn test_missing_values_are_named() {
        let cfg = FirebaseConfig::from_lookup(lookup(&[("FIREBASE_PROJECT_ID", "demo")]));
        let err = cfg.validate().unwrap_err();
        let msg = err.to_string();
        assert!(matches!(err, McpError::Config(_)));
        assert!(msg.contains("FIREBASE_API_KEY"));
        assert!(msg.contains("FIREBASE_USER_EMAIL"));
        assert!(msg.contains("FIREBASE_USER_PASSWORD"));
        assert!(!msg.contains("FIREBASE_PROJECT_ID"));
    }

    #[test]
    fn test_blank_values_count_as_missing() {
        let cfg = FirebaseConfig::from_lookup(lookup(&[
            ("FIREBASE_API_KEY", " "),
            ("FIREBASE_PROJECT_ID", "demo"),
            ("FIREBASE_USER_EMAIL", "a@b.c"),
            ("FIREBASE_USER_PASSWORD", "pw"),
        ]));
        let msg = cfg.validate().unwrap_err().to_string();
        assert!(msg.contains("FIREBASE_API_KEY"));
    }

    #[test]
    fn test_defaults_derived_from_project() {
        let cfg = FirebaseConfig::from_lookup(lookup(&[
            ("FIREBASE_API_KEY", "key"),
            ("FIREBASE_PROJECT_ID", "demo"),
            ("FIREBASE_USER_EMAIL", "a@b.c"),
            ("FIREBASE_USER_PASSWORD", "pw"),
        ]));
        let settings = cfg.validate().unwrap();
        assert_eq!(settings.auth_domain, "demo.firebaseapp.com");
        assert_eq!(settings.storage_bucket, "demo.appspot.com");
        assert_eq!(settings.database_id, "(default)");
        assert_eq!(settings.app_id, None);
    }

    #[test]
    fn test_explicit_optional_values_kept() {
        let cfg = FirebaseConfig::from_lookup(lookup(&[
            ("FIREBASE_API_KEY", "key"),
            ("FIREBASE_PROJECT_ID", "demo"),
            ("FIREBASE_USER_EMAIL", "a@b.c"),
            ("FIREBASE_USER_PASSWORD", "pw"),
            ("FIREBASE_AUTH_DOMAIN", "auth.example.com"),
            ("FIREBASE_APP_ID", "1:2:web:3"),
        ]));
        let settings = cfg.validate().unwrap();
        assert_eq!(settings.auth_domain, "auth.example.com");
        assert_eq!(settings.app_id.as_deref(), Some("1:2:web:3"));
    }
}
