//! Provider backends: concrete integrations that serve extension abilities
//!
//! A backend is registered under its provider name. The rotation manager looks
//! backends up by the provider name stored on each rotation candidate.

pub mod sendgrid;
pub mod sqlite_query;
pub mod stripe;

pub use sendgrid::SendGridProvider;
pub use sqlite_query::SqliteQueryProvider;
pub use stripe::StripeProvider;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::models::ProviderInstance;

/// Everything a backend needs to serve one call
#[derive(Debug, Clone)]
pub struct ProviderContext {
    pub instance: ProviderInstance,
    pub settings: HashMap<String, String>,
    pub extension: String,
    pub ability: String,
}

impl ProviderContext {
    pub fn setting(&self, key: &str) -> Option<&str> {
        self.settings.get(key).map(|s| s.as_str()).filter(|s| !s.is_empty())
    }

    /// The instance api key, or NotConfigured
    pub fn require_api_key(&self) -> Result<&str, ProviderError> {
        self.instance
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ProviderError::NotConfigured(format!("instance '{}' has no api key", self.instance.name)))
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum ProviderError {
    /// The caller sent something no provider can accept
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("payment required: {0}")]
    PaymentRequired(String),
    #[error("transient failure: {0}")]
    Transient(String),
    #[error("rejected: {0}")]
    Rejected(String),
    #[error("not configured: {0}")]
    NotConfigured(String),
}

impl ProviderError {
    /// Whether the next instance in a rotation should be tried
    pub fn should_failover(&self) -> bool {
        !matches!(self, Self::InvalidRequest(_))
    }

    /// Map a non-success HTTP status from a provider API
    pub fn from_status(status: u16, body: &str) -> Self {
        let detail = format!("HTTP {}: {}", status, truncate(body, 300));
        match status {
            401 | 403 => Self::Unauthorized(detail),
            402 => Self::PaymentRequired(detail),
            s if is_transient_status(s) => Self::Transient(detail),
            _ => Self::Rejected(detail),
        }
    }

    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() {
            Self::Transient(err.to_string())
        } else {
            Self::Rejected(err.to_string())
        }
    }
}

/// Statuses worth retrying on another instance after a cooldown
pub fn is_transient_status(status: u16) -> bool {
    matches!(
        status,
        408 | // Request Timeout
        429 | // Too Many Requests
        500..=599 // Server side, including Cloudflare 52x
    )
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Shared HTTP client settings for provider APIs
pub(crate) fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .user_agent(concat!("Rotary/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// A concrete integration able to serve one or more extension abilities
#[async_trait]
pub trait ProviderBackend: Send + Sync {
    /// Provider name as stored in the providers table
    fn name(&self) -> &str;

    fn friendly_name(&self) -> &str {
        self.name()
    }

    /// (extension, ability) pairs this backend serves
    fn abilities(&self) -> Vec<(&'static str, &'static str)>;

    async fn execute(&self, ctx: &ProviderContext, request: &Value) -> Result<Value, ProviderError>;
}

/// Registry of provider backends keyed by lowercase provider name
pub struct ProviderRegistry {
    backends: DashMap<String, Arc<dyn ProviderBackend>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            backends: DashMap::new(),
        }
    }

    pub fn register(&self, backend: Arc<dyn ProviderBackend>) {
        let key = backend.name().to_lowercase();
        if self.backends.insert(key, backend.clone()).is_some() {
            log::warn!("[PROVIDERS] Replaced backend '{}'", backend.name());
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ProviderBackend>> {
        self.backends.get(&name.to_lowercase()).map(|b| b.value().clone())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.backends.iter().map(|b| b.value().name().to_string()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
pub(crate) fn test_context(
    extension: &str,
    ability: &str,
    api_key: Option<&str>,
    settings: &[(&str, &str)],
) -> ProviderContext {
    let now = chrono::Utc::now();
    ProviderContext {
        instance: ProviderInstance {
            id: "inst-1".to_string(),
            provider_id: "prov-1".to_string(),
            name: "primary".to_string(),
            model_name: None,
            api_key: api_key.map(|s| s.to_string()),
            enabled: true,
            created_at: now,
            updated_at: now,
        },
        settings: settings.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        extension: extension.to_string(),
        ability: ability.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(matches!(ProviderError::from_status(503, ""), ProviderError::Transient(_)));
        assert!(matches!(ProviderError::from_status(429, ""), ProviderError::Transient(_)));
        assert!(matches!(ProviderError::from_status(401, ""), ProviderError::Unauthorized(_)));
        assert!(matches!(ProviderError::from_status(402, ""), ProviderError::PaymentRequired(_)));
        assert!(matches!(ProviderError::from_status(404, ""), ProviderError::Rejected(_)));
        assert!(matches!(ProviderError::from_status(522, ""), ProviderError::Transient(_)));
    }

    #[test]
    fn test_error_serializes_with_kind() {
        let value = serde_json::to_value(ProviderError::PaymentRequired("card declined".into())).unwrap();
        assert_eq!(value["kind"], "payment_required");
        assert_eq!(value["message"], "card declined");
    }

    #[test]
    fn test_only_invalid_request_stops_failover() {
        assert!(!ProviderError::InvalidRequest("x".into()).should_failover());
        assert!(ProviderError::Transient("x".into()).should_failover());
        assert!(ProviderError::PaymentRequired("x".into()).should_failover());
    }

    #[test]
    fn test_registry_lookup_ignores_case() {
        let registry = ProviderRegistry::new();
        registry.register(Arc::new(SendGridProvider::new()));
        registry.register(Arc::new(StripeProvider::new()));

        assert!(registry.get("sendgrid").is_some());
        assert!(registry.get("SENDGRID").is_some());
        assert!(registry.get("mailgun").is_none());
        assert_eq!(registry.names(), vec!["SendGrid", "Stripe"]);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("hi", 10), "hi");
    }
}
