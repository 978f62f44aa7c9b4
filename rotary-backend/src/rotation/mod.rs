//! Rotations: ordered failover across provider instances
//!
//! A rotation is a named pool of provider instances. Executing an ability
//! through a rotation walks its eligible instances in order until one succeeds.
//! Instances that recently failed are tried last.

mod backoff;

pub use backoff::BackoffTracker;

use actix_web::http::StatusCode;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

use crate::db::Database;
use crate::models::{Rotation, RotationCandidate, RotationStrategy};
use crate::providers::{ProviderContext, ProviderError, ProviderRegistry};

/// Usage counters kept per provider instance
pub const USAGE_REQUESTS: &str = "requests";
pub const USAGE_SUCCESSES: &str = "successes";
pub const USAGE_FAILURES: &str = "failures";

/// One instance tried during a rotation
#[derive(Debug, Clone, Serialize)]
pub struct RotationAttempt {
    pub provider_instance_id: String,
    pub instance_name: String,
    pub provider_name: String,
    pub error: Option<ProviderError>,
}

/// Result of a successful rotation call
#[derive(Debug, Clone, Serialize)]
pub struct RotationOutcome {
    pub value: Value,
    pub rotation_id: String,
    pub provider_instance_id: String,
    pub provider_name: String,
    pub attempts: Vec<RotationAttempt>,
}

#[derive(Debug, Error)]
pub enum RotationError {
    #[error("rotation '{0}' not found")]
    NotFound(String),
    #[error("no provider instance in rotation '{rotation}' can serve {extension}/{ability}")]
    NoEligibleInstances {
        rotation: String,
        extension: String,
        ability: String,
    },
    #[error("all {} instance(s) in rotation '{rotation}' failed", attempts.len())]
    Exhausted {
        rotation: String,
        attempts: Vec<RotationAttempt>,
    },
    #[error("request rejected by '{instance}': {error}")]
    InvalidRequest { instance: String, error: ProviderError },
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl RotationError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::NoEligibleInstances { .. } => StatusCode::NOT_IMPLEMENTED,
            Self::Exhausted { attempts, .. } => {
                let all_payment = !attempts.is_empty()
                    && attempts
                        .iter()
                        .all(|a| matches!(a.error, Some(ProviderError::PaymentRequired(_))));
                if all_payment {
                    StatusCode::PAYMENT_REQUIRED
                } else {
                    StatusCode::BAD_GATEWAY
                }
            }
            Self::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn attempts(&self) -> &[RotationAttempt] {
        match self {
            Self::Exhausted { attempts, .. } => attempts,
            _ => &[],
        }
    }
}

/// Name of the rotation an extension uses for its own calls
pub fn default_rotation_name(extension: &str) -> String {
    format!("{}-default", extension.to_lowercase())
}

pub struct RotationManager {
    db: Arc<Database>,
    registry: Arc<ProviderRegistry>,
    backoff: BackoffTracker,
    /// Round-robin start offsets keyed by rotation id
    cursors: DashMap<String, usize>,
}

impl RotationManager {
    pub fn new(db: Arc<Database>, registry: Arc<ProviderRegistry>) -> Self {
        Self {
            db,
            registry,
            backoff: BackoffTracker::new(),
            cursors: DashMap::new(),
        }
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn backoff(&self) -> &BackoffTracker {
        &self.backoff
    }

    /// Look a rotation up by id, then by name
    pub fn resolve(&self, rotation: &str) -> Result<Rotation, RotationError> {
        if let Some(found) = self.db.get_rotation(rotation)? {
            return Ok(found);
        }
        self.db
            .get_rotation_by_name(rotation)?
            .ok_or_else(|| RotationError::NotFound(rotation.to_string()))
    }

    /// Execute an ability through the extension's `<extension>-default` rotation
    pub async fn rotate_default(
        &self,
        extension: &str,
        ability: &str,
        request: &Value,
    ) -> Result<RotationOutcome, RotationError> {
        self.rotate(&default_rotation_name(extension), extension, ability, request)
            .await
    }

    pub async fn rotate(
        &self,
        rotation: &str,
        extension: &str,
        ability: &str,
        request: &Value,
    ) -> Result<RotationOutcome, RotationError> {
        let rotation = self.resolve(rotation)?;
        let candidates = self.db.list_rotation_candidates(&rotation.id, extension, ability)?;
        if candidates.is_empty() {
            return Err(RotationError::NoEligibleInstances {
                rotation: rotation.name,
                extension: extension.to_string(),
                ability: ability.to_string(),
            });
        }

        let ordered = self.order_candidates(&rotation, candidates);
        let mut attempts = Vec::with_capacity(ordered.len());

        for candidate in ordered {
            let instance_id = candidate.instance.id.clone();
            let mut attempt = RotationAttempt {
                provider_instance_id: instance_id.clone(),
                instance_name: candidate.instance.name.clone(),
                provider_name: candidate.provider_name.clone(),
                error: None,
            };

            let Some(backend) = self.registry.get(&candidate.provider_name) else {
                log::warn!(
                    "[ROTATION] No backend registered for provider '{}', skipping instance '{}'",
                    candidate.provider_name,
                    candidate.instance.name
                );
                attempt.error = Some(ProviderError::NotConfigured(format!(
                    "no backend registered for provider '{}'",
                    candidate.provider_name
                )));
                attempts.push(attempt);
                continue;
            };

            let settings = self.db.instance_settings_map(&instance_id)?;
            let ctx = ProviderContext {
                instance: candidate.instance,
                settings,
                extension: extension.to_string(),
                ability: ability.to_string(),
            };

            self.record_usage(&instance_id, USAGE_REQUESTS);
            match backend.execute(&ctx, request).await {
                Ok(value) => {
                    self.record_usage(&instance_id, USAGE_SUCCESSES);
                    self.backoff.record_success(&instance_id);
                    log::info!(
                        "[ROTATION] '{}' served {}/{} via {} '{}' (attempt {})",
                        rotation.name,
                        extension,
                        ability,
                        candidate.provider_name,
                        ctx.instance.name,
                        attempts.len() + 1
                    );
                    attempts.push(attempt);
                    return Ok(RotationOutcome {
                        value,
                        rotation_id: rotation.id,
                        provider_instance_id: instance_id,
                        provider_name: candidate.provider_name,
                        attempts,
                    });
                }
                Err(err) if !err.should_failover() => {
                    log::info!(
                        "[ROTATION] '{}' stopped at '{}': {}",
                        rotation.name,
                        ctx.instance.name,
                        err
                    );
                    return Err(RotationError::InvalidRequest {
                        instance: ctx.instance.name,
                        error: err,
                    });
                }
                Err(err) => {
                    self.record_usage(&instance_id, USAGE_FAILURES);
                    self.backoff.record_error(&instance_id);
                    log::warn!(
                        "[ROTATION] '{}' instance '{}' failed, trying next: {}",
                        rotation.name,
                        ctx.instance.name,
                        err
                    );
                    attempt.error = Some(err);
                    attempts.push(attempt);
                }
            }
        }

        log::error!(
            "[ROTATION] '{}' exhausted {} instance(s) for {}/{}",
            rotation.name,
            attempts.len(),
            extension,
            ability
        );
        Err(RotationError::Exhausted {
            rotation: rotation.name,
            attempts,
        })
    }

    /// Forced entries first, round-robin offset over the rest, cooling entries last
    fn order_candidates(&self, rotation: &Rotation, candidates: Vec<RotationCandidate>) -> Vec<RotationCandidate> {
        let (forced, mut regular): (Vec<_>, Vec<_>) = candidates.into_iter().partition(|c| c.forced);

        if rotation.strategy == RotationStrategy::RoundRobin && regular.len() > 1 {
            let mut cursor = self.cursors.entry(rotation.id.clone()).or_insert(0);
            let offset = *cursor % regular.len();
            *cursor = cursor.wrapping_add(1);
            regular.rotate_left(offset);
        }

        let (ready, cooling): (Vec<_>, Vec<_>) = forced
            .into_iter()
            .chain(regular)
            .partition(|c| !self.backoff.is_cooling_down(&c.instance.id));

        ready.into_iter().chain(cooling).collect()
    }

    fn record_usage(&self, instance_id: &str, key: &str) {
        if let Err(e) = self.db.increment_instance_usage(instance_id, key, 1) {
            log::error!("[ROTATION] Failed to record usage '{}' for {}: {}", key, instance_id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ProviderBackend;
    use async_trait::async_trait;
    use serde_json::json;

    /// Behaves according to the instance api key
    struct ScriptedBackend;

    #[async_trait]
    impl ProviderBackend for ScriptedBackend {
        fn name(&self) -> &str {
            "Mock"
        }

        fn abilities(&self) -> Vec<(&'static str, &'static str)> {
            vec![("email", "send_email")]
        }

        async fn execute(&self, ctx: &ProviderContext, _request: &Value) -> Result<Value, ProviderError> {
            match ctx.instance.api_key.as_deref() {
                Some("transient") => Err(ProviderError::Transient("503".into())),
                Some("payment") => Err(ProviderError::PaymentRequired("card declined".into())),
                Some("invalid") => Err(ProviderError::InvalidRequest("bad address".into())),
                _ => Ok(json!({ "served_by": ctx.instance.name })),
            }
        }
    }

    struct Fixture {
        manager: RotationManager,
        db: Arc<Database>,
        pea_id: String,
        provider_id: String,
        rotation_id: String,
    }

    impl Fixture {
        fn new(strategy: RotationStrategy) -> Self {
            let db = Arc::new(Database::new(":memory:").unwrap());
            let ext = db.create_extension("email", None, None).unwrap();
            let ability = db.create_ability(&ext.id, "send_email", None, false).unwrap();
            let provider = db.create_provider("Mock", None, None).unwrap();
            let pe = db.bond_provider_extension(&provider.id, &ext.id).unwrap();
            let pea = db.bond_provider_ability(&pe.id, &ability.id).unwrap();
            let rotation = db.create_rotation("email-default", None, strategy).unwrap();

            let registry = Arc::new(ProviderRegistry::new());
            registry.register(Arc::new(ScriptedBackend));

            Fixture {
                manager: RotationManager::new(db.clone(), registry),
                db,
                pea_id: pea.id,
                provider_id: provider.id,
                rotation_id: rotation.id,
            }
        }

        /// Add an instance whose api key scripts its behaviour
        fn add(&self, name: &str, behaviour: &str) -> String {
            let instance = self
                .db
                .create_provider_instance(&self.provider_id, name, None, Some(behaviour), true)
                .unwrap();
            self.db.add_rotation_instance(&self.rotation_id, &instance.id, None).unwrap();
            instance.id
        }

        async fn send(&self) -> Result<RotationOutcome, RotationError> {
            self.manager
                .rotate_default("email", "send_email", &json!({ "to": "a@example.com" }))
                .await
        }
    }

    #[tokio::test]
    async fn test_first_healthy_instance_serves() {
        let f = Fixture::new(RotationStrategy::Ordered);
        let a = f.add("a", "ok");
        f.add("b", "ok");

        let outcome = f.send().await.unwrap();
        assert_eq!(outcome.provider_instance_id, a);
        assert_eq!(outcome.value["served_by"], "a");
        assert_eq!(outcome.attempts.len(), 1);
        assert_eq!(f.db.instance_usage_value(&a, USAGE_REQUESTS).unwrap(), 1);
        assert_eq!(f.db.instance_usage_value(&a, USAGE_SUCCESSES).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_failover_and_cooldown_ordering() {
        let f = Fixture::new(RotationStrategy::Ordered);
        let a = f.add("a", "transient");
        let b = f.add("b", "ok");

        let outcome = f.send().await.unwrap();
        assert_eq!(outcome.provider_instance_id, b);
        assert_eq!(outcome.attempts.len(), 2);
        assert!(matches!(outcome.attempts[0].error, Some(ProviderError::Transient(_))));
        assert_eq!(f.db.instance_usage_value(&a, USAGE_FAILURES).unwrap(), 1);
        assert!(f.manager.backoff().is_cooling_down(&a));

        // a is cooling down, so b is tried first
        let outcome = f.send().await.unwrap();
        assert_eq!(outcome.provider_instance_id, b);
        assert_eq!(outcome.attempts.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_request_stops_rotation() {
        let f = Fixture::new(RotationStrategy::Ordered);
        f.add("a", "invalid");
        let b = f.add("b", "ok");

        let err = f.send().await.unwrap_err();
        assert!(matches!(err, RotationError::InvalidRequest { .. }));
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(f.db.instance_usage_value(&b, USAGE_REQUESTS).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_exhausted_status_codes() {
        let f = Fixture::new(RotationStrategy::Ordered);
        f.add("a", "payment");
        f.add("b", "payment");
        let err = f.send().await.unwrap_err();
        assert_eq!(err.attempts().len(), 2);
        assert_eq!(err.status_code(), StatusCode::PAYMENT_REQUIRED);

        f.add("c", "transient");
        let err = f.send().await.unwrap_err();
        assert_eq!(err.attempts().len(), 3);
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_round_robin_advances_start() {
        let f = Fixture::new(RotationStrategy::RoundRobin);
        let a = f.add("a", "ok");
        let b = f.add("b", "ok");

        assert_eq!(f.send().await.unwrap().provider_instance_id, a);
        assert_eq!(f.send().await.unwrap().provider_instance_id, b);
        assert_eq!(f.send().await.unwrap().provider_instance_id, a);
    }

    #[tokio::test]
    async fn test_forced_instance_goes_first() {
        let f = Fixture::new(RotationStrategy::Ordered);
        f.add("a", "ok");
        let b = f.add("b", "ok");
        f.db.set_instance_ability(&b, &f.pea_id, true, true).unwrap();

        assert_eq!(f.send().await.unwrap().provider_instance_id, b);
    }

    #[tokio::test]
    async fn test_disabled_ability_leaves_no_candidates() {
        let f = Fixture::new(RotationStrategy::Ordered);
        let a = f.add("a", "ok");
        f.db.set_instance_ability(&a, &f.pea_id, false, false).unwrap();

        let err = f.send().await.unwrap_err();
        assert!(matches!(err, RotationError::NoEligibleInstances { .. }));
        assert_eq!(err.status_code(), StatusCode::NOT_IMPLEMENTED);
    }

    #[tokio::test]
    async fn test_unknown_rotation_is_not_found() {
        let f = Fixture::new(RotationStrategy::Ordered);
        let err = f
            .manager
            .rotate("nope", "email", "send_email", &json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_resolve_by_id_or_name() {
        let f = Fixture::new(RotationStrategy::Ordered);
        assert_eq!(f.manager.resolve(&f.rotation_id).unwrap().name, "email-default");
        assert_eq!(f.manager.resolve("email-default").unwrap().id, f.rotation_id);
    }
}
