//! Side-effect callbacks attached to core operations
//!
//! Extensions register hooks at a point and timing. Firing runs every matching
//! hook in registration order; a failing hook is logged and never fails the
//! operation that fired it.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::Arc;
use strum::{Display, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum HookPoint {
    UserCreate,
    UserUpdate,
    UserDelete,
    SessionCreate,
    MfaMethodCreate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum HookTiming {
    Before,
    After,
}

/// Data handed to hooks: the affected user and an operation-specific payload
#[derive(Debug, Clone)]
pub struct HookEvent {
    pub user_id: String,
    pub payload: Value,
}

impl HookEvent {
    pub fn new(user_id: impl Into<String>, payload: Value) -> Self {
        Self {
            user_id: user_id.into(),
            payload,
        }
    }
}

#[async_trait]
pub trait Hook: Send + Sync {
    /// Stable identifier used in logs, e.g. "payment.create_customer"
    fn id(&self) -> &str;
    fn point(&self) -> HookPoint;
    fn timing(&self) -> HookTiming;
    async fn run(&self, event: &HookEvent) -> Result<(), String>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HookReport {
    pub ran: usize,
    pub failed: Vec<String>,
}

struct Registered {
    /// Extension that contributed the hook
    owner: String,
    hook: Arc<dyn Hook>,
}

pub struct HookManager {
    hooks: RwLock<Vec<Registered>>,
}

impl HookManager {
    pub fn new() -> Self {
        Self {
            hooks: RwLock::new(Vec::new()),
        }
    }

    /// Register a hook on behalf of the extension that owns it
    pub fn register(&self, owner: &str, hook: Arc<dyn Hook>) {
        log::debug!("[HOOKS] Registered '{}' for '{}' ({} {})", hook.id(), owner, hook.timing(), hook.point());
        self.hooks.write().push(Registered {
            owner: owner.to_string(),
            hook,
        });
    }

    /// Drop every hook an extension registered; returns how many were removed
    pub fn unregister_owner(&self, owner: &str) -> usize {
        let mut hooks = self.hooks.write();
        let before = hooks.len();
        hooks.retain(|r| r.owner != owner);
        let removed = before - hooks.len();
        if removed > 0 {
            log::info!("[HOOKS] Removed {} hooks owned by '{}'", removed, owner);
        }
        removed
    }

    pub fn hook_count(&self) -> usize {
        self.hooks.read().len()
    }

    /// Run every hook registered for point and timing
    pub async fn fire(&self, point: HookPoint, timing: HookTiming, event: &HookEvent) -> HookReport {
        // Snapshot so no lock is held across awaits
        let matching: Vec<Arc<dyn Hook>> = self
            .hooks
            .read()
            .iter()
            .filter(|r| r.hook.point() == point && r.hook.timing() == timing)
            .map(|r| r.hook.clone())
            .collect();

        let mut report = HookReport::default();
        for hook in matching {
            report.ran += 1;
            if let Err(e) = hook.run(event).await {
                log::error!(
                    "[HOOKS] '{}' failed on {} {} for user {}: {}",
                    hook.id(),
                    timing,
                    point,
                    event.user_id,
                    e
                );
                report.failed.push(hook.id().to_string());
            }
        }
        report
    }
}

impl Default for HookManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    struct Recorder {
        id: String,
        point: HookPoint,
        timing: HookTiming,
        fail: bool,
        seen: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Hook for Recorder {
        fn id(&self) -> &str {
            &self.id
        }
        fn point(&self) -> HookPoint {
            self.point
        }
        fn timing(&self) -> HookTiming {
            self.timing
        }
        async fn run(&self, event: &HookEvent) -> Result<(), String> {
            self.seen.lock().push(format!("{}:{}", self.id, event.user_id));
            if self.fail {
                Err("boom".to_string())
            } else {
                Ok(())
            }
        }
    }

    fn recorder(id: &str, point: HookPoint, timing: HookTiming, fail: bool, seen: &Arc<Mutex<Vec<String>>>) -> Arc<dyn Hook> {
        Arc::new(Recorder {
            id: id.to_string(),
            point,
            timing,
            fail,
            seen: seen.clone(),
        })
    }

    #[tokio::test]
    async fn test_fire_runs_matching_hooks_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let manager = HookManager::new();
        manager.register("test", recorder("first", HookPoint::UserCreate, HookTiming::After, false, &seen));
        manager.register("test", recorder("other", HookPoint::UserDelete, HookTiming::After, false, &seen));
        manager.register("test", recorder("before", HookPoint::UserCreate, HookTiming::Before, false, &seen));
        manager.register("test", recorder("second", HookPoint::UserCreate, HookTiming::After, false, &seen));

        let report = manager
            .fire(HookPoint::UserCreate, HookTiming::After, &HookEvent::new("u1", json!({})))
            .await;

        assert_eq!(manager.hook_count(), 4);
        assert_eq!(report.ran, 2);
        assert!(report.failed.is_empty());
        assert_eq!(*seen.lock(), vec!["first:u1", "second:u1"]);
    }

    #[tokio::test]
    async fn test_failures_are_swallowed() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let manager = HookManager::new();
        manager.register("test", recorder("broken", HookPoint::UserCreate, HookTiming::After, true, &seen));
        manager.register("test", recorder("fine", HookPoint::UserCreate, HookTiming::After, false, &seen));

        let report = manager
            .fire(HookPoint::UserCreate, HookTiming::After, &HookEvent::new("u1", json!({})))
            .await;

        assert_eq!(report.ran, 2);
        assert_eq!(report.failed, vec!["broken"]);
        assert_eq!(seen.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_unregister_owner_keeps_other_hooks() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let manager = HookManager::new();
        manager.register("payment", recorder("customer", HookPoint::UserCreate, HookTiming::After, false, &seen));
        manager.register("email", recorder("welcome", HookPoint::UserCreate, HookTiming::After, false, &seen));
        manager.register("core", recorder("core", HookPoint::UserCreate, HookTiming::After, false, &seen));

        assert_eq!(manager.unregister_owner("payment"), 1);
        assert_eq!(manager.unregister_owner("payment"), 0);

        let report = manager
            .fire(HookPoint::UserCreate, HookTiming::After, &HookEvent::new("u1", json!({})))
            .await;
        assert_eq!(report.ran, 2);
        assert_eq!(*seen.lock(), vec!["welcome:u1", "core:u1"]);
    }

    #[test]
    fn test_point_names() {
        assert_eq!(HookPoint::MfaMethodCreate.to_string(), "mfa_method_create");
        assert_eq!(HookTiming::Before.to_string(), "before");
    }
}
