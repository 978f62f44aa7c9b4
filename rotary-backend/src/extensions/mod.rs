//! Extension system
//!
//! An extension bundles abilities, the provider backends that can serve them,
//! and hooks into core operations. The registry persists each extension's
//! catalog rows at startup and drives the lifecycle:
//! validate_config -> on_initialize -> seed -> on_start -> on_stop.

pub mod builtin;

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::future::join_all;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;

use crate::config::Config;
use crate::db::Database;
use crate::hooks::{Hook, HookManager};
use crate::models::RotationStrategy;
use crate::providers::ProviderBackend;
use crate::rotation::{default_rotation_name, RotationManager};

/// An ability an extension declares
#[derive(Debug, Clone, Copy)]
pub struct AbilitySpec {
    pub name: &'static str,
    pub friendly_name: &'static str,
    /// Served by the extension itself rather than a provider
    pub meta: bool,
}

impl AbilitySpec {
    pub const fn new(name: &'static str, friendly_name: &'static str) -> Self {
        Self {
            name,
            friendly_name,
            meta: false,
        }
    }

    pub const fn meta(name: &'static str, friendly_name: &'static str) -> Self {
        Self {
            name,
            friendly_name,
            meta: true,
        }
    }
}

/// Shared handles passed to extension callbacks
#[derive(Clone)]
pub struct ExtensionContext {
    pub db: Arc<Database>,
    pub rotation: Arc<RotationManager>,
    pub config: Arc<Config>,
}

#[async_trait]
pub trait Extension: Send + Sync {
    fn name(&self) -> &'static str;
    fn friendly_name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn abilities(&self) -> Vec<AbilitySpec>;

    fn providers(&self) -> Vec<Arc<dyn ProviderBackend>> {
        Vec::new()
    }

    fn hooks(&self, _ctx: &ExtensionContext) -> Vec<Arc<dyn Hook>> {
        Vec::new()
    }

    fn validate_config(&self, _config: &Config) -> Result<(), String> {
        Ok(())
    }

    async fn on_initialize(&self, _ctx: &ExtensionContext) -> bool {
        true
    }

    async fn on_start(&self, _ctx: &ExtensionContext) -> bool {
        true
    }

    async fn on_stop(&self, _ctx: &ExtensionContext) -> bool {
        true
    }

    /// Create default provider instances and rotations
    fn seed(&self, _ctx: &ExtensionContext) -> rusqlite::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum ExtensionState {
    Registered,
    Initialized,
    Running,
    Stopped,
    Failed(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtensionStatus {
    pub name: String,
    #[serde(flatten)]
    pub state: ExtensionState,
}

pub struct ExtensionRegistry {
    extensions: RwLock<Vec<Arc<dyn Extension>>>,
    states: DashMap<String, ExtensionState>,
    hooks: Arc<HookManager>,
    ctx: ExtensionContext,
}

impl ExtensionRegistry {
    pub fn new(ctx: ExtensionContext, hooks: Arc<HookManager>) -> Self {
        Self {
            extensions: RwLock::new(Vec::new()),
            states: DashMap::new(),
            hooks,
            ctx,
        }
    }

    /// Registry holding every built-in extension the config enables
    pub fn with_builtins(ctx: ExtensionContext, hooks: Arc<HookManager>) -> Self {
        let registry = Self::new(ctx, hooks);
        for ext in builtin::enabled(&registry.ctx.config) {
            registry.register(ext);
        }
        registry
    }

    pub fn register(&self, ext: Arc<dyn Extension>) {
        let name = ext.name().to_string();
        let mut extensions = self.extensions.write();
        if extensions.iter().any(|e| e.name() == name) {
            log::warn!("[EXT] '{}' already registered, ignoring", name);
            return;
        }
        extensions.push(ext);
        self.states.insert(name, ExtensionState::Registered);
    }

    pub fn statuses(&self) -> Vec<ExtensionStatus> {
        self.extensions
            .read()
            .iter()
            .map(|e| ExtensionStatus {
                name: e.name().to_string(),
                state: self
                    .states
                    .get(e.name())
                    .map(|s| s.value().clone())
                    .unwrap_or(ExtensionState::Registered),
            })
            .collect()
    }

    pub fn state(&self, name: &str) -> Option<ExtensionState> {
        self.states.get(name).map(|s| s.value().clone())
    }

    fn snapshot(&self) -> Vec<Arc<dyn Extension>> {
        self.extensions.read().clone()
    }

    /// Mark an extension failed and drop its hooks
    fn fail(&self, name: &str, reason: String) {
        log::error!("[EXT] '{}' failed: {}", name, reason);
        self.hooks.unregister_owner(name);
        self.states.insert(name.to_string(), ExtensionState::Failed(reason));
    }

    /// Initialize every registered extension; returns how many succeeded
    pub async fn initialize_all(&self) -> usize {
        let mut initialized = 0;
        for ext in self.snapshot() {
            let name = ext.name();
            if let Err(reason) = ext.validate_config(&self.ctx.config) {
                self.fail(name, format!("invalid configuration: {}", reason));
                continue;
            }
            if let Err(e) = self.persist(ext.as_ref()) {
                self.fail(name, format!("could not persist catalog: {}", e));
                continue;
            }

            if !ext.on_initialize(&self.ctx).await {
                self.fail(name, "on_initialize returned false".to_string());
                continue;
            }
            for hook in ext.hooks(&self.ctx) {
                self.hooks.register(name, hook);
            }
            if let Err(e) = ext.seed(&self.ctx) {
                log::warn!("[EXT] '{}' could not seed defaults: {}", name, e);
            }

            self.states.insert(name.to_string(), ExtensionState::Initialized);
            log::info!("[EXT] Initialized '{}' ({} abilities)", name, ext.abilities().len());
            initialized += 1;
        }
        initialized
    }

    /// Write extension, ability and provider rows, bond providers and register backends
    fn persist(&self, ext: &dyn Extension) -> rusqlite::Result<()> {
        let db = &self.ctx.db;
        let record = db.ensure_extension(ext.name(), Some(ext.friendly_name()), Some(ext.description()))?;
        for ability in ext.abilities() {
            db.ensure_ability(&record.id, ability.name, Some(ability.friendly_name), ability.meta)?;
        }

        for backend in ext.providers() {
            let provider = db.ensure_provider(backend.name(), Some(backend.friendly_name()))?;
            for (extension_name, ability_name) in backend.abilities() {
                if extension_name != ext.name() {
                    continue;
                }
                let Some(ability) = db.find_ability(extension_name, ability_name)? else {
                    log::warn!(
                        "[EXT] Provider '{}' serves unknown ability {}/{}",
                        backend.name(),
                        extension_name,
                        ability_name
                    );
                    continue;
                };
                let bond = db.bond_provider_extension(&provider.id, &record.id)?;
                db.bond_provider_ability(&bond.id, &ability.id)?;
            }
            self.ctx.rotation.registry().register(backend);
        }
        Ok(())
    }

    pub async fn start_all(&self) -> usize {
        let ready: Vec<_> = self
            .snapshot()
            .into_iter()
            .filter(|e| matches!(self.state(e.name()), Some(ExtensionState::Initialized | ExtensionState::Stopped)))
            .collect();

        let results = join_all(ready.iter().map(|e| e.on_start(&self.ctx))).await;
        let mut started = 0;
        for (ext, ok) in ready.iter().zip(results) {
            if ok {
                self.states.insert(ext.name().to_string(), ExtensionState::Running);
                log::info!("[EXT] Started '{}'", ext.name());
                started += 1;
            } else {
                self.fail(ext.name(), "on_start returned false".to_string());
            }
        }
        started
    }

    pub async fn stop_all(&self) -> usize {
        let running: Vec<_> = self
            .snapshot()
            .into_iter()
            .filter(|e| self.state(e.name()) == Some(ExtensionState::Running))
            .collect();

        let results = join_all(running.iter().map(|e| e.on_stop(&self.ctx))).await;
        let mut stopped = 0;
        for (ext, ok) in running.iter().zip(results) {
            if ok {
                self.states.insert(ext.name().to_string(), ExtensionState::Stopped);
                log::info!("[EXT] Stopped '{}'", ext.name());
                stopped += 1;
            } else {
                self.fail(ext.name(), "on_stop returned false".to_string());
            }
        }
        stopped
    }
}

/// Ensure the extension's default rotation exists and, with an api key or
/// settings, a named provider instance inside it
pub fn seed_default_instance(
    ctx: &ExtensionContext,
    extension: &str,
    provider_name: &str,
    api_key: Option<&str>,
    settings: &[(&str, &str)],
) -> rusqlite::Result<()> {
    let db = &ctx.db;
    let rotation_name = default_rotation_name(extension);
    let rotation = match db.get_rotation_by_name(&rotation_name)? {
        Some(rotation) => rotation,
        None => db.create_rotation(
            &rotation_name,
            Some(&format!("Default rotation for the {} extension", extension)),
            RotationStrategy::Ordered,
        )?,
    };

    if api_key.is_none() && settings.is_empty() {
        return Ok(());
    }
    let Some(provider) = db.get_provider_by_name(provider_name)? else {
        return Ok(());
    };

    let instance = match db.get_provider_instance_by_name(&provider.id, "default")? {
        Some(existing) => match api_key {
            Some(key) if existing.api_key.as_deref() != Some(key) => db
                .update_provider_instance(&existing.id, None, None, Some(key), None)?
                .unwrap_or(existing),
            _ => existing,
        },
        None => {
            log::info!("[EXT] Seeding default {} instance for '{}'", provider_name, extension);
            db.create_provider_instance(&provider.id, "default", None, api_key, true)?
        }
    };

    for (key, value) in settings {
        db.set_instance_setting(&instance.id, key, value)?;
    }

    let already_listed = db
        .list_rotation_instances(&rotation.id)?
        .iter()
        .any(|entry| entry.provider_instance_id == instance.id);
    if !already_listed {
        db.add_rotation_instance(&rotation.id, &instance.id, None)?;
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::hooks::{HookEvent, HookPoint, HookTiming};
    use crate::providers::ProviderRegistry;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub(crate) fn context(config: Config) -> ExtensionContext {
        let db = Arc::new(Database::new(":memory:").unwrap());
        let rotation = Arc::new(RotationManager::new(db.clone(), Arc::new(ProviderRegistry::new())));
        ExtensionContext {
            db,
            rotation,
            config: Arc::new(config),
        }
    }

    struct Probe {
        name: &'static str,
        valid: bool,
        init_ok: bool,
        start_ok: bool,
        stops: Arc<AtomicUsize>,
        hook_runs: Arc<AtomicUsize>,
    }

    struct CountingHook {
        runs: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Hook for CountingHook {
        fn id(&self) -> &str {
            "probe.count"
        }
        fn point(&self) -> HookPoint {
            HookPoint::UserCreate
        }
        fn timing(&self) -> HookTiming {
            HookTiming::After
        }
        async fn run(&self, _event: &HookEvent) -> Result<(), String> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[async_trait]
    impl Extension for Probe {
        fn name(&self) -> &'static str {
            self.name
        }
        fn friendly_name(&self) -> &'static str {
            "Probe"
        }
        fn description(&self) -> &'static str {
            "Lifecycle probe"
        }
        fn abilities(&self) -> Vec<AbilitySpec> {
            vec![AbilitySpec::new("ping", "Ping")]
        }
        fn hooks(&self, _ctx: &ExtensionContext) -> Vec<Arc<dyn Hook>> {
            vec![Arc::new(CountingHook {
                runs: self.hook_runs.clone(),
            })]
        }
        fn validate_config(&self, _config: &Config) -> Result<(), String> {
            if self.valid { Ok(()) } else { Err("missing key".to_string()) }
        }
        async fn on_initialize(&self, _ctx: &ExtensionContext) -> bool {
            self.init_ok
        }
        async fn on_start(&self, _ctx: &ExtensionContext) -> bool {
            self.start_ok
        }
        async fn on_stop(&self, _ctx: &ExtensionContext) -> bool {
            self.stops.fetch_add(1, Ordering::SeqCst);
            true
        }
    }

    fn probe(name: &'static str, valid: bool, start_ok: bool, stops: &Arc<AtomicUsize>) -> Arc<dyn Extension> {
        Arc::new(Probe {
            name,
            valid,
            init_ok: true,
            start_ok,
            stops: stops.clone(),
            hook_runs: Arc::new(AtomicUsize::new(0)),
        })
    }

    #[tokio::test]
    async fn test_lifecycle_states() {
        let ctx = context(Config::for_tests());
        let registry = ExtensionRegistry::new(ctx.clone(), Arc::new(HookManager::new()));
        let stops = Arc::new(AtomicUsize::new(0));
        registry.register(probe("good", true, true, &stops));
        registry.register(probe("invalid", false, true, &stops));
        registry.register(probe("flaky", true, false, &stops));
        registry.register(probe("good", true, true, &stops));

        assert_eq!(registry.initialize_all().await, 2);
        assert!(matches!(registry.state("invalid"), Some(ExtensionState::Failed(_))));
        assert!(ctx.db.get_extension_by_name("invalid").unwrap().is_none());
        assert!(ctx.db.find_ability("good", "ping").unwrap().is_some());

        assert_eq!(registry.start_all().await, 1);
        assert_eq!(registry.state("good"), Some(ExtensionState::Running));
        assert!(matches!(registry.state("flaky"), Some(ExtensionState::Failed(_))));

        assert_eq!(registry.stop_all().await, 1);
        assert_eq!(stops.load(Ordering::SeqCst), 1);
        assert_eq!(registry.state("good"), Some(ExtensionState::Stopped));
        assert_eq!(registry.statuses().len(), 3);
    }

    #[tokio::test]
    async fn test_failed_extensions_leave_no_hooks() {
        let ctx = context(Config::for_tests());
        let hooks = Arc::new(HookManager::new());
        let registry = ExtensionRegistry::new(ctx, hooks.clone());
        let runs = Arc::new(AtomicUsize::new(0));
        let stops = Arc::new(AtomicUsize::new(0));
        let ext = |name, init_ok, start_ok| -> Arc<dyn Extension> {
            Arc::new(Probe {
                name,
                valid: true,
                init_ok,
                start_ok,
                stops: stops.clone(),
                hook_runs: runs.clone(),
            })
        };
        registry.register(ext("broken_init", false, true));
        registry.register(ext("broken_start", true, false));
        registry.register(ext("healthy", true, true));

        assert_eq!(registry.initialize_all().await, 2);
        assert!(matches!(registry.state("broken_init"), Some(ExtensionState::Failed(_))));
        assert_eq!(hooks.hook_count(), 2);

        assert_eq!(registry.start_all().await, 1);
        assert!(matches!(registry.state("broken_start"), Some(ExtensionState::Failed(_))));
        assert_eq!(hooks.hook_count(), 1);

        let report = hooks
            .fire(HookPoint::UserCreate, HookTiming::After, &HookEvent::new("u1", json!({})))
            .await;
        assert_eq!(report.ran, 1);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_seed_default_instance_is_idempotent() {
        let ctx = context(Config::for_tests());
        ctx.db.ensure_provider("SendGrid", None).unwrap();

        seed_default_instance(&ctx, "email", "SendGrid", Some("SG.one"), &[("from_email", "a@example.com")]).unwrap();
        seed_default_instance(&ctx, "email", "SendGrid", Some("SG.two"), &[("from_email", "a@example.com")]).unwrap();

        let rotation = ctx.db.get_rotation_by_name("email-default").unwrap().unwrap();
        let entries = ctx.db.list_rotation_instances(&rotation.id).unwrap();
        assert_eq!(entries.len(), 1);

        let instance = ctx.db.get_provider_instance(&entries[0].provider_instance_id).unwrap().unwrap();
        assert_eq!(instance.api_key.as_deref(), Some("SG.two"));
        assert_eq!(
            ctx.db.instance_settings_map(&instance.id).unwrap().get("from_email").map(|s| s.as_str()),
            Some("a@example.com")
        );
    }

    #[tokio::test]
    async fn test_seed_without_credentials_only_creates_rotation() {
        let ctx = context(Config::for_tests());
        ctx.db.ensure_provider("Stripe", None).unwrap();
        seed_default_instance(&ctx, "payment", "Stripe", None, &[]).unwrap();

        let rotation = ctx.db.get_rotation_by_name("payment-default").unwrap().unwrap();
        assert!(ctx.db.list_rotation_instances(&rotation.id).unwrap().is_empty());
    }
}
