use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use dotenv::dotenv;
use futures_util::future::join_all;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

mod auth;
mod config;
mod controllers;
mod db;
mod extensions;
mod hooks;
mod mfa;
mod middleware;
mod models;
mod providers;
mod rotation;
mod services;

use config::Config;
use db::Database;
use extensions::{ExtensionContext, ExtensionRegistry};
use hooks::HookManager;
use mfa::MfaManager;
use providers::ProviderRegistry;
use rotation::RotationManager;
use services::{ServiceConfig, ServiceRunner, SessionCleanupService};

pub struct AppState {
    pub db: Arc<Database>,
    pub config: Arc<Config>,
    pub hooks: Arc<HookManager>,
    pub rotation: Arc<RotationManager>,
    pub extensions: Arc<ExtensionRegistry>,
    pub mfa: Arc<MfaManager>,
    /// Background services; spawned by main, paused and resumed over HTTP
    pub services: Vec<Arc<ServiceRunner>>,
}

impl AppState {
    /// Open the database and bring every enabled extension to the initialized state
    pub async fn initialize(config: Config) -> rusqlite::Result<Self> {
        let config = Arc::new(config);

        log::info!("Initializing database at {}", config.database_url);
        let db = Arc::new(Database::new(&config.database_url)?);

        let registry = Arc::new(ProviderRegistry::new());
        let rotation = Arc::new(RotationManager::new(db.clone(), registry));
        let hooks = Arc::new(HookManager::new());

        log::info!("Initializing extensions: {}", config.extensions.join(", "));
        let ctx = ExtensionContext {
            db: db.clone(),
            rotation: rotation.clone(),
            config: config.clone(),
        };
        let extensions = Arc::new(ExtensionRegistry::with_builtins(ctx, hooks.clone()));
        let initialized = extensions.initialize_all().await;
        log::info!(
            "Initialized {} extensions, {} providers, {} hooks",
            initialized,
            rotation.registry().len(),
            hooks.hook_count()
        );

        let mfa_enabled = config.mfa_enabled && config.extension_enabled("mfa");
        let mfa = Arc::new(MfaManager::new(
            db.clone(),
            rotation.clone(),
            hooks.clone(),
            config.mfa_issuer.clone(),
            mfa_enabled,
        ));

        let services = vec![Arc::new(ServiceRunner::new(
            Arc::new(SessionCleanupService::new(db.clone())),
            ServiceConfig::from_config(&config),
        ))];

        Ok(Self {
            db,
            config,
            hooks,
            rotation,
            extensions,
            mfa,
            services,
        })
    }

    pub fn service(&self, name: &str) -> Option<&Arc<ServiceRunner>> {
        self.services.iter().find(|s| s.name() == name)
    }

    /// In-memory state with every built-in extension started
    #[cfg(test)]
    pub async fn for_tests() -> Self {
        let state = Self::initialize(Config::for_tests()).await.unwrap();
        state.extensions.start_all().await;
        state
    }
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();
    env_logger::init();

    let config = Config::from_env();
    let port = config.port;
    if config.root_api_key.is_none() {
        log::warn!("ROOT_API_KEY is not set; catalog administration is disabled");
    }

    let state = AppState::initialize(config)
        .await
        .map_err(|e| std::io::Error::other(format!("Failed to initialize: {}", e)))?;
    let started = state.extensions.start_all().await;
    log::info!("Started {} extensions", started);

    // Background services stop on this token at shutdown
    let shutdown = CancellationToken::new();
    let service_handles: Vec<_> = state
        .services
        .iter()
        .map(|runner| {
            let runner = runner.clone();
            let token = shutdown.clone();
            tokio::spawn(async move {
                let exit = runner.run(token).await;
                log::info!("[SERVICE] '{}' exited: {:?}", runner.name(), exit);
            })
        })
        .collect();

    let extensions = state.extensions.clone();
    let state = web::Data::new(state);

    log::info!("Starting Rotary server on port {}", port);
    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(state.clone())
            .wrap(Logger::default())
            .wrap(cors)
            .configure(controllers::health::config)
            .configure(controllers::auth::config)
            .configure(controllers::mfa::config)
            .configure(controllers::users::config)
            .configure(controllers::extensions::config)
            .configure(controllers::abilities::config)
            .configure(controllers::providers::config)
            .configure(controllers::provider_instances::config)
            .configure(controllers::rotations::config)
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await?;

    log::info!("Shutting down");
    shutdown.cancel();
    for result in join_all(service_handles).await {
        if let Err(e) = result {
            log::error!("[SERVICE] Service task panicked: {}", e);
        }
    }
    let stopped = extensions.stop_all().await;
    log::info!("Stopped {} extensions", stopped);
    Ok(())
}
