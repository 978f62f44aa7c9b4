//! Periodic background services
//!
//! A `ServiceRunner` calls `Service::update` on a fixed interval until it is
//! cancelled or the service fails too many times in a row.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::db::Database;

#[async_trait]
pub trait Service: Send + Sync {
    fn name(&self) -> &str;
    async fn update(&self) -> Result<(), String>;
}

#[derive(Debug, Clone, Copy)]
pub struct ServiceConfig {
    pub interval: Duration,
    /// Consecutive failures that stop the service
    pub max_failures: u32,
    pub retry_delay: Duration,
}

impl ServiceConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            interval: Duration::from_secs(config.service_interval_secs.max(1)),
            max_failures: config.service_max_failures.max(1),
            retry_delay: Duration::from_secs(config.service_retry_delay_secs),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceExit {
    Cancelled,
    TooManyFailures,
}

/// Snapshot of a runner for the health route
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub name: String,
    pub paused: bool,
    pub consecutive_failures: u32,
    pub updates: u64,
}

pub struct ServiceRunner {
    service: Arc<dyn Service>,
    config: ServiceConfig,
    paused: AtomicBool,
    consecutive_failures: AtomicU32,
    updates: AtomicU64,
}

impl ServiceRunner {
    pub fn new(service: Arc<dyn Service>, config: ServiceConfig) -> Self {
        Self {
            service,
            config,
            paused: AtomicBool::new(false),
            consecutive_failures: AtomicU32::new(0),
            updates: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        self.service.name()
    }

    pub fn status(&self) -> ServiceStatus {
        ServiceStatus {
            name: self.name().to_string(),
            paused: self.is_paused(),
            consecutive_failures: self.consecutive_failures(),
            updates: self.updates(),
        }
    }

    pub fn pause(&self) {
        if !self.paused.swap(true, Ordering::SeqCst) {
            log::info!("[SERVICE] '{}' paused", self.service.name());
        }
    }

    pub fn resume(&self) {
        if self.paused.swap(false, Ordering::SeqCst) {
            log::info!("[SERVICE] '{}' resumed", self.service.name());
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::SeqCst)
    }

    /// Number of update calls made so far
    pub fn updates(&self) -> u64 {
        self.updates.load(Ordering::SeqCst)
    }

    /// Sleep unless cancelled first; true when cancelled
    async fn wait(token: &CancellationToken, duration: Duration) -> bool {
        tokio::select! {
            _ = token.cancelled() => true,
            _ = tokio::time::sleep(duration) => false,
        }
    }

    pub async fn run(&self, token: CancellationToken) -> ServiceExit {
        let name = self.service.name().to_string();
        log::info!(
            "[SERVICE] '{}' started (interval {:?}, max failures {})",
            name,
            self.config.interval,
            self.config.max_failures
        );

        loop {
            if token.is_cancelled() {
                break;
            }

            if self.is_paused() {
                if Self::wait(&token, self.config.interval).await {
                    break;
                }
                continue;
            }

            self.updates.fetch_add(1, Ordering::SeqCst);
            let delay = match self.service.update().await {
                Ok(()) => {
                    self.consecutive_failures.store(0, Ordering::SeqCst);
                    self.config.interval
                }
                Err(e) => {
                    let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                    log::error!(
                        "[SERVICE] '{}' update failed ({}/{}): {}",
                        name,
                        failures,
                        self.config.max_failures,
                        e
                    );
                    if failures >= self.config.max_failures {
                        log::error!("[SERVICE] '{}' stopping after {} consecutive failures", name, failures);
                        return ServiceExit::TooManyFailures;
                    }
                    self.config.retry_delay
                }
            };

            if Self::wait(&token, delay).await {
                break;
            }
        }

        log::info!("[SERVICE] '{}' stopped", name);
        ServiceExit::Cancelled
    }
}

/// Removes expired sessions
pub struct SessionCleanupService {
    db: Arc<Database>,
}

impl SessionCleanupService {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Service for SessionCleanupService {
    fn name(&self) -> &str {
        "session_cleanup"
    }

    async fn update(&self) -> Result<(), String> {
        let removed = self.db.delete_expired_sessions().map_err(|e| e.to_string())?;
        if removed > 0 {
            log::debug!("[SERVICE] Removed {} expired sessions", removed);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Returns scripted results, then succeeds forever
    struct Scripted {
        results: Mutex<VecDeque<Result<(), String>>>,
    }

    impl Scripted {
        fn new(results: Vec<Result<(), String>>) -> Arc<Self> {
            Arc::new(Self {
                results: Mutex::new(results.into()),
            })
        }
    }

    #[async_trait]
    impl Service for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn update(&self) -> Result<(), String> {
            self.results.lock().pop_front().unwrap_or(Ok(()))
        }
    }

    fn config(max_failures: u32) -> ServiceConfig {
        ServiceConfig {
            interval: Duration::from_secs(60),
            max_failures,
            retry_delay: Duration::from_secs(10),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_after_consecutive_failures() {
        let service = Scripted::new(vec![Err("a".into()), Err("b".into()), Err("c".into())]);
        let runner = ServiceRunner::new(service, config(3));

        let exit = runner.run(CancellationToken::new()).await;
        assert_eq!(exit, ServiceExit::TooManyFailures);
        assert_eq!(runner.updates(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_failure_count() {
        let service = Scripted::new(vec![
            Err("a".into()),
            Err("b".into()),
            Ok(()),
            Err("c".into()),
            Err("d".into()),
            Err("e".into()),
        ]);
        let runner = ServiceRunner::new(service, config(3));

        let exit = runner.run(CancellationToken::new()).await;
        assert_eq!(exit, ServiceExit::TooManyFailures);
        assert_eq!(runner.updates(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_and_pause() {
        let runner = Arc::new(ServiceRunner::new(Scripted::new(vec![]), config(3)));
        let token = CancellationToken::new();

        let handle = {
            let runner = runner.clone();
            let token = token.clone();
            tokio::spawn(async move { runner.run(token).await })
        };

        // First update runs immediately, the next after one interval
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(runner.updates(), 2);

        runner.pause();
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert!(runner.updates() <= 3);
        let while_paused = runner.updates();

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(runner.updates(), while_paused);

        runner.resume();
        tokio::time::sleep(Duration::from_secs(121)).await;
        assert!(runner.updates() > while_paused);

        token.cancel();
        assert_eq!(handle.await.unwrap(), ServiceExit::Cancelled);
    }

    #[tokio::test]
    async fn test_session_cleanup_update() {
        let db = Arc::new(Database::new(":memory:").unwrap());
        let user = db.create_user("a@example.com", None, "hash").unwrap();
        db.create_session("expired", &user.id, false, chrono::Duration::seconds(-5)).unwrap();
        db.create_session("live", &user.id, false, chrono::Duration::hours(1)).unwrap();

        SessionCleanupService::new(db.clone()).update().await.unwrap();
        assert!(db.validate_session("live").unwrap().is_some());
        assert_eq!(db.delete_expired_sessions().unwrap(), 0);
    }
}
