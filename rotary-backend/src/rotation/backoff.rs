//! Per-instance exponential cooldown
//!
//! An instance that fails with a failover error is put into cooldown. Rotations
//! keep trying it, but only after every healthy instance has been tried.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Minimum backoff delay in seconds
const MIN_BACKOFF_SECS: u64 = 5;
/// Maximum backoff delay in seconds
const MAX_BACKOFF_SECS: u64 = 60;
/// Time without errors after which backoff starts over
const RESET_AFTER_SECS: u64 = 120;

#[derive(Debug, Clone)]
struct BackoffState {
    current_delay: u64,
    last_error_at: Instant,
    error_count: u32,
}

impl Default for BackoffState {
    fn default() -> Self {
        BackoffState {
            current_delay: MIN_BACKOFF_SECS,
            last_error_at: Instant::now(),
            error_count: 0,
        }
    }
}

/// Backoff state keyed by provider instance id
pub struct BackoffTracker {
    states: RwLock<HashMap<String, BackoffState>>,
}

impl BackoffTracker {
    pub fn new() -> Self {
        BackoffTracker {
            states: RwLock::new(HashMap::new()),
        }
    }

    pub fn record_success(&self, key: &str) {
        if self.states.write().remove(key).is_some() {
            log::debug!("[ROTATION] Instance '{}' recovered, backoff reset", key);
        }
    }

    /// Record a failure and return the cooldown in seconds
    pub fn record_error(&self, key: &str) -> u64 {
        let mut states = self.states.write();
        let state = states.entry(key.to_string()).or_default();
        let now = Instant::now();

        if now.duration_since(state.last_error_at) > Duration::from_secs(RESET_AFTER_SECS) {
            state.current_delay = MIN_BACKOFF_SECS;
            state.error_count = 1;
        } else {
            state.error_count += 1;
            if state.error_count > 1 {
                state.current_delay = (state.current_delay * 2).min(MAX_BACKOFF_SECS);
            }
        }

        state.last_error_at = now;
        log::warn!(
            "[ROTATION] Error #{} for instance '{}', cooldown: {}s",
            state.error_count,
            key,
            state.current_delay
        );
        state.current_delay
    }

    pub fn current_delay(&self, key: &str) -> Option<u64> {
        self.states.read().get(key).map(|s| s.current_delay)
    }

    /// True while the last error is more recent than the current delay
    pub fn is_cooling_down(&self, key: &str) -> bool {
        self.states
            .read()
            .get(key)
            .map(|s| s.last_error_at.elapsed() < Duration::from_secs(s.current_delay))
            .unwrap_or(false)
    }
}

impl Default for BackoffTracker {
    fn default() -> Self {
        Self::new()
    }
}
