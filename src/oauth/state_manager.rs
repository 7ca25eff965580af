//! CSRF `state` values for the provider connect round-trip.
//!
//! The provider redirect carries no session cookie, so the state is what ties
//! the callback back to the user who started the flow.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Who started a connect flow, and when.
#[derive(Clone, Debug)]
pub struct StateEntry {
    pub provider: String,
    pub uid: String,
    pub created_at: DateTime<Utc>,
}

/// Outstanding connect states, each redeemable once before it expires.
#[derive(Clone)]
pub struct StateManager {
    states: Arc<Mutex<HashMap<String, StateEntry>>>,
    expiry_duration: Duration,
}

impl StateManager {
    /// States older than `expiry_seconds` are refused.
    pub fn new(expiry_seconds: i64) -> Self {
        Self {
            states: Arc::new(Mutex::new(HashMap::new())),
            expiry_duration: Duration::seconds(expiry_seconds),
        }
    }

    fn states(&self) -> std::sync::MutexGuard<'_, HashMap<String, StateEntry>> {
        // A poisoned map only holds short-lived CSRF states; keep serving
        self.states.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Issues a random state bound to `provider` and `uid`.
    pub fn create_state(&self, provider: &str, uid: &str) -> String {
        let state = Uuid::new_v4().to_string();
        let entry = StateEntry {
            provider: provider.to_string(),
            uid: uid.to_string(),
            created_at: Utc::now(),
        };

        self.states().insert(state.clone(), entry);

        state
    }

    /// Removes `state` and returns its entry if it has not expired.
    pub fn validate_and_consume(&self, state: &str) -> Option<StateEntry> {
        let entry = self.states().remove(state)?;

        if Utc::now() - entry.created_at > self.expiry_duration {
            return None;
        }

        Some(entry)
    }

    /// Drops states that can no longer be redeemed.
    pub fn cleanup_expired(&self) {
        let now = Utc::now();
        let expiry = self.expiry_duration;

        self.states()
            .retain(|_, entry| now - entry.created_at <= expiry);
    }

    /// Number of outstanding states.
    pub fn count(&self) -> usize {
        self.states().len()
    }
}

/// Sweeps expired states every `interval_seconds` (must be non-zero).
pub async fn run_state_cleanup(manager: StateManager, interval_seconds: u64) {
    let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(interval_seconds));

    loop {
        interval.tick().await;
        manager.cleanup_expired();
        tracing::debug!(remaining = manager.count(), "Swept expired connect states");
    }
}
