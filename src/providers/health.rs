//! Memoized endpoint health checks.
//!
//! Pinging before every request would double the round-trips to a healthy
//! endpoint, so probe results are kept for a short TTL in a moka cache keyed
//! on the model name.

use std::future::Future;
use std::time::Duration;

use moka::sync::Cache;
use tracing::debug;

/// Default time a probe result stays valid.
pub const DEFAULT_HEALTH_TTL: Duration = Duration::from_secs(5);

pub struct HealthProbe {
    results: Cache<String, bool>,
}

impl HealthProbe {
    pub fn new(ttl: Duration) -> Self {
        Self {
            results: Cache::builder().max_capacity(64).time_to_live(ttl).build(),
        }
    }

    /// Return the remembered status for `key`, or run `probe` and remember it.
    pub async fn check<F, Fut>(&self, key: &str, probe: F) -> bool
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = bool>,
    {
        if let Some(online) = self.results.get(key) {
            return online;
        }
        let online = probe().await;
        debug!(key, online, "endpoint health probed");
        self.results.insert(key.to_string(), online);
        online
    }

    /// Forget the status for `key`, forcing the next check to probe.
    pub fn invalidate(&self, key: &str) {
        self.results.invalidate(key);
    }
}

impl Default for HealthProbe {
    fn default() -> Self {
        Self::new(DEFAULT_HEALTH_TTL)
    }
}
