//! Degraded-mode last-known-value cache.
//!
//! While a target's circuit is open, the Metrics Client serves the last-known-good
//! response for a query from this cache instead of failing outright, so forecasters and
//! pattern classification can keep running off slightly stale data.
//!
//! A bounded in-memory store that degrades gracefully rather than failing when the upstream is
//! unavailable, generalized from "buffer outgoing metrics" to "cache incoming query results":
//! same shape, opposite direction of data flow.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};

/// A cached value tagged with the time it was recorded, so callers can enforce the
/// "no action on data older than 10 minutes" rule.
#[derive(Debug, Clone)]
pub struct StaleValue<T> {
    pub value: T,
    pub recorded_at: i64,
}

impl<T> StaleValue<T> {
    pub fn age_seconds(&self, now: i64) -> i64 {
        (now - self.recorded_at).max(0)
    }
}

pub struct LastKnownCache<T> {
    entries: RwLock<HashMap<String, StaleValue<T>>>,
}

impl<T: Clone> Default for LastKnownCache<T> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<T: Clone> LastKnownCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, key: &str, value: T) {
        let recorded_at = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64;
        self.entries
            .write()
            .expect("cache lock poisoned")
            .insert(key.to_string(), StaleValue { value, recorded_at });
    }

    pub fn get(&self, key: &str) -> Option<StaleValue<T>> {
        self.entries.read().expect("cache lock poisoned").get(key).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_round_trips() {
        let cache: LastKnownCache<f64> = LastKnownCache::new();
        cache.put("up{job=x}", 42.0);
        let got = cache.get("up{job=x}").unwrap();
        assert_eq!(got.value, 42.0);
    }

    #[test]
    fn missing_key_returns_none() {
        let cache: LastKnownCache<f64> = LastKnownCache::new();
        assert!(cache.get("absent").is_none());
    }

    #[test]
    fn age_seconds_never_negative() {
        let stale = StaleValue {
            value: 1,
            recorded_at: i64::MAX / 2,
        };
        assert_eq!(stale.age_seconds(0), 0);
    }
}
