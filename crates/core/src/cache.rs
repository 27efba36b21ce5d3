use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde_json::Value;

/// Side cache placed by services in front of backend reads.
pub trait CacheProvider: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;

    /// `ttl_seconds == 0` keeps the value until removed.
    fn put(&self, ttl_seconds: u64, key: &str, value: Value);

    fn remove(&self, key: &str);

    fn clear(&self);

    fn has_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }
}

struct CachedValue {
    value: Value,
    expires_at: Option<Instant>,
}

impl CachedValue {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Default)]
pub struct InMemoryCache {
    entries: DashMap<String, CachedValue>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops expired values and returns how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, cached| !cached.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl CacheProvider for InMemoryCache {
    fn get(&self, key: &str) -> Option<Value> {
        let now = Instant::now();
        if self.entries.remove_if(key, |_, cached| cached.is_expired(now)).is_some() {
            return None;
        }
        self.entries.get(key).map(|cached| cached.value.clone())
    }

    fn put(&self, ttl_seconds: u64, key: &str, value: Value) {
        let expires_at = (ttl_seconds > 0).then(|| Instant::now() + Duration::from_secs(ttl_seconds));
        self.entries.insert(key.to_string(), CachedValue { value, expires_at });
    }

    fn remove(&self, key: &str) {
        self.entries.remove(key);
    }

    fn clear(&self) {
        self.entries.clear();
    }
}
