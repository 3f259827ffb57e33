//! In-memory TTL cache for memoising expensive computed results.
//!
//! Expiry is lazy: an entry past its deadline is treated as absent and removed
//! only when its key is read again. There is no background sweep and no
//! capacity bound, so memory held by keys that are never read again is only
//! reclaimed by [`TtlCache::clear`].

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

struct CacheEntry<V> {
    value: V,
    /// None when `ttl` is too large to represent; such entries never expire
    expires_at: Option<Instant>,
}

pub struct TtlCache<V> {
    entries: Mutex<HashMap<String, CacheEntry<V>>>,
}

impl<V: Clone> TtlCache<V> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Store a value that expires `ttl` from now, replacing any existing entry.
    pub async fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let entry = CacheEntry {
            value,
            expires_at: Instant::now().checked_add(ttl),
        };
        self.entries.lock().await.insert(key.into(), entry);
    }

    /// Get a live value. An expired entry is purged and reported as absent.
    pub async fn get(&self, key: &str) -> Option<V> {
        let mut guard = self.entries.lock().await;
        let entry = guard.get(key)?;
        if entry.expires_at.is_none_or(|deadline| Instant::now() < deadline) {
            return Some(entry.value.clone());
        }
        guard.remove(key);
        None
    }

    pub async fn delete(&self, key: &str) -> bool {
        self.entries.lock().await.remove(key).is_some()
    }

    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }

    /// Number of stored entries, including expired ones not yet purged.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl<V: Clone> Default for TtlCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Derive a cache key from a namespace and request parameters.
///
/// `serde_json` objects keep their keys sorted, so two parameter sets that only
/// differ in field order map to the same key. String values are trimmed before
/// hashing.
pub fn fingerprint(namespace: &str, params: &Value) -> String {
    let normalized = normalize(params);
    let mut hasher = Sha256::new();
    hasher.update(namespace.as_bytes());
    hasher.update([0u8]);
    hasher.update(normalized.to_string().as_bytes());
    let digest = hasher.finalize();

    let mut key = String::with_capacity(namespace.len() + 1 + digest.len() * 2);
    key.push_str(namespace);
    key.push(':');
    for byte in digest {
        key.push_str(&format!("{byte:02x}"));
    }
    key
}

fn normalize(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(s.trim().to_string()),
        Value::Array(items) => Value::Array(items.iter().map(normalize).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), normalize(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}
