pub mod keys;
pub mod memory;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::error::CacheResult;

pub use keys::KeyKind;
pub use memory::MemoryStore;

/// Trait for key/value backing stores with per-entry expiry.
///
/// Keys handed to the store are already namespace-qualified. Implementations
/// must expire entries on their own; the layer above never stores anything
/// without a TTL.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Store name used in logs and stats (e.g., "memory")
    fn name(&self) -> &str;

    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    async fn set(&self, key: &str, value: String, ttl: Duration) -> CacheResult<()>;

    /// Returns whether a live entry was removed
    async fn delete(&self, key: &str) -> CacheResult<bool>;

    /// Live keys matching a glob pattern
    async fn keys(&self, pattern: &str) -> CacheResult<Vec<String>>;

    async fn ping(&self) -> CacheResult<()>;

    /// Drop expired entries. Stores with native expiry have nothing to do.
    async fn purge_expired(&self) -> CacheResult<usize> {
        Ok(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStatus {
    Connected,
    Disconnected,
}

/// Result of [`CacheLayer::stats`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    pub backend: String,
    pub status: CacheStatus,
    pub reachable: bool,
    pub total_keys: usize,
    pub keys_by_type: BTreeMap<String, usize>,
}

/// Namespaced, TTL-based cache over a [`CacheStore`].
///
/// Every failure of the backing store is logged and turned into a miss
/// (`None`, `false` or `0`); nothing here returns an error.
pub struct CacheLayer {
    store: Arc<dyn CacheStore>,
    namespace: String,
    default_ttl: u64,
}

impl CacheLayer {
    pub fn new(store: Arc<dyn CacheStore>, namespace: impl Into<String>, default_ttl: u64) -> Self {
        Self {
            store,
            namespace: namespace.into(),
            default_ttl: default_ttl.max(1),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn default_ttl(&self) -> u64 {
        self.default_ttl
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}:{}", self.namespace, key)
    }

    fn logical_key<'a>(&self, full: &'a str) -> &'a str {
        full.strip_prefix(&self.namespace)
            .and_then(|rest| rest.strip_prefix(':'))
            .unwrap_or(full)
    }

    /// Store `value` under `key`. Strings are stored verbatim, everything
    /// else as JSON. A missing or zero TTL falls back to the default.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl_secs: Option<u64>) -> bool {
        let encoded = match serde_json::to_value(value) {
            Ok(serde_json::Value::String(s)) => s,
            Ok(other) => other.to_string(),
            Err(e) => {
                tracing::warn!(key, error = %e, "Cache value could not be serialized");
                return false;
            }
        };

        let ttl = match ttl_secs {
            Some(secs) if secs > 0 => secs,
            _ => self.default_ttl,
        };

        match self.store.set(&self.full_key(key), encoded, Duration::from_secs(ttl)).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(key, error = %e, "Cache set failed");
                false
            }
        }
    }

    /// Fetch and decode `key`. Errors and undecodable values read as a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.store.get(&self.full_key(key)).await {
            Ok(raw) => raw?,
            Err(e) => {
                tracing::warn!(key, error = %e, "Cache get failed");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            // Plain strings were stored without JSON quoting
            Err(_) => match serde_json::from_value(serde_json::Value::String(raw)) {
                Ok(value) => Some(value),
                Err(e) => {
                    tracing::debug!(key, error = %e, "Cached value has unexpected shape");
                    None
                }
            },
        }
    }

    pub async fn delete(&self, key: &str) -> usize {
        match self.store.delete(&self.full_key(key)).await {
            Ok(true) => 1,
            Ok(false) => 0,
            Err(e) => {
                tracing::warn!(key, error = %e, "Cache delete failed");
                0
            }
        }
    }

    /// Remove every key in the namespace matching a glob (e.g. `user:*`).
    pub async fn delete_pattern(&self, pattern: &str) -> usize {
        let keys = match self.store.keys(&self.full_key(pattern)).await {
            Ok(keys) => keys,
            Err(e) => {
                tracing::warn!(pattern, error = %e, "Cache key scan failed");
                return 0;
            }
        };

        let mut removed = 0;
        for key in keys {
            match self.store.delete(&key).await {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => tracing::warn!(key = %key, error = %e, "Cache delete failed"),
            }
        }

        tracing::debug!(pattern, removed, "Cache pattern delete");
        removed
    }

    pub async fn exists(&self, key: &str) -> bool {
        match self.store.get(&self.full_key(key)).await {
            Ok(value) => value.is_some(),
            Err(e) => {
                tracing::warn!(key, error = %e, "Cache exists check failed");
                false
            }
        }
    }

    /// Return the cached value, or run `loader`, cache its result and return it.
    pub async fn get_or_set<T, F, Fut>(&self, key: &str, ttl_secs: Option<u64>, loader: F) -> anyhow::Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        if let Some(hit) = self.get(key).await {
            return Ok(hit);
        }

        let value = loader().await?;
        self.set(key, &value, ttl_secs).await;
        Ok(value)
    }

    /// Drop everything under the namespace.
    pub async fn clear(&self) -> usize {
        self.delete_pattern("*").await
    }

    pub async fn purge_expired(&self) -> usize {
        match self.store.purge_expired().await {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(error = %e, "Cache purge failed");
                0
            }
        }
    }

    /// Key counts bucketed by the first segment of the logical key.
    pub async fn stats(&self) -> CacheStats {
        let mut stats = CacheStats {
            backend: self.store.name().to_string(),
            status: CacheStatus::Disconnected,
            reachable: false,
            total_keys: 0,
            keys_by_type: BTreeMap::new(),
        };

        if let Err(e) = self.store.ping().await {
            tracing::warn!(error = %e, "Cache ping failed");
            return stats;
        }
        stats.status = CacheStatus::Connected;
        stats.reachable = true;

        match self.store.keys(&self.full_key("*")).await {
            Ok(keys) => {
                stats.total_keys = keys.len();
                for key in &keys {
                    let kind = self.logical_key(key).split(':').next().unwrap_or_default();
                    *stats.keys_by_type.entry(kind.to_string()).or_insert(0) += 1;
                }
            }
            Err(e) => tracing::warn!(error = %e, "Cache key scan failed"),
        }

        stats
    }
}
