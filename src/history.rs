use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use crate::cache::CacheLayer;
use crate::types::{Alert, Severity};

/// Cache key of the recent-alerts mirror
pub const HISTORY_KEY: &str = "alert_history";

/// Aggregate view over the history buffer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryStats {
    pub total: usize,
    pub last_24h: usize,
    pub last_7d: usize,
    /// Counts over the last 24 hours
    pub by_severity: BTreeMap<Severity, usize>,
}

/// Bounded, newest-first record of fired alerts.
///
/// The buffer lives in process. After every insert the newest
/// `mirror_size` entries are also written to the cache under
/// [`HISTORY_KEY`] for readers outside this process.
pub struct AlertHistory {
    entries: RwLock<VecDeque<Alert>>,
    capacity: usize,
    cache: Arc<CacheLayer>,
    mirror_size: usize,
    mirror_ttl_secs: u64,
    retention: ChronoDuration,
}

impl AlertHistory {
    pub fn new(cache: Arc<CacheLayer>, capacity: usize) -> Self {
        Self {
            entries: RwLock::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
            cache,
            mirror_size: 100,
            mirror_ttl_secs: 3600,
            retention: ChronoDuration::days(7),
        }
    }

    pub fn with_mirror(mut self, size: usize, ttl_secs: u64) -> Self {
        self.mirror_size = size;
        self.mirror_ttl_secs = ttl_secs;
        self
    }

    pub fn with_retention_days(mut self, days: u32) -> Self {
        self.retention = ChronoDuration::days(i64::from(days));
        self
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub async fn record(&self, alert: Alert) {
        let mirror: Vec<Alert> = {
            let mut entries = self.entries.write();
            entries.push_front(alert);
            entries.truncate(self.capacity);
            entries.iter().take(self.mirror_size).cloned().collect()
        };

        if self.mirror_size > 0 {
            self.cache
                .set(HISTORY_KEY, &mirror, Some(self.mirror_ttl_secs))
                .await;
        }
    }

    /// Newest `limit` alerts, newest first
    pub fn recent(&self, limit: usize) -> Vec<Alert> {
        self.entries.read().iter().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Drop entries older than the retention period. Returns how many went.
    pub fn cleanup_expired(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.retention;
        let mut entries = self.entries.write();
        let before = entries.len();
        // Newest-first, so everything past the first stale entry is stale too
        if let Some(idx) = entries.iter().position(|a| a.timestamp < cutoff) {
            entries.truncate(idx);
        }
        let removed = before - entries.len();
        if removed > 0 {
            tracing::info!(removed, remaining = entries.len(), "Pruned alert history");
        }
        removed
    }

    pub fn stats(&self, now: DateTime<Utc>) -> HistoryStats {
        let day_ago = now - ChronoDuration::hours(24);
        let week_ago = now - ChronoDuration::days(7);
        let entries = self.entries.read();

        let mut stats = HistoryStats {
            total: entries.len(),
            ..Default::default()
        };
        for alert in entries.iter() {
            if alert.timestamp >= week_ago {
                stats.last_7d += 1;
            }
            if alert.timestamp >= day_ago {
                stats.last_24h += 1;
                *stats.by_severity.entry(alert.severity).or_insert(0) += 1;
            }
        }
        stats
    }
}
