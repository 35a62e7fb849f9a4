pub mod application;
pub mod database;
pub mod snapshot;
pub mod system;

use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

use crate::cache::{CacheLayer, CacheStats, CacheStatus};
pub use application::AppCounters;
pub use database::{DatabaseProbe, ProbeOutcome, TcpProbe};
pub use snapshot::{DatabaseMetrics, DbStatus, MetricsSnapshot, SystemMetrics, SystemTelemetry};
pub use system::{SysinfoProvider, SystemProvider};

/// Samples system, database, cache and application health into one
/// [`MetricsSnapshot`].
///
/// The four sources are queried together; each carries its own timeout and
/// a failing source only degrades its own section.
pub struct MetricsCollector {
    system: Arc<dyn SystemProvider>,
    database: Option<Arc<dyn DatabaseProbe>>,
    cache: Arc<CacheLayer>,
    counters: Arc<AppCounters>,
    probe_timeout: Duration,
}

impl MetricsCollector {
    pub fn new(system: Arc<dyn SystemProvider>, cache: Arc<CacheLayer>, counters: Arc<AppCounters>) -> Self {
        Self {
            system,
            database: None,
            cache,
            counters,
            probe_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_database(mut self, probe: Arc<dyn DatabaseProbe>) -> Self {
        self.database = Some(probe);
        self
    }

    pub fn with_probe_timeout(mut self, probe_timeout: Duration) -> Self {
        self.probe_timeout = probe_timeout;
        self
    }

    pub fn counters(&self) -> &Arc<AppCounters> {
        &self.counters
    }

    pub fn record_request(&self, response_time_ms: u64, is_error: bool) {
        self.counters.record_request(response_time_ms, is_error);
    }

    /// Run one collection pass. Never fails; broken sources show up as
    /// missing or error-status sections.
    pub async fn collect(&self) -> MetricsSnapshot {
        let (system, database, cache, application) = tokio::join!(
            self.system_section(),
            self.database_section(),
            self.cache_section(),
            async { self.counters.snapshot() },
        );

        MetricsSnapshot {
            timestamp: Utc::now(),
            system,
            database,
            cache,
            application,
        }
    }

    async fn system_section(&self) -> Option<SystemMetrics> {
        match timeout(self.probe_timeout, self.system.sample()).await {
            Ok(Ok(telemetry)) => Some(telemetry.into()),
            Ok(Err(e)) => {
                tracing::warn!(source = self.system.name(), error = %e, "System telemetry failed");
                None
            }
            Err(_) => {
                tracing::warn!(source = self.system.name(), "System telemetry timed out");
                None
            }
        }
    }

    async fn database_section(&self) -> DatabaseMetrics {
        let Some(probe) = &self.database else {
            return DatabaseMetrics::default();
        };

        let checked_at = Utc::now();
        let outcome = match timeout(self.probe_timeout, probe.ping()).await {
            Ok(result) => result,
            Err(_) => Err(anyhow::anyhow!(
                "database probe timed out after {}ms",
                self.probe_timeout.as_millis()
            )),
        };

        match outcome {
            Ok(outcome) => DatabaseMetrics {
                status: DbStatus::Healthy,
                connections: outcome.connections,
                latency_ms: Some(outcome.latency_ms),
                last_check: Some(checked_at),
                error: None,
            },
            Err(e) => {
                tracing::warn!(probe = probe.name(), error = %e, "Database probe failed");
                DatabaseMetrics {
                    status: DbStatus::Error,
                    connections: None,
                    latency_ms: None,
                    last_check: Some(checked_at),
                    error: Some(e.to_string()),
                }
            }
        }
    }

    async fn cache_section(&self) -> CacheStats {
        match timeout(self.probe_timeout, self.cache.stats()).await {
            Ok(stats) => stats,
            Err(_) => {
                tracing::warn!("Cache health check timed out");
                CacheStats {
                    backend: String::new(),
                    status: CacheStatus::Disconnected,
                    reachable: false,
                    total_keys: 0,
                    keys_by_type: BTreeMap::new(),
                }
            }
        }
    }
}
