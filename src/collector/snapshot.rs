use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::CacheStats;

/// One point-in-time bundle of every metric section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    /// `None` when the telemetry provider failed or timed out this cycle
    pub system: Option<SystemMetrics>,
    pub database: DatabaseMetrics,
    pub cache: CacheStats,
    pub application: ApplicationMetrics,
}

/// Raw readings as returned by a [`super::system::SystemProvider`].
#[derive(Debug, Clone, Default)]
pub struct SystemTelemetry {
    pub cpu_usage: f64,
    pub cpu_cores: usize,
    pub memory_total: u64,
    pub memory_free: u64,
    pub memory_used: u64,
    pub disk_total: u64,
    pub disk_free: u64,
    pub disk_used: u64,
    /// Bytes per second since the previous sample
    pub network_rx: f64,
    pub network_tx: f64,
    pub load: [f64; 3],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemMetrics {
    pub cpu: CpuMetrics,
    pub memory: UsageMetrics,
    pub disk: UsageMetrics,
    pub network: NetworkMetrics,
    pub load: LoadAverage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpuMetrics {
    pub usage: f64,
    pub cores: usize,
}

/// Capacity section shared by memory and disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageMetrics {
    pub total: u64,
    pub used: u64,
    pub free: u64,
    pub usage: f64,
}

impl UsageMetrics {
    pub fn new(total: u64, used: u64, free: u64) -> Self {
        let usage = if total > 0 {
            used as f64 * 100.0 / total as f64
        } else {
            0.0
        };
        Self { total, used, free, usage }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkMetrics {
    pub rx: f64,
    pub tx: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadAverage {
    pub one: f64,
    pub five: f64,
    pub fifteen: f64,
}

impl From<SystemTelemetry> for SystemMetrics {
    fn from(t: SystemTelemetry) -> Self {
        Self {
            cpu: CpuMetrics { usage: t.cpu_usage, cores: t.cpu_cores },
            memory: UsageMetrics::new(t.memory_total, t.memory_used, t.memory_free),
            disk: UsageMetrics::new(t.disk_total, t.disk_used, t.disk_free),
            network: NetworkMetrics { rx: t.network_rx, tx: t.network_tx },
            load: LoadAverage { one: t.load[0], five: t.load[1], fifteen: t.load[2] },
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DbStatus {
    Healthy,
    Error,
    #[default]
    Unknown,
}

impl DbStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DbStatus::Healthy => "healthy",
            DbStatus::Error => "error",
            DbStatus::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatabaseMetrics {
    pub status: DbStatus,
    pub connections: Option<u32>,
    pub latency_ms: Option<u64>,
    pub last_check: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationMetrics {
    pub start_time: DateTime<Utc>,
    pub uptime_secs: u64,
    pub requests: u64,
    pub errors: u64,
    /// Samples currently held in the rolling response-time window
    pub sample_count: usize,
    /// Mean of the rolling window; `None` until a request is recorded
    pub avg_response_time: Option<f64>,
    /// `errors / requests * 100`; `None` while no request has been seen
    pub error_rate: Option<f64>,
}
