pub mod engine;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use smallvec::{smallvec, SmallVec};
use std::sync::Arc;

use crate::collector::{DbStatus, MetricsSnapshot};
use crate::config::ThresholdConfig;
use crate::types::{ChannelKind, Severity};

pub use engine::AlertEngine;

/// Numeric snapshot fields a rule can compare against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetricField {
    #[serde(rename = "system.cpu.usage")]
    CpuUsage,
    #[serde(rename = "system.cpu.cores")]
    CpuCores,
    #[serde(rename = "system.memory.usage")]
    MemoryUsage,
    #[serde(rename = "system.memory.used")]
    MemoryUsed,
    #[serde(rename = "system.disk.usage")]
    DiskUsage,
    #[serde(rename = "system.disk.used")]
    DiskUsed,
    #[serde(rename = "system.network.rx")]
    NetworkRx,
    #[serde(rename = "system.network.tx")]
    NetworkTx,
    #[serde(rename = "system.load.one")]
    LoadOne,
    #[serde(rename = "database.latency_ms")]
    DbLatency,
    #[serde(rename = "database.connections")]
    DbConnections,
    #[serde(rename = "cache.total_keys")]
    CacheKeys,
    #[serde(rename = "application.requests")]
    Requests,
    #[serde(rename = "application.errors")]
    Errors,
    #[serde(rename = "application.avg_response_time")]
    AvgResponseTime,
    #[serde(rename = "application.error_rate")]
    ErrorRate,
}

impl MetricField {
    pub const ALL: [MetricField; 16] = [
        MetricField::CpuUsage,
        MetricField::CpuCores,
        MetricField::MemoryUsage,
        MetricField::MemoryUsed,
        MetricField::DiskUsage,
        MetricField::DiskUsed,
        MetricField::NetworkRx,
        MetricField::NetworkTx,
        MetricField::LoadOne,
        MetricField::DbLatency,
        MetricField::DbConnections,
        MetricField::CacheKeys,
        MetricField::Requests,
        MetricField::Errors,
        MetricField::AvgResponseTime,
        MetricField::ErrorRate,
    ];

    pub fn path(&self) -> &'static str {
        match self {
            MetricField::CpuUsage => "system.cpu.usage",
            MetricField::CpuCores => "system.cpu.cores",
            MetricField::MemoryUsage => "system.memory.usage",
            MetricField::MemoryUsed => "system.memory.used",
            MetricField::DiskUsage => "system.disk.usage",
            MetricField::DiskUsed => "system.disk.used",
            MetricField::NetworkRx => "system.network.rx",
            MetricField::NetworkTx => "system.network.tx",
            MetricField::LoadOne => "system.load.one",
            MetricField::DbLatency => "database.latency_ms",
            MetricField::DbConnections => "database.connections",
            MetricField::CacheKeys => "cache.total_keys",
            MetricField::Requests => "application.requests",
            MetricField::Errors => "application.errors",
            MetricField::AvgResponseTime => "application.avg_response_time",
            MetricField::ErrorRate => "application.error_rate",
        }
    }

    pub fn from_path(path: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.path() == path)
    }

    /// Current value, or `None` when the section is missing or the value
    /// is not defined yet.
    pub fn value(&self, snapshot: &MetricsSnapshot) -> Option<f64> {
        let system = snapshot.system.as_ref();
        let app = &snapshot.application;
        match self {
            MetricField::CpuUsage => system.map(|s| s.cpu.usage),
            MetricField::CpuCores => system.map(|s| s.cpu.cores as f64),
            MetricField::MemoryUsage => system.map(|s| s.memory.usage),
            MetricField::MemoryUsed => system.map(|s| s.memory.used as f64),
            MetricField::DiskUsage => system.map(|s| s.disk.usage),
            MetricField::DiskUsed => system.map(|s| s.disk.used as f64),
            MetricField::NetworkRx => system.map(|s| s.network.rx),
            MetricField::NetworkTx => system.map(|s| s.network.tx),
            MetricField::LoadOne => system.map(|s| s.load.one),
            MetricField::DbLatency => snapshot.database.latency_ms.map(|v| v as f64),
            MetricField::DbConnections => snapshot.database.connections.map(|v| v as f64),
            MetricField::CacheKeys => Some(snapshot.cache.total_keys as f64),
            MetricField::Requests => Some(app.requests as f64),
            MetricField::Errors => Some(app.errors as f64),
            MetricField::AvgResponseTime => app.avg_response_time,
            MetricField::ErrorRate => app.error_rate,
        }
    }

    /// The narrow part of the snapshot this field lives in.
    pub fn excerpt(&self, snapshot: &MetricsSnapshot) -> Value {
        let system = snapshot.system.as_ref();
        match self {
            MetricField::CpuUsage | MetricField::CpuCores => json!({ "cpu": system.map(|s| &s.cpu) }),
            MetricField::MemoryUsage | MetricField::MemoryUsed => json!({ "memory": system.map(|s| &s.memory) }),
            MetricField::DiskUsage | MetricField::DiskUsed => json!({ "disk": system.map(|s| &s.disk) }),
            MetricField::NetworkRx | MetricField::NetworkTx => json!({ "network": system.map(|s| &s.network) }),
            MetricField::LoadOne => json!({ "load": system.map(|s| &s.load) }),
            MetricField::DbLatency | MetricField::DbConnections => json!({ "database": &snapshot.database }),
            MetricField::CacheKeys => json!({ "cache": &snapshot.cache }),
            MetricField::Requests
            | MetricField::Errors
            | MetricField::AvgResponseTime
            | MetricField::ErrorRate => json!({ "application": &snapshot.application }),
        }
    }
}

pub type Predicate = dyn Fn(&MetricsSnapshot) -> Result<bool> + Send + Sync;

/// Named escape hatch for conditions that are not expressible as data.
#[derive(Clone)]
pub struct CustomCondition {
    pub name: String,
    predicate: Arc<Predicate>,
}

impl CustomCondition {
    pub fn new<F>(name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&MetricsSnapshot) -> Result<bool> + Send + Sync + 'static,
    {
        Self { name: name.into(), predicate: Arc::new(predicate) }
    }
}

impl std::fmt::Debug for CustomCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustomCondition").field("name", &self.name).finish()
    }
}

/// When a rule fires.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Condition {
    /// Strictly greater than; an undefined value never fires
    Above { field: MetricField, threshold: f64 },
    /// Strictly less than; an undefined value never fires
    Below { field: MetricField, threshold: f64 },
    DatabaseStatus { status: DbStatus },
    CacheUnreachable,
    #[serde(skip)]
    Custom(CustomCondition),
}

impl Condition {
    pub fn above(field: MetricField, threshold: f64) -> Self {
        Condition::Above { field, threshold }
    }

    pub fn below(field: MetricField, threshold: f64) -> Self {
        Condition::Below { field, threshold }
    }

    pub fn custom<F>(name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&MetricsSnapshot) -> Result<bool> + Send + Sync + 'static,
    {
        Condition::Custom(CustomCondition::new(name, predicate))
    }

    pub fn evaluate(&self, snapshot: &MetricsSnapshot) -> Result<bool> {
        Ok(match self {
            Condition::Above { field, threshold } => field.value(snapshot).is_some_and(|v| v > *threshold),
            Condition::Below { field, threshold } => field.value(snapshot).is_some_and(|v| v < *threshold),
            Condition::DatabaseStatus { status } => snapshot.database.status == *status,
            Condition::CacheUnreachable => !snapshot.cache.reachable,
            Condition::Custom(custom) => (custom.predicate)(snapshot)?,
        })
    }

    pub fn threshold(&self) -> Option<f64> {
        match self {
            Condition::Above { threshold, .. } | Condition::Below { threshold, .. } => Some(*threshold),
            _ => None,
        }
    }

    fn set_threshold(&mut self, value: f64) {
        if let Condition::Above { threshold, .. } | Condition::Below { threshold, .. } = self {
            *threshold = value;
        }
    }

    pub fn excerpt(&self, snapshot: &MetricsSnapshot) -> Value {
        match self {
            Condition::Above { field, .. } | Condition::Below { field, .. } => field.excerpt(snapshot),
            Condition::DatabaseStatus { .. } => json!({ "database": &snapshot.database }),
            Condition::CacheUnreachable => json!({ "cache": &snapshot.cache }),
            Condition::Custom(_) => serde_json::to_value(snapshot).unwrap_or(Value::Null),
        }
    }
}

/// Render a message template against a snapshot.
///
/// `{threshold}` and any metric path (`{system.cpu.usage}`) are substituted,
/// as are `{database.status}`, `{database.error}` and `{cache.status}`.
/// Unknown or undefined placeholders are left untouched.
pub fn render_message(template: &str, snapshot: &MetricsSnapshot, condition: &Condition) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            out.push_str(&rest[open..]);
            return out;
        };

        let name = &after[..close];
        match resolve_placeholder(name, snapshot, condition) {
            Some(value) => out.push_str(&value),
            None => out.push_str(&rest[open..open + close + 2]),
        }
        rest = &after[close + 1..];
    }

    out.push_str(rest);
    out
}

fn resolve_placeholder(name: &str, snapshot: &MetricsSnapshot, condition: &Condition) -> Option<String> {
    match name {
        "threshold" => condition.threshold().map(format_number),
        "database.status" => Some(snapshot.database.status.as_str().to_string()),
        "database.error" => Some(
            snapshot
                .database
                .error
                .clone()
                .unwrap_or_else(|| "unknown error".to_string()),
        ),
        "cache.status" => Some(
            if snapshot.cache.reachable { "connected" } else { "disconnected" }.to_string(),
        ),
        path => MetricField::from_path(path)?.value(snapshot).map(format_number),
    }
}

/// Up to two decimals, trailing zeros dropped (`92.3`, `2500`, `0.05`).
pub fn format_number(value: f64) -> String {
    let s = format!("{:.2}", value);
    s.trim_end_matches('0').trim_end_matches('.').to_string()
}

pub type ChannelSet = SmallVec<[ChannelKind; 3]>;

fn default_severity() -> Severity { Severity::Warning }
fn default_cooldown() -> u64 { 300 }
fn default_channels() -> ChannelSet { smallvec![ChannelKind::Console, ChannelKind::Email] }
fn default_true() -> bool { true }

/// A named condition plus its delivery policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: String,
    pub name: String,
    pub condition: Condition,
    #[serde(default = "default_severity")]
    pub severity: Severity,
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,
    /// Message template, see [`render_message`]. Empty means "<name> triggered".
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub recipients: Vec<String>,
    #[serde(default = "default_channels")]
    pub channels: ChannelSet,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl AlertRule {
    /// New rule with default policy: warning, 300s cooldown, console + email, enabled.
    pub fn new(id: impl Into<String>, name: impl Into<String>, condition: Condition) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            condition,
            severity: default_severity(),
            cooldown_secs: default_cooldown(),
            message: String::new(),
            recipients: Vec::new(),
            channels: default_channels(),
            enabled: true,
        }
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn cooldown(mut self, secs: u64) -> Self {
        self.cooldown_secs = secs;
        self
    }

    pub fn message(mut self, template: impl Into<String>) -> Self {
        self.message = template.into();
        self
    }

    pub fn recipients(mut self, recipients: Vec<String>) -> Self {
        self.recipients = recipients;
        self
    }

    pub fn channels(mut self, channels: &[ChannelKind]) -> Self {
        self.channels = channels.iter().copied().collect();
        self
    }

    pub fn render(&self, snapshot: &MetricsSnapshot) -> String {
        if self.message.is_empty() {
            return format!("{} triggered", self.name);
        }
        render_message(&self.message, snapshot, &self.condition)
    }
}

pub const HIGH_CPU: &str = "high_cpu_usage";
pub const HIGH_MEMORY: &str = "high_memory_usage";
pub const HIGH_DISK: &str = "high_disk_usage";
pub const DATABASE_ERROR: &str = "database_error";
pub const SLOW_RESPONSE: &str = "slow_response_time";
pub const HIGH_ERROR_RATE: &str = "high_error_rate";

/// The rule set registered at startup.
pub fn default_rules(thresholds: &ThresholdConfig, recipients: &[String]) -> Vec<AlertRule> {
    vec![
        AlertRule::new(HIGH_CPU, "High CPU usage", Condition::above(MetricField::CpuUsage, thresholds.cpu_percent))
            .message("CPU usage is {system.cpu.usage}% (threshold {threshold}%)"),
        AlertRule::new(HIGH_MEMORY, "High memory usage", Condition::above(MetricField::MemoryUsage, thresholds.memory_percent))
            .message("Memory usage is {system.memory.usage}% (threshold {threshold}%)"),
        AlertRule::new(HIGH_DISK, "High disk usage", Condition::above(MetricField::DiskUsage, thresholds.disk_percent))
            .severity(Severity::Error)
            .cooldown(600)
            .message("Disk usage is {system.disk.usage}% (threshold {threshold}%)"),
        AlertRule::new(DATABASE_ERROR, "Database unreachable", Condition::DatabaseStatus { status: DbStatus::Error })
            .severity(Severity::Critical)
            .cooldown(60)
            .message("Database connection failed: {database.error}"),
        AlertRule::new(SLOW_RESPONSE, "Slow response time", Condition::above(MetricField::AvgResponseTime, thresholds.response_time_ms))
            .message("Average response time is {application.avg_response_time}ms (threshold {threshold}ms)"),
        AlertRule::new(HIGH_ERROR_RATE, "High error rate", Condition::above(MetricField::ErrorRate, thresholds.error_rate_percent))
            .severity(Severity::Error)
            .cooldown(180)
            .message("Error rate is {application.error_rate}% (threshold {threshold}%)"),
    ]
    .into_iter()
    .map(|rule| rule.recipients(recipients.to_vec()))
    .collect()
}

/// Rewrite the threshold of a default rule; other rules are left alone.
/// Returns whether the rule was a threshold-bearing default.
pub fn apply_threshold(rule: &mut AlertRule, thresholds: &ThresholdConfig) -> bool {
    let value = match rule.id.as_str() {
        HIGH_CPU => thresholds.cpu_percent,
        HIGH_MEMORY => thresholds.memory_percent,
        HIGH_DISK => thresholds.disk_percent,
        SLOW_RESPONSE => thresholds.response_time_ms,
        HIGH_ERROR_RATE => thresholds.error_rate_percent,
        _ => return false,
    };
    rule.condition.set_threshold(value);
    true
}
