use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::rules::AlertRule;

/// Top-level configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub monitoring: MonitorSettings,
    #[serde(default)]
    pub thresholds: ThresholdConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub alerting: AlertingConfig,
    /// Extra rules registered after the default set
    #[serde(default)]
    pub rules: Vec<AlertRule>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    #[serde(default = "default_hostname")]
    pub hostname: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self { hostname: default_hostname(), log_level: default_log_level() }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default = "default_cache_ttl")]
    pub default_ttl_secs: u64,
    #[serde(default = "default_purge_interval")]
    pub purge_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            default_ttl_secs: 300,
            purge_interval_secs: 60,
        }
    }
}

/// Collection loop settings. Replaceable at runtime through
/// `Monitor::update_config`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct MonitorSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_metrics_ttl")]
    pub metrics_ttl_secs: u64,
    #[serde(default = "default_alerts_ttl")]
    pub alerts_ttl_secs: u64,
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,
    #[serde(default = "default_response_window")]
    pub response_window: usize,
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    #[serde(default = "default_mirror_size")]
    pub history_mirror_size: usize,
    #[serde(default = "default_mirror_ttl")]
    pub history_mirror_ttl_secs: u64,
    #[serde(default = "default_retention_days")]
    pub history_retention_days: u32,
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 60,
            metrics_ttl_secs: 300,
            alerts_ttl_secs: 600,
            probe_timeout_ms: 5000,
            response_window: 1000,
            history_capacity: 1000,
            history_mirror_size: 100,
            history_mirror_ttl_secs: 3600,
            history_retention_days: 7,
            cleanup_interval_secs: 86400,
        }
    }
}

/// Limits used by the default rule set
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ThresholdConfig {
    #[serde(default = "default_cpu")]
    pub cpu_percent: f64,
    #[serde(default = "default_memory")]
    pub memory_percent: f64,
    #[serde(default = "default_disk")]
    pub disk_percent: f64,
    #[serde(default = "default_response_time")]
    pub response_time_ms: f64,
    #[serde(default = "default_error_rate")]
    pub error_rate_percent: f64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            cpu_percent: 80.0,
            memory_percent: 85.0,
            disk_percent: 90.0,
            response_time_ms: 2000.0,
            error_rate_percent: 5.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct DatabaseConfig {
    /// `host:port` probed with a TCP connect; no probe when unset
    pub address: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AlertingConfig {
    /// Recipients attached to the default rules
    #[serde(default)]
    pub recipients: Vec<String>,
    pub email: Option<EmailConfig>,
    pub webhook: Option<WebhookConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmailConfig {
    #[serde(default)]
    pub enabled: bool,
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WebhookConfig {
    #[serde(default)]
    pub enabled: bool,
    pub url: String,
    #[serde(default = "default_webhook_timeout")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub severity_filter: Vec<String>,
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        // Expand environment variables
        let expanded = expand_env_vars(content)?;

        let config: Config = toml::from_str(&expanded)
            .with_context(|| "Failed to parse configuration")?;

        Ok(config)
    }
}

/// Expand ${ENV_VAR} references in config string
fn expand_env_vars(input: &str) -> Result<String> {
    let re = regex::Regex::new(r"\$\{([^}]+)\}")?;
    Ok(re
        .replace_all(input, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_default()
        })
        .to_string())
}

// Default value functions
fn default_hostname() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}
fn default_log_level() -> String { "info".to_string() }
fn default_namespace() -> String { "trackwatch".to_string() }
fn default_cache_ttl() -> u64 { 300 }
fn default_purge_interval() -> u64 { 60 }
fn default_true() -> bool { true }
fn default_interval() -> u64 { 60 }
fn default_metrics_ttl() -> u64 { 300 }
fn default_alerts_ttl() -> u64 { 600 }
fn default_probe_timeout() -> u64 { 5000 }
fn default_response_window() -> usize { 1000 }
fn default_history_capacity() -> usize { 1000 }
fn default_mirror_size() -> usize { 100 }
fn default_mirror_ttl() -> u64 { 3600 }
fn default_retention_days() -> u32 { 7 }
fn default_cleanup_interval() -> u64 { 86400 }
fn default_cpu() -> f64 { 80.0 }
fn default_memory() -> f64 { 85.0 }
fn default_disk() -> f64 { 90.0 }
fn default_response_time() -> f64 { 2000.0 }
fn default_error_rate() -> f64 { 5.0 }
fn default_smtp_port() -> u16 { 587 }
fn default_webhook_timeout() -> u64 { 5000 }

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{Condition, MetricField};
    use crate::types::{ChannelKind, Severity};
    use std::io::Write;

    #[test]
    fn empty_file_yields_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.cache.namespace, "trackwatch");
        assert_eq!(config.monitoring, MonitorSettings::default());
        assert_eq!(config.thresholds, ThresholdConfig::default());
        assert!(config.alerting.email.is_none());
        assert!(config.rules.is_empty());
    }

    #[test]
    fn loads_file_with_env_expansion() {
        std::env::set_var("TRACKWATCH_TEST_SMTP_PASSWORD", "hunter2");
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[agent]
hostname = "web-01"

[monitoring]
interval_secs = 15

[thresholds]
cpu_percent = 70

[database]
address = "127.0.0.1:5432"

[alerting]
recipients = ["ops@example.com"]

[alerting.email]
enabled = true
smtp_host = "smtp.example.com"
username = "alerts"
password = "${{TRACKWATCH_TEST_SMTP_PASSWORD}}"
from = "trackwatch@example.com"

[alerting.webhook]
enabled = true
url = "https://hooks.example.com/alerts"
headers = {{ Authorization = "Bearer abc" }}

[[rules]]
id = "disk_nearly_full"
name = "Disk nearly full"
severity = "critical"
channels = ["webhook"]
condition = {{ kind = "above", field = "system.disk.usage", threshold = 95 }}
"#
        )
        .unwrap();

        let config = Config::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.agent.hostname, "web-01");
        assert_eq!(config.monitoring.interval_secs, 15);
        assert_eq!(config.monitoring.metrics_ttl_secs, 300);
        assert_eq!(config.thresholds.cpu_percent, 70.0);
        assert_eq!(config.thresholds.memory_percent, 85.0);
        assert_eq!(config.database.address.as_deref(), Some("127.0.0.1:5432"));

        let email = config.alerting.email.unwrap();
        assert_eq!(email.password.as_deref(), Some("hunter2"));
        assert_eq!(email.smtp_port, 587);

        let webhook = config.alerting.webhook.unwrap();
        assert_eq!(webhook.timeout_ms, 5000);
        assert_eq!(webhook.headers["Authorization"], "Bearer abc");

        let rule = &config.rules[0];
        assert_eq!(rule.severity, Severity::Critical);
        assert_eq!(rule.cooldown_secs, 300);
        assert_eq!(rule.channels.as_slice(), &[ChannelKind::Webhook]);
        assert!(matches!(
            rule.condition,
            Condition::Above { field: MetricField::DiskUsage, threshold } if threshold == 95.0
        ));
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = Config::load("/nonexistent/trackwatch.toml").unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
