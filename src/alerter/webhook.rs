use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;

use super::AlertChannel;
use crate::config::WebhookConfig;
use crate::types::{Alert, ChannelKind, Severity};

/// Custom webhook alert channel
pub struct WebhookChannel {
    url: String,
    headers: HashMap<String, String>,
    severity_filter: Vec<Severity>,
    client: reqwest::Client,
}

impl WebhookChannel {
    pub fn new(config: &WebhookConfig) -> Result<Self> {
        let severity_filter = config
            .severity_filter
            .iter()
            .filter_map(|s| Severity::parse(s))
            .collect();

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;

        Ok(Self {
            url: config.url.clone(),
            headers: config.headers.clone(),
            severity_filter,
            client,
        })
    }

    pub fn payload(alert: &Alert) -> serde_json::Value {
        json!({
            "alertId": &alert.id,
            "ruleName": &alert.rule_name,
            "severity": alert.severity,
            "message": &alert.message,
            "timestamp": alert.timestamp.to_rfc3339(),
            "metrics": &alert.metrics,
        })
    }
}

#[async_trait]
impl AlertChannel for WebhookChannel {
    fn name(&self) -> &str { "webhook" }

    fn kind(&self) -> ChannelKind { ChannelKind::Webhook }

    fn accepts_severity(&self, severity: &Severity) -> bool {
        self.severity_filter.is_empty() || self.severity_filter.contains(severity)
    }

    async fn send(&self, alert: &Alert, _recipients: &[String]) -> Result<()> {
        let mut req = self.client.post(&self.url).json(&Self::payload(alert));
        for (k, v) in &self.headers {
            req = req.header(k, v);
        }

        req.send().await?.error_for_status()?;
        Ok(())
    }
}
