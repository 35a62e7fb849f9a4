pub mod console;
pub mod email;
pub mod webhook;

use anyhow::Result;
use async_trait::async_trait;
use futures_util::future::join_all;
use futures_util::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use crate::config::AlertingConfig;
use crate::rules::AlertRule;
use crate::types::{Alert, ChannelKind, Severity};

/// Trait for alert delivery channels
#[async_trait]
pub trait AlertChannel: Send + Sync {
    /// Channel name
    fn name(&self) -> &str;

    /// Which rule channel this implementation serves
    fn kind(&self) -> ChannelKind;

    /// Send a single alert
    async fn send(&self, alert: &Alert, recipients: &[String]) -> Result<()>;

    /// Check if this channel accepts the given severity
    fn accepts_severity(&self, _severity: &Severity) -> bool {
        true
    }

    /// Channels that address people (email) have nothing to do without
    /// recipients and are skipped for such rules.
    fn requires_recipients(&self) -> bool {
        false
    }
}

/// Outcome of one [`Dispatcher::dispatch`] call, per channel.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DispatchReport {
    pub delivered: Vec<ChannelKind>,
    pub failed: Vec<ChannelKind>,
    /// Requested by the rule but not configured, filtered by severity, or
    /// needing recipients the rule does not have
    pub skipped: Vec<ChannelKind>,
}

/// Fans an alert out to the rule's channels concurrently.
///
/// Every send is isolated: an error or panic in one channel is logged and
/// the remaining channels still run to completion.
#[derive(Default)]
pub struct Dispatcher {
    channels: HashMap<ChannelKind, Arc<dyn AlertChannel>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the configured channels. Console is always present.
    pub fn from_config(config: &AlertingConfig) -> Result<Self> {
        let mut dispatcher = Self::new().with_channel(Arc::new(console::ConsoleChannel::new()));

        if let Some(ref ec) = config.email {
            if ec.enabled {
                dispatcher = dispatcher.with_channel(Arc::new(email::EmailChannel::new(ec)?));
            }
        }

        if let Some(ref wc) = config.webhook {
            if wc.enabled {
                dispatcher = dispatcher.with_channel(Arc::new(webhook::WebhookChannel::new(wc)?));
            }
        }

        tracing::info!(channels = dispatcher.channels.len(), "Initialized alert channels");
        Ok(dispatcher)
    }

    /// Register a channel, replacing any previous one of the same kind.
    pub fn with_channel(mut self, channel: Arc<dyn AlertChannel>) -> Self {
        self.channels.insert(channel.kind(), channel);
        self
    }

    pub fn has_channel(&self, kind: ChannelKind) -> bool {
        self.channels.contains_key(&kind)
    }

    pub async fn dispatch(&self, alert: &Alert, rule: &AlertRule) -> DispatchReport {
        let mut report = DispatchReport::default();
        let mut sends = Vec::new();

        for kind in &rule.channels {
            if sends.iter().any(|(k, _)| k == kind) || report.skipped.contains(kind) {
                continue;
            }
            match self.channels.get(kind) {
                Some(channel) if channel.requires_recipients() && rule.recipients.is_empty() => {
                    tracing::debug!(channel = %kind, rule_id = %rule.id, "No recipients, channel skipped");
                    report.skipped.push(*kind);
                }
                Some(channel) if channel.accepts_severity(&alert.severity) => {
                    let channel = channel.clone();
                    let recipients = rule.recipients.as_slice();
                    let send = async move {
                        AssertUnwindSafe(channel.send(alert, recipients))
                            .catch_unwind()
                            .await
                    };
                    sends.push((*kind, send));
                }
                Some(_) => {
                    tracing::debug!(channel = %kind, severity = %alert.severity, "Channel filtered by severity");
                    report.skipped.push(*kind);
                }
                None => {
                    tracing::debug!(channel = %kind, rule_id = %rule.id, "Channel not configured");
                    report.skipped.push(*kind);
                }
            }
        }

        let (kinds, futures): (Vec<_>, Vec<_>) = sends.into_iter().unzip();
        let results = join_all(futures).await;

        for (kind, result) in kinds.into_iter().zip(results) {
            match result {
                Ok(Ok(())) => report.delivered.push(kind),
                Ok(Err(e)) => {
                    tracing::error!(channel = %kind, alert_id = %alert.id, error = %e, "Failed to send alert");
                    report.failed.push(kind);
                }
                Err(_) => {
                    tracing::error!(channel = %kind, alert_id = %alert.id, "Alert channel panicked");
                    report.failed.push(kind);
                }
            }
        }

        report
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::Utc;
    use parking_lot::Mutex;
    use std::time::Duration;

    /// Records every alert it is asked to send
    pub(crate) struct RecordingChannel {
        kind: ChannelKind,
        pub sent: Mutex<Vec<(String, Vec<String>)>>,
    }

    impl RecordingChannel {
        pub(crate) fn new(kind: ChannelKind) -> Self {
            Self { kind, sent: Mutex::new(Vec::new()) }
        }

        pub(crate) fn count(&self) -> usize {
            self.sent.lock().len()
        }
    }

    #[async_trait]
    impl AlertChannel for RecordingChannel {
        fn name(&self) -> &str { "recording" }
        fn kind(&self) -> ChannelKind { self.kind }
        async fn send(&self, alert: &Alert, recipients: &[String]) -> Result<()> {
            // Yield so concurrent sends interleave
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.sent.lock().push((alert.id.clone(), recipients.to_vec()));
            Ok(())
        }
    }

    pub(crate) struct FailingChannel(pub ChannelKind);

    #[async_trait]
    impl AlertChannel for FailingChannel {
        fn name(&self) -> &str { "failing" }
        fn kind(&self) -> ChannelKind { self.0 }
        async fn send(&self, _alert: &Alert, _recipients: &[String]) -> Result<()> {
            anyhow::bail!("SMTP relay rejected message")
        }
    }

    struct PanickingChannel;

    #[async_trait]
    impl AlertChannel for PanickingChannel {
        fn name(&self) -> &str { "panicking" }
        fn kind(&self) -> ChannelKind { ChannelKind::Webhook }
        async fn send(&self, _alert: &Alert, _recipients: &[String]) -> Result<()> {
            panic!("channel bug")
        }
    }

    struct CriticalOnly(RecordingChannel);

    #[async_trait]
    impl AlertChannel for CriticalOnly {
        fn name(&self) -> &str { "critical-only" }
        fn kind(&self) -> ChannelKind { self.0.kind }
        async fn send(&self, alert: &Alert, recipients: &[String]) -> Result<()> {
            self.0.send(alert, recipients).await
        }
        fn accepts_severity(&self, severity: &Severity) -> bool {
            *severity == Severity::Critical
        }
    }

    pub(crate) fn alert(severity: Severity) -> Alert {
        let now = Utc::now();
        Alert {
            id: Alert::alert_id("high_cpu_usage", now),
            rule_id: "high_cpu_usage".into(),
            rule_name: "High CPU usage".into(),
            severity,
            message: "CPU usage is 92.3%".into(),
            timestamp: now,
            metrics: serde_json::json!({ "cpu": { "usage": 92.3, "cores": 8 } }),
        }
    }

    fn rule(channels: &[ChannelKind]) -> AlertRule {
        AlertRule::new("high_cpu_usage", "High CPU usage", crate::rules::Condition::CacheUnreachable)
            .channels(channels)
            .recipients(vec!["ops@example.com".into()])
    }

    #[tokio::test]
    async fn one_failing_channel_does_not_block_others() {
        let console = Arc::new(RecordingChannel::new(ChannelKind::Console));
        let webhook = Arc::new(RecordingChannel::new(ChannelKind::Webhook));
        let dispatcher = Dispatcher::new()
            .with_channel(console.clone())
            .with_channel(Arc::new(FailingChannel(ChannelKind::Email)))
            .with_channel(webhook.clone());

        let report = dispatcher
            .dispatch(
                &alert(Severity::Warning),
                &rule(&[ChannelKind::Console, ChannelKind::Email, ChannelKind::Webhook]),
            )
            .await;

        assert_eq!(console.count(), 1);
        assert_eq!(webhook.count(), 1);
        assert_eq!(report.failed, vec![ChannelKind::Email]);
        assert_eq!(report.delivered, vec![ChannelKind::Console, ChannelKind::Webhook]);
        assert_eq!(webhook.sent.lock()[0].1, vec!["ops@example.com".to_string()]);
    }

    #[tokio::test]
    async fn panicking_channel_is_contained() {
        let console = Arc::new(RecordingChannel::new(ChannelKind::Console));
        let dispatcher = Dispatcher::new()
            .with_channel(console.clone())
            .with_channel(Arc::new(PanickingChannel));

        let report = dispatcher
            .dispatch(&alert(Severity::Error), &rule(&[ChannelKind::Webhook, ChannelKind::Console]))
            .await;

        assert_eq!(console.count(), 1);
        assert_eq!(report.failed, vec![ChannelKind::Webhook]);
    }

    #[tokio::test]
    async fn unconfigured_and_filtered_channels_are_skipped() {
        let dispatcher = Dispatcher::new()
            .with_channel(Arc::new(CriticalOnly(RecordingChannel::new(ChannelKind::Console))));

        let report = dispatcher
            .dispatch(&alert(Severity::Warning), &rule(&[ChannelKind::Console, ChannelKind::Email]))
            .await;

        assert!(report.delivered.is_empty());
        assert_eq!(report.skipped, vec![ChannelKind::Console, ChannelKind::Email]);
    }

    #[tokio::test]
    async fn email_without_recipients_is_skipped_not_delivered() {
        let dispatcher = Dispatcher::from_config(&AlertingConfig {
            email: Some(crate::config::EmailConfig {
                enabled: true,
                smtp_host: "localhost".into(),
                smtp_port: 2525,
                username: None,
                password: None,
                from: "trackwatch@example.com".into(),
            }),
            ..Default::default()
        })
        .unwrap();
        assert!(dispatcher.has_channel(ChannelKind::Email));

        let no_recipients = AlertRule::new("high_cpu_usage", "High CPU usage", crate::rules::Condition::CacheUnreachable)
            .channels(&[ChannelKind::Console, ChannelKind::Email]);
        let report = dispatcher.dispatch(&alert(Severity::Warning), &no_recipients).await;

        assert_eq!(report.delivered, vec![ChannelKind::Console]);
        assert_eq!(report.skipped, vec![ChannelKind::Email]);
        assert!(report.failed.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn channels_run_concurrently() {
        let a = Arc::new(RecordingChannel::new(ChannelKind::Console));
        let b = Arc::new(RecordingChannel::new(ChannelKind::Webhook));
        let dispatcher = Dispatcher::new().with_channel(a).with_channel(b);

        let started = tokio::time::Instant::now();
        dispatcher
            .dispatch(&alert(Severity::Info), &rule(&[ChannelKind::Console, ChannelKind::Webhook]))
            .await;
        // Two 10ms sends joined, not chained
        assert!(started.elapsed() < Duration::from_millis(20));
    }

    #[test]
    fn console_is_always_configured() {
        let dispatcher = Dispatcher::from_config(&AlertingConfig::default()).unwrap();
        assert!(dispatcher.has_channel(ChannelKind::Console));
        assert!(!dispatcher.has_channel(ChannelKind::Email));
        assert!(!dispatcher.has_channel(ChannelKind::Webhook));
    }
}
