use anyhow::Result;
use async_trait::async_trait;

use super::AlertChannel;
use crate::types::{Alert, ChannelKind, Severity};

/// Writes alerts to the process log. Always registered.
#[derive(Debug, Default)]
pub struct ConsoleChannel;

impl ConsoleChannel {
    pub fn new() -> Self {
        Self
    }

    pub fn format(alert: &Alert) -> String {
        format!(
            "{} [{}] {}: {} (at {}, id {})",
            alert.severity.icon(),
            alert.severity,
            alert.rule_name,
            alert.message,
            alert.timestamp.to_rfc3339(),
            alert.id,
        )
    }
}

#[async_trait]
impl AlertChannel for ConsoleChannel {
    fn name(&self) -> &str { "console" }

    fn kind(&self) -> ChannelKind { ChannelKind::Console }

    async fn send(&self, alert: &Alert, _recipients: &[String]) -> Result<()> {
        let line = Self::format(alert);
        match alert.severity {
            Severity::Info => tracing::info!(rule_id = %alert.rule_id, "{}", line),
            Severity::Warning => tracing::warn!(rule_id = %alert.rule_id, "{}", line),
            Severity::Error | Severity::Critical => {
                tracing::error!(rule_id = %alert.rule_id, "{}", line)
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerter::tests::alert;

    #[test]
    fn line_carries_icon_rule_and_id() {
        let alert = alert(Severity::Critical);
        let line = ConsoleChannel::format(&alert);
        assert!(line.starts_with(Severity::Critical.icon()));
        assert!(line.contains("[CRITICAL] High CPU usage: CPU usage is 92.3%"));
        assert!(line.contains(&alert.id));
    }

    #[tokio::test]
    async fn never_fails() {
        for severity in Severity::ALL {
            assert!(ConsoleChannel::new().send(&alert(severity), &[]).await.is_ok());
        }
    }
}
