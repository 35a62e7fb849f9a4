use anyhow::{Context, Result};
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use super::AlertChannel;
use crate::config::EmailConfig;
use crate::types::{Alert, ChannelKind};

/// SMTP alert channel. Sends one HTML message per recipient.
pub struct EmailChannel {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl EmailChannel {
    pub fn new(config: &EmailConfig) -> Result<Self> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)
            .with_context(|| format!("Invalid SMTP host {}", config.smtp_host))?
            .port(config.smtp_port);

        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        let from = config
            .from
            .parse::<Mailbox>()
            .with_context(|| format!("Invalid from address {}", config.from))?;

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }

    pub fn subject(alert: &Alert) -> String {
        format!("[TrackWatch][{}] {}", alert.severity, alert.rule_name)
    }

    pub fn html_body(alert: &Alert) -> String {
        let metrics = serde_json::to_string_pretty(&alert.metrics).unwrap_or_default();
        format!(
            r#"<div style="font-family: sans-serif">
<h2 style="color: {color}">{icon} {rule}</h2>
<p><strong>Severity:</strong> {severity}</p>
<p><strong>Message:</strong> {message}</p>
<p><strong>Time:</strong> {time}</p>
<p><strong>Alert ID:</strong> {id}</p>
<h3>Metrics</h3>
<pre>{metrics}</pre>
</div>"#,
            color = alert.severity.color(),
            icon = alert.severity.icon(),
            rule = escape_html(&alert.rule_name),
            severity = alert.severity,
            message = escape_html(&alert.message),
            time = alert.timestamp.to_rfc3339(),
            id = alert.id,
            metrics = escape_html(&metrics),
        )
    }
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[async_trait]
impl AlertChannel for EmailChannel {
    fn name(&self) -> &str { "email" }

    fn kind(&self) -> ChannelKind { ChannelKind::Email }

    fn requires_recipients(&self) -> bool { true }

    async fn send(&self, alert: &Alert, recipients: &[String]) -> Result<()> {
        if recipients.is_empty() {
            tracing::debug!(rule_id = %alert.rule_id, "No email recipients, skipping");
            return Ok(());
        }

        let subject = Self::subject(alert);
        let body = Self::html_body(alert);
        let mut failures = 0usize;

        for recipient in recipients {
            let to: Mailbox = match recipient.parse() {
                Ok(to) => to,
                Err(e) => {
                    tracing::warn!(recipient = %recipient, error = %e, "Invalid email recipient");
                    failures += 1;
                    continue;
                }
            };
            let email = match Message::builder()
                .from(self.from.clone())
                .to(to)
                .subject(&subject)
                .header(ContentType::TEXT_HTML)
                .body(body.clone())
            {
                Ok(email) => email,
                Err(e) => {
                    tracing::warn!(recipient = %recipient, error = %e, "Failed to build email");
                    failures += 1;
                    continue;
                }
            };

            if let Err(e) = self.transport.send(email).await {
                tracing::warn!(recipient = %recipient, error = %e, "Email send failed");
                failures += 1;
            }
        }

        if failures > 0 {
            anyhow::bail!("{} of {} email deliveries failed", failures, recipients.len());
        }
        tracing::debug!(alert_id = %alert.id, recipients = recipients.len(), "Email alert sent");
        Ok(())
    }
}
