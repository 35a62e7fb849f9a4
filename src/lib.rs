pub mod alerter;
pub mod cache;
pub mod collector;
pub mod config;
pub mod error;
pub mod history;
pub mod monitor;
pub mod rules;
pub mod scheduler;

/// Common types used across modules
pub mod types {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Serialize};

    /// Alert severity levels
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum Severity {
        Info,
        Warning,
        Error,
        Critical,
    }

    impl Severity {
        pub const ALL: [Severity; 4] = [
            Severity::Info,
            Severity::Warning,
            Severity::Error,
            Severity::Critical,
        ];

        /// Numeric priority, higher is more urgent.
        pub fn priority(&self) -> u8 {
            match self {
                Severity::Info => 1,
                Severity::Warning => 2,
                Severity::Error => 3,
                Severity::Critical => 4,
            }
        }

        pub fn icon(&self) -> &'static str {
            match self {
                Severity::Info => "ℹ️",
                Severity::Warning => "⚠️",
                Severity::Error => "❌",
                Severity::Critical => "🚨",
            }
        }

        pub fn color(&self) -> &'static str {
            match self {
                Severity::Info => "#3498db",
                Severity::Warning => "#f39c12",
                Severity::Error => "#e74c3c",
                Severity::Critical => "#8e44ad",
            }
        }

        pub fn as_str(&self) -> &'static str {
            match self {
                Severity::Info => "info",
                Severity::Warning => "warning",
                Severity::Error => "error",
                Severity::Critical => "critical",
            }
        }

        pub fn parse(s: &str) -> Option<Self> {
            match s.to_ascii_lowercase().as_str() {
                "info" => Some(Severity::Info),
                "warn" | "warning" => Some(Severity::Warning),
                "error" => Some(Severity::Error),
                "critical" => Some(Severity::Critical),
                _ => None,
            }
        }
    }

    impl std::fmt::Display for Severity {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Severity::Info => write!(f, "INFO"),
                Severity::Warning => write!(f, "WARNING"),
                Severity::Error => write!(f, "ERROR"),
                Severity::Critical => write!(f, "CRITICAL"),
            }
        }
    }

    /// Notification delivery mechanism
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum ChannelKind {
        Console,
        Email,
        Webhook,
    }

    impl std::fmt::Display for ChannelKind {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            let s = match self {
                ChannelKind::Console => "console",
                ChannelKind::Email => "email",
                ChannelKind::Webhook => "webhook",
            };
            write!(f, "{}", s)
        }
    }

    /// A fired alert. Immutable once created.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Alert {
        pub id: String,
        pub rule_id: String,
        pub rule_name: String,
        pub severity: Severity,
        pub message: String,
        pub timestamp: DateTime<Utc>,
        /// Snapshot excerpt relevant to the rule that fired
        pub metrics: serde_json::Value,
    }

    impl Alert {
        pub fn alert_id(rule_id: &str, timestamp: DateTime<Utc>) -> String {
            format!("{}_{}", rule_id, timestamp.timestamp_millis())
        }
    }
}
