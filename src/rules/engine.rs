use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;

use crate::alerter::Dispatcher;
use crate::cache::CacheLayer;
use crate::collector::MetricsSnapshot;
use crate::config::ThresholdConfig;
use crate::history::AlertHistory;
use crate::types::Alert;
use super::{apply_threshold, AlertRule};

/// Cache key holding a rule's suppression window
pub fn suppression_key(rule_id: &str) -> String {
    format!("alert_suppression:{}", rule_id)
}

/// Evaluates registered rules against snapshots.
///
/// Cooldown is a cache entry per rule whose TTL is the rule's cooldown: if
/// the key exists the rule is suppressed, once it expires the rule may fire
/// again. No timer bookkeeping is kept in process.
pub struct AlertEngine {
    rules: RwLock<Vec<Arc<AlertRule>>>,
    cache: Arc<CacheLayer>,
    dispatcher: Arc<Dispatcher>,
    history: Arc<AlertHistory>,
}

impl AlertEngine {
    pub fn new(cache: Arc<CacheLayer>, dispatcher: Arc<Dispatcher>, history: Arc<AlertHistory>) -> Self {
        Self {
            rules: RwLock::new(Vec::new()),
            cache,
            dispatcher,
            history,
        }
    }

    pub fn with_rules(self, rules: impl IntoIterator<Item = AlertRule>) -> Self {
        for rule in rules {
            self.add_rule(rule);
        }
        self
    }

    /// Register a rule. A rule with the same id is replaced in place.
    pub fn add_rule(&self, rule: AlertRule) {
        let mut rules = self.rules.write();
        tracing::info!(rule_id = %rule.id, severity = %rule.severity, "Registered alert rule");
        match rules.iter_mut().find(|r| r.id == rule.id) {
            Some(existing) => *existing = Arc::new(rule),
            None => rules.push(Arc::new(rule)),
        }
    }

    /// Returns true if the rule existed.
    pub fn remove_rule(&self, id: &str) -> bool {
        let mut rules = self.rules.write();
        let before = rules.len();
        rules.retain(|r| r.id != id);
        rules.len() < before
    }

    pub fn enable_rule(&self, id: &str) -> bool {
        self.update_rule(id, |rule| rule.enabled = true)
    }

    pub fn disable_rule(&self, id: &str) -> bool {
        self.update_rule(id, |rule| rule.enabled = false)
    }

    pub fn set_cooldown(&self, id: &str, secs: u64) -> bool {
        self.update_rule(id, |rule| rule.cooldown_secs = secs)
    }

    fn update_rule(&self, id: &str, f: impl FnOnce(&mut AlertRule)) -> bool {
        let mut rules = self.rules.write();
        match rules.iter_mut().find(|r| r.id == id) {
            Some(rule) => {
                f(Arc::make_mut(rule));
                true
            }
            None => false,
        }
    }

    /// Push new thresholds into the default rules.
    pub fn update_thresholds(&self, thresholds: &ThresholdConfig) {
        let mut rules = self.rules.write();
        for rule in rules.iter_mut() {
            if rule.condition.threshold().is_some() {
                apply_threshold(Arc::make_mut(rule), thresholds);
            }
        }
        tracing::info!(?thresholds, "Alert thresholds updated");
    }

    pub fn rules(&self) -> Vec<AlertRule> {
        self.rules.read().iter().map(|r| (**r).clone()).collect()
    }

    pub fn rule(&self, id: &str) -> Option<AlertRule> {
        self.rules.read().iter().find(|r| r.id == id).map(|r| (**r).clone())
    }

    pub fn rule_count(&self) -> usize {
        self.rules.read().len()
    }

    pub async fn is_suppressed(&self, rule_id: &str) -> bool {
        self.cache.exists(&suppression_key(rule_id)).await
    }

    /// When the rule last fired, if its window is still open
    pub async fn suppressed_since(&self, rule_id: &str) -> Option<DateTime<Utc>> {
        self.cache.get(&suppression_key(rule_id)).await
    }

    /// Evaluate every enabled rule in registration order.
    ///
    /// Each firing rule opens its suppression window, is dispatched to its
    /// channels, and is recorded in history before the next rule runs.
    pub async fn evaluate(&self, snapshot: &MetricsSnapshot) -> Vec<Alert> {
        // Snapshot the registry; the lock is never held across an await
        let rules: Vec<Arc<AlertRule>> = self
            .rules
            .read()
            .iter()
            .filter(|r| r.enabled)
            .cloned()
            .collect();

        let mut fired = Vec::new();
        for rule in rules {
            if self.is_suppressed(&rule.id).await {
                tracing::debug!(rule_id = %rule.id, "Alert suppressed (cooldown)");
                continue;
            }

            match rule.condition.evaluate(snapshot) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    tracing::error!(rule_id = %rule.id, error = %e, "Rule evaluation failed");
                    continue;
                }
            }

            let now = Utc::now();
            let alert = Alert {
                id: Alert::alert_id(&rule.id, now),
                rule_id: rule.id.clone(),
                rule_name: rule.name.clone(),
                severity: rule.severity,
                message: rule.render(snapshot),
                timestamp: now,
                metrics: rule.condition.excerpt(snapshot),
            };

            // A zero cooldown means no suppression window at all.
            if rule.cooldown_secs > 0 {
                self.cache
                    .set(&suppression_key(&rule.id), &now, Some(rule.cooldown_secs))
                    .await;
            }

            tracing::warn!(
                rule_id = %rule.id,
                severity = %rule.severity,
                message = %alert.message,
                "Alert fired"
            );

            let report = self.dispatcher.dispatch(&alert, &rule).await;
            if !report.failed.is_empty() {
                tracing::warn!(alert_id = %alert.id, failed = ?report.failed, "Some channels failed");
            }

            self.history.record(alert.clone()).await;
            fired.push(alert);
        }

        fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerter::tests::{FailingChannel, RecordingChannel};
    use crate::cache::MemoryStore;
    use crate::collector::DbStatus;
    use crate::rules::tests::{empty_snapshot, snapshot_with_cpu};
    use crate::rules::{default_rules, Condition, MetricField, DATABASE_ERROR, HIGH_CPU};
    use crate::types::{ChannelKind, Severity};
    use std::time::Duration;

    struct Harness {
        store: Arc<MemoryStore>,
        engine: AlertEngine,
        history: Arc<AlertHistory>,
        console: Arc<RecordingChannel>,
    }

    fn harness(rules: Vec<AlertRule>) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(CacheLayer::new(store.clone(), "test", 300));
        let console = Arc::new(RecordingChannel::new(ChannelKind::Console));
        let dispatcher = Arc::new(
            Dispatcher::new()
                .with_channel(console.clone())
                .with_channel(Arc::new(FailingChannel(ChannelKind::Email))),
        );
        let history = Arc::new(AlertHistory::new(cache.clone(), 1000));
        let engine = AlertEngine::new(cache, dispatcher, history.clone()).with_rules(rules);
        Harness { store, engine, history, console }
    }

    fn cpu_rule() -> AlertRule {
        default_rules(&ThresholdConfig::default(), &[])
            .into_iter()
            .find(|r| r.id == HIGH_CPU)
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn cpu_rule_fires_once_with_cooldown_window() {
        let h = harness(vec![cpu_rule()]);

        let alerts = h.engine.evaluate(&snapshot_with_cpu(92.3)).await;
        assert_eq!(alerts.len(), 1);
        let alert = &alerts[0];
        assert_eq!(alert.severity, Severity::Warning);
        assert_eq!(alert.rule_id, HIGH_CPU);
        assert!(alert.message.contains("92.3%"), "{}", alert.message);
        assert!(alert.metrics.get("cpu").is_some());
        assert!(alert.metrics.get("memory").is_none());

        assert_eq!(
            h.store.ttl(&format!("test:{}", suppression_key(HIGH_CPU))),
            Some(Duration::from_secs(300))
        );
        assert!(h.engine.is_suppressed(HIGH_CPU).await);
        assert_eq!(h.engine.suppressed_since(HIGH_CPU).await, Some(alert.timestamp));
    }

    #[tokio::test(start_paused = true)]
    async fn cooldown_blocks_refiring_until_window_expires() {
        let h = harness(vec![cpu_rule()]);
        let hot = snapshot_with_cpu(95.0);

        assert_eq!(h.engine.evaluate(&hot).await.len(), 1);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(h.engine.evaluate(&hot).await.is_empty());

        tokio::time::advance(Duration::from_secs(298)).await;
        assert!(h.engine.evaluate(&hot).await.is_empty());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(h.engine.evaluate(&hot).await.len(), 1);
        assert_eq!(h.history.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_cooldown_never_suppresses() {
        let h = harness(vec![cpu_rule().cooldown(0)]);
        let hot = snapshot_with_cpu(95.0);

        assert_eq!(h.engine.evaluate(&hot).await.len(), 1);
        assert_eq!(h.store.ttl(&format!("test:{}", suppression_key(HIGH_CPU))), None);
        assert!(!h.engine.is_suppressed(HIGH_CPU).await);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(h.engine.evaluate(&hot).await.len(), 1);

        h.engine.set_cooldown(HIGH_CPU, 0);
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(h.engine.evaluate(&hot).await.len(), 1);
        assert_eq!(h.console.count(), 3);
    }

    #[tokio::test]
    async fn database_error_fires_critical_with_empty_sections() {
        let h = harness(default_rules(&ThresholdConfig::default(), &[]));
        let mut snapshot = empty_snapshot();
        snapshot.database.status = DbStatus::Error;
        snapshot.database.error = Some("connection refused".into());

        let alerts = h.engine.evaluate(&snapshot).await;
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].rule_id, DATABASE_ERROR);
        assert_eq!(alerts[0].severity, Severity::Critical);
        assert_eq!(alerts[0].message, "Database connection failed: connection refused");
    }

    #[tokio::test]
    async fn failing_predicate_only_skips_its_rule() {
        let broken = AlertRule::new("broken", "Broken", Condition::custom("boom", |_| anyhow::bail!("boom")));
        let h = harness(vec![broken, cpu_rule()]);

        let alerts = h.engine.evaluate(&snapshot_with_cpu(99.0)).await;
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].rule_id, HIGH_CPU);
        assert!(!h.engine.is_suppressed("broken").await);
    }

    #[tokio::test]
    async fn email_failure_does_not_lose_the_alert() {
        let h = harness(vec![cpu_rule()]);
        h.engine.evaluate(&snapshot_with_cpu(99.0)).await;

        assert_eq!(h.console.count(), 1);
        assert_eq!(h.history.len(), 1);
    }

    #[tokio::test]
    async fn disabled_rules_are_skipped() {
        let h = harness(vec![cpu_rule()]);
        assert!(h.engine.disable_rule(HIGH_CPU));
        assert!(h.engine.evaluate(&snapshot_with_cpu(99.0)).await.is_empty());

        assert!(h.engine.enable_rule(HIGH_CPU));
        assert_eq!(h.engine.evaluate(&snapshot_with_cpu(99.0)).await.len(), 1);
    }

    #[tokio::test]
    async fn rules_fire_in_registration_order() {
        let first = AlertRule::new("rps", "Traffic", Condition::above(MetricField::CpuCores, 1.0));
        let h = harness(vec![first, cpu_rule()]);

        let ids: Vec<String> = h
            .engine
            .evaluate(&snapshot_with_cpu(99.0))
            .await
            .into_iter()
            .map(|a| a.rule_id)
            .collect();
        assert_eq!(ids, vec!["rps".to_string(), HIGH_CPU.to_string()]);
    }

    #[test]
    fn registry_add_replace_remove() {
        let h = harness(default_rules(&ThresholdConfig::default(), &[]));
        assert_eq!(h.engine.rule_count(), 6);

        let replacement = cpu_rule().severity(Severity::Critical);
        h.engine.add_rule(replacement);
        assert_eq!(h.engine.rule_count(), 6);
        assert_eq!(h.engine.rules()[0].severity, Severity::Critical);

        assert!(h.engine.remove_rule(HIGH_CPU));
        assert!(!h.engine.remove_rule(HIGH_CPU));
        assert_eq!(h.engine.rule_count(), 5);

        assert!(h.engine.set_cooldown(DATABASE_ERROR, 30));
        assert_eq!(h.engine.rule(DATABASE_ERROR).unwrap().cooldown_secs, 30);
    }

    #[test]
    fn threshold_update_changes_conditions() {
        let h = harness(default_rules(&ThresholdConfig::default(), &[]));
        h.engine.update_thresholds(&ThresholdConfig { cpu_percent: 60.0, ..Default::default() });
        assert_eq!(h.engine.rule(HIGH_CPU).unwrap().condition.threshold(), Some(60.0));
    }
}
