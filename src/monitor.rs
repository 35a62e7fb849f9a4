use anyhow::Result;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures_util::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::alerter::Dispatcher;
use crate::cache::{CacheLayer, MemoryStore};
use crate::collector::{AppCounters, DbStatus, MetricsCollector, MetricsSnapshot, SysinfoProvider, TcpProbe};
use crate::config::{Config, MonitorSettings, ThresholdConfig};
use crate::history::{AlertHistory, HistoryStats};
use crate::rules::{default_rules, AlertEngine, AlertRule};
use crate::scheduler::{ScheduleHandle, Scheduler, Task, TokioScheduler};
use crate::types::{Alert, Severity};

pub const METRICS_KEY: &str = "monitoring:metrics";
pub const TIMESTAMP_KEY: &str = "monitoring:timestamp";
pub const ALERTS_KEY: &str = "monitoring:alerts";

pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Overall health derived from the latest snapshot and active alerts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub status: HealthStatus,
    pub collected_at: Option<DateTime<Utc>>,
    pub cpu: Option<f64>,
    pub memory: Option<f64>,
    pub disk: Option<f64>,
    pub database: DbStatus,
    pub avg_response_time: Option<f64>,
    pub error_rate: Option<f64>,
    pub active_alerts: usize,
    pub uptime_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorStats {
    #[serde(flatten)]
    pub history: HistoryStats,
    pub rule_count: usize,
    pub collecting: bool,
}

/// The telemetry pipeline as one service object.
///
/// Owns the collector, rule engine and history, and drives them from a
/// [`Scheduler`]: one collection cycle per `interval_secs`, plus history
/// cleanup and cache purge on their own periods.
pub struct Monitor {
    settings: RwLock<MonitorSettings>,
    cache: Arc<CacheLayer>,
    collector: MetricsCollector,
    engine: AlertEngine,
    history: Arc<AlertHistory>,
    scheduler: Arc<dyn Scheduler>,
    purge_interval: Duration,
    latest: RwLock<Option<MetricsSnapshot>>,
    running: AtomicBool,
    cycle: tokio::sync::Mutex<()>,
    schedules: Mutex<Vec<ScheduleHandle>>,
}

impl Monitor {
    pub fn new(
        settings: MonitorSettings,
        cache: Arc<CacheLayer>,
        collector: MetricsCollector,
        engine: AlertEngine,
        history: Arc<AlertHistory>,
    ) -> Self {
        Self {
            settings: RwLock::new(settings),
            cache,
            collector,
            engine,
            history,
            scheduler: Arc::new(TokioScheduler),
            purge_interval: Duration::from_secs(60),
            latest: RwLock::new(None),
            running: AtomicBool::new(false),
            cycle: tokio::sync::Mutex::new(()),
            schedules: Mutex::new(Vec::new()),
        }
    }

    pub fn with_scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn with_purge_interval(mut self, interval: Duration) -> Self {
        self.purge_interval = interval;
        self
    }

    /// Wire up the full pipeline from configuration: in-memory cache store,
    /// sysinfo telemetry, optional TCP database probe, configured channels,
    /// the default rule set followed by any `[[rules]]` entries.
    pub fn from_config(config: &Config) -> Result<Arc<Self>> {
        let settings = config.monitoring.clone();
        let cache = Arc::new(CacheLayer::new(
            Arc::new(MemoryStore::new()),
            config.cache.namespace.clone(),
            config.cache.default_ttl_secs,
        ));

        let counters = Arc::new(AppCounters::new(settings.response_window));
        let mut collector = MetricsCollector::new(Arc::new(SysinfoProvider::new()), cache.clone(), counters)
            .with_probe_timeout(Duration::from_millis(settings.probe_timeout_ms));
        if let Some(ref address) = config.database.address {
            collector = collector.with_database(Arc::new(TcpProbe::new(address.clone())));
        }

        let dispatcher = Arc::new(Dispatcher::from_config(&config.alerting)?);
        let history = Arc::new(
            AlertHistory::new(cache.clone(), settings.history_capacity)
                .with_mirror(settings.history_mirror_size, settings.history_mirror_ttl_secs)
                .with_retention_days(settings.history_retention_days),
        );
        let engine = AlertEngine::new(cache.clone(), dispatcher, history.clone())
            .with_rules(default_rules(&config.thresholds, &config.alerting.recipients))
            .with_rules(config.rules.iter().cloned());

        Ok(Arc::new(
            Self::new(settings, cache, collector, engine, history)
                .with_purge_interval(Duration::from_secs(config.cache.purge_interval_secs.max(1))),
        ))
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn settings(&self) -> MonitorSettings {
        self.settings.read().clone()
    }

    pub fn engine(&self) -> &AlertEngine {
        &self.engine
    }

    pub fn cache(&self) -> &Arc<CacheLayer> {
        &self.cache
    }

    /// Run one cycle now, then keep collecting on the configured interval.
    /// Calling this while already running does nothing.
    pub async fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::debug!("Monitor already running");
            return;
        }

        let interval = self.settings.read().interval_secs;
        tracing::info!(interval_secs = interval, rules = self.engine.rule_count(), "Starting monitor");

        if AssertUnwindSafe(self.run_cycle()).catch_unwind().await.is_err() {
            tracing::error!("Initial collection cycle panicked");
        }
        self.schedule_all();
    }

    /// Stop scheduling. A cycle already in flight runs to completion.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.cancel_schedules();
        tracing::info!("Monitor stopped");
    }

    /// Collect, publish and evaluate once. Cycles are serialized.
    pub async fn run_cycle(&self) -> MetricsSnapshot {
        let _guard = self.cycle.lock().await;
        let settings = self.settings.read().clone();
        let started = tokio::time::Instant::now();

        let snapshot = self.collector.collect().await;

        self.cache
            .set(METRICS_KEY, &snapshot, Some(settings.metrics_ttl_secs))
            .await;
        self.cache
            .set(TIMESTAMP_KEY, &snapshot.timestamp, Some(settings.metrics_ttl_secs))
            .await;
        *self.latest.write() = Some(snapshot.clone());

        let alerts = self.engine.evaluate(&snapshot).await;
        if !alerts.is_empty() {
            self.publish_alerts(alerts, settings.alerts_ttl_secs).await;
        }

        tracing::debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            db = snapshot.database.status.as_str(),
            "Collection cycle complete"
        );
        snapshot
    }

    /// Prepend this cycle's alerts to the cached active list, keeping only
    /// the last hour.
    async fn publish_alerts(&self, alerts: Vec<Alert>, ttl_secs: u64) {
        let cutoff = Utc::now() - ChronoDuration::hours(1);
        let previous: Vec<Alert> = self.cache.get(ALERTS_KEY).await.unwrap_or_default();
        let active: Vec<Alert> = alerts
            .into_iter()
            .chain(previous)
            .filter(|a| a.timestamp >= cutoff)
            .collect();
        self.cache.set(ALERTS_KEY, &active, Some(ttl_secs)).await;
    }

    /// Install the periodic tasks unless the monitor was stopped meanwhile
    /// or another `start` already installed them.
    fn schedule_all(self: &Arc<Self>) {
        let mut schedules = self.schedules.lock();
        if !self.is_running() {
            tracing::debug!("Monitor stopped before scheduling");
            return;
        }
        if schedules.is_empty() {
            *schedules = self.build_schedules();
        }
    }

    fn reschedule(self: &Arc<Self>) {
        let mut schedules = self.schedules.lock();
        if !self.is_running() {
            return;
        }
        for handle in schedules.drain(..) {
            handle.cancel();
        }
        *schedules = self.build_schedules();
    }

    fn build_schedules(self: &Arc<Self>) -> Vec<ScheduleHandle> {
        let settings = self.settings.read().clone();
        let weak = Arc::downgrade(self);

        let collect = task(&weak, |monitor| async move {
            monitor.run_cycle().await;
        });
        let cleanup = task(&weak, |monitor| async move {
            monitor.history.cleanup_expired(Utc::now());
        });
        let purge = task(&weak, |monitor| async move {
            let purged = monitor.cache.purge_expired().await;
            if purged > 0 {
                tracing::debug!(purged, "Purged expired cache entries");
            }
        });

        vec![
            self.scheduler
                .schedule("collect", Duration::from_secs(settings.interval_secs.max(1)), collect),
            self.scheduler
                .schedule("history-cleanup", Duration::from_secs(settings.cleanup_interval_secs.max(1)), cleanup),
            self.scheduler.schedule("cache-purge", self.purge_interval, purge),
        ]
    }

    fn cancel_schedules(&self) {
        for handle in self.schedules.lock().drain(..) {
            handle.cancel();
        }
    }

    pub fn record_request(&self, response_time_ms: u64, is_error: bool) {
        self.collector.record_request(response_time_ms, is_error);
    }

    /// Latest snapshot, from memory or, failing that, from the cache
    pub async fn get_metrics(&self) -> Option<MetricsSnapshot> {
        let latest = self.latest.read().clone();
        match latest {
            Some(snapshot) => Some(snapshot),
            None => self.cache.get(METRICS_KEY).await,
        }
    }

    pub async fn get_summary(&self) -> Summary {
        let snapshot = self.get_metrics().await;
        let active = self.get_active_alerts().await;

        let database = snapshot.as_ref().map(|s| s.database.status).unwrap_or_default();
        let status = if database == DbStatus::Error || active.iter().any(|a| a.severity == Severity::Critical) {
            HealthStatus::Critical
        } else if !active.is_empty() {
            HealthStatus::Warning
        } else {
            HealthStatus::Healthy
        };

        let system = snapshot.as_ref().and_then(|s| s.system.as_ref());
        let app = snapshot.as_ref().map(|s| &s.application);
        Summary {
            status,
            collected_at: snapshot.as_ref().map(|s| s.timestamp),
            cpu: system.map(|s| s.cpu.usage),
            memory: system.map(|s| s.memory.usage),
            disk: system.map(|s| s.disk.usage),
            database,
            avg_response_time: app.and_then(|a| a.avg_response_time),
            error_rate: app.and_then(|a| a.error_rate),
            active_alerts: active.len(),
            uptime_secs: app.map(|a| a.uptime_secs).unwrap_or(0),
        }
    }

    pub fn get_alert_history(&self, limit: Option<usize>) -> Vec<Alert> {
        self.history.recent(limit.unwrap_or(DEFAULT_HISTORY_LIMIT))
    }

    /// Alerts from the cached active list fired within the last hour
    pub async fn get_active_alerts(&self) -> Vec<Alert> {
        let cutoff = Utc::now() - ChronoDuration::hours(1);
        let alerts: Vec<Alert> = self.cache.get(ALERTS_KEY).await.unwrap_or_default();
        alerts.into_iter().filter(|a| a.timestamp >= cutoff).collect()
    }

    pub fn get_stats(&self) -> MonitorStats {
        MonitorStats {
            history: self.history.stats(Utc::now()),
            rule_count: self.engine.rule_count(),
            collecting: self.is_running(),
        }
    }

    pub fn add_rule(&self, rule: AlertRule) {
        self.engine.add_rule(rule);
    }

    pub fn remove_rule(&self, id: &str) -> bool {
        self.engine.remove_rule(id)
    }

    pub fn enable_rule(&self, id: &str) -> bool {
        self.engine.enable_rule(id)
    }

    pub fn disable_rule(&self, id: &str) -> bool {
        self.engine.disable_rule(id)
    }

    pub fn update_thresholds(&self, thresholds: &ThresholdConfig) {
        self.engine.update_thresholds(thresholds);
    }

    /// Replace the loop settings. Running schedules are restarted when a
    /// period changed. History and window sizes apply from the next restart
    /// of the process.
    pub fn update_config(self: &Arc<Self>, settings: MonitorSettings) {
        let period_changed = {
            let mut current = self.settings.write();
            let changed = current.interval_secs != settings.interval_secs
                || current.cleanup_interval_secs != settings.cleanup_interval_secs;
            *current = settings;
            changed
        };

        if period_changed && self.is_running() {
            tracing::info!(interval_secs = self.settings.read().interval_secs, "Rescheduling monitor");
            self.reschedule();
        }
    }
}

fn task<F, Fut>(monitor: &Weak<Monitor>, body: F) -> Task
where
    F: Fn(Arc<Monitor>) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let monitor = monitor.clone();
    let body = Arc::new(body);
    Arc::new(move || {
        let monitor = monitor.clone();
        let body = body.clone();
        async move {
            if let Some(monitor) = monitor.upgrade() {
                body(monitor).await;
            }
        }
        .boxed()
    })
}
