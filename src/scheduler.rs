use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Shortest period a task can run on.
pub const MIN_PERIOD: Duration = Duration::from_millis(1);

/// A repeatable unit of work. Called once per tick.
pub type Task = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Runs tasks on a fixed period until cancelled.
pub trait Scheduler: Send + Sync {
    /// First run happens one `period` after scheduling. A zero period is
    /// treated as [`MIN_PERIOD`].
    fn schedule(&self, name: &str, period: Duration, task: Task) -> ScheduleHandle;
}

/// Cancels a scheduled task. Dropping the handle cancels it too.
pub struct ScheduleHandle {
    name: String,
    stop: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl ScheduleHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stop scheduling new runs. A run already in progress completes.
    pub fn cancel(&self) {
        let _ = self.stop.send(true);
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

/// [`Scheduler`] backed by `tokio::time::interval`.
///
/// Each run is awaited before the next tick is taken, so runs of the same
/// task never overlap; a slow run pushes the following ticks back.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn schedule(&self, name: &str, period: Duration, task: Task) -> ScheduleHandle {
        let period = period.max(MIN_PERIOD);
        let (stop, mut stop_rx) = watch::channel(false);
        let task_name = name.to_string();

        let join = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                        continue;
                    }
                }

                if AssertUnwindSafe(task()).catch_unwind().await.is_err() {
                    tracing::error!(task = %task_name, "Scheduled task panicked");
                }

                if *stop_rx.borrow() {
                    break;
                }
            }

            tracing::debug!(task = %task_name, "Schedule stopped");
        });

        tracing::debug!(task = %name, period_secs = period.as_secs_f64(), "Scheduled task");
        ScheduleHandle {
            name: name.to_string(),
            stop,
            join,
        }
    }
}
