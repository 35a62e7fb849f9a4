use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;

use super::snapshot::ApplicationMetrics;

/// In-process request counters fed by the request layer.
pub struct AppCounters {
    started_at: DateTime<Utc>,
    window: usize,
    inner: Mutex<CounterState>,
}

#[derive(Default)]
struct CounterState {
    requests: u64,
    errors: u64,
    response_times: VecDeque<u64>,
}

impl AppCounters {
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            started_at: Utc::now(),
            window,
            inner: Mutex::new(CounterState {
                response_times: VecDeque::with_capacity(window),
                ..Default::default()
            }),
        }
    }

    /// Record one completed request. Oldest samples are evicted once the
    /// window is full.
    pub fn record_request(&self, response_time_ms: u64, is_error: bool) {
        let mut state = self.inner.lock();
        state.requests += 1;
        if is_error {
            state.errors += 1;
        }
        state.response_times.push_back(response_time_ms);
        while state.response_times.len() > self.window {
            state.response_times.pop_front();
        }
    }

    pub fn snapshot(&self) -> ApplicationMetrics {
        let state = self.inner.lock();
        let now = Utc::now();

        let avg_response_time = if state.response_times.is_empty() {
            None
        } else {
            let sum: u64 = state.response_times.iter().sum();
            Some(sum as f64 / state.response_times.len() as f64)
        };

        ApplicationMetrics {
            start_time: self.started_at,
            uptime_secs: (now - self.started_at).num_seconds().max(0) as u64,
            requests: state.requests,
            errors: state.errors,
            sample_count: state.response_times.len(),
            avg_response_time,
            error_rate: error_rate(state.requests, state.errors),
        }
    }

    /// Most recent samples, oldest first
    pub fn recent_samples(&self) -> Vec<u64> {
        self.inner.lock().response_times.iter().copied().collect()
    }
}

pub fn error_rate(requests: u64, errors: u64) -> Option<f64> {
    (requests > 0).then(|| errors as f64 * 100.0 / requests as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_rate_is_percentage_of_requests() {
        let counters = AppCounters::new(1000);
        for i in 0..200 {
            counters.record_request(100, i < 10);
        }
        let metrics = counters.snapshot();
        assert_eq!(metrics.requests, 200);
        assert_eq!(metrics.errors, 10);
        assert_eq!(metrics.error_rate, Some(5.0));
    }

    #[test]
    fn no_requests_leaves_rates_undefined() {
        let metrics = AppCounters::new(1000).snapshot();
        assert_eq!(metrics.error_rate, None);
        assert_eq!(metrics.avg_response_time, None);
        assert_eq!(error_rate(0, 0), None);
    }

    #[test]
    fn window_evicts_oldest_first() {
        let counters = AppCounters::new(3);
        for ms in [10, 20, 30, 40, 50] {
            counters.record_request(ms, false);
        }
        assert_eq!(counters.recent_samples(), vec![30, 40, 50]);

        let metrics = counters.snapshot();
        assert_eq!(metrics.sample_count, 3);
        assert_eq!(metrics.avg_response_time, Some(40.0));
        // Cumulative counters are not windowed
        assert_eq!(metrics.requests, 5);
    }
}
