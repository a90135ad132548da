//! Periodic metric windows on the timer

use super::metrics::{MetricsSnapshot, PipelineMetrics};
use crate::runtime::{Timer, TimerHandle};
use crate::Result;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::info;

/// Closes a metrics window every `interval` and logs it
pub struct MetricsReporter {
    handle: TimerHandle,
    history: Arc<Mutex<Vec<MetricsSnapshot>>>,
}

impl MetricsReporter {
    pub fn start(timer: &Timer, metrics: Arc<PipelineMetrics>, interval: Duration) -> Result<Self> {
        let history = Arc::new(Mutex::new(Vec::new()));
        let windows = history.clone();
        let mut last = Instant::now();

        let handle = timer.schedule_at_fixed_rate(Instant::now() + interval, interval, move || {
            let now = Instant::now();
            let snapshot = metrics.snapshot_and_reset(now - last);
            last = now;
            log_snapshot(&snapshot);
            if let Ok(mut windows) = windows.lock() {
                windows.push(snapshot);
            }
        })?;

        Ok(Self { handle, history })
    }

    /// Windows reported so far
    pub fn history(&self) -> Vec<MetricsSnapshot> {
        self.history.lock().map(|h| h.clone()).unwrap_or_default()
    }

    pub fn stop(&self) {
        self.handle.cancel();
    }
}

fn log_snapshot(snapshot: &MetricsSnapshot) {
    info!(
        "ingress {:.1}/s (total {})",
        snapshot.ingress_rate, snapshot.ingress_total
    );
    for lane in &snapshot.lanes {
        info!(
            "  {:>6}: {:.1}/s, avg {:.1}ms, p50 {}ms, p95 {}ms, p99 {}ms (total {})",
            lane.lane,
            lane.throughput,
            lane.window_avg_latency_ms,
            lane.p50_ms,
            lane.p95_ms,
            lane.p99_ms,
            lane.completed_total
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::Lane;

    #[test]
    fn test_reports_windows_until_stopped() {
        let timer = Timer::new("test-timer").unwrap();
        let metrics = Arc::new(PipelineMetrics::new().unwrap());
        let reporter = MetricsReporter::start(&timer, metrics.clone(), Duration::from_millis(20)).unwrap();

        metrics.record_ingress(4);
        metrics.record_completion(Lane::Single, Duration::from_millis(3));
        std::thread::sleep(Duration::from_millis(110));
        reporter.stop();

        let history = reporter.history();
        assert!(history.len() >= 3, "Expected several windows, got {}", history.len());
        let ingress: f64 = history.iter().map(|s| s.ingress_rate * s.window_secs).sum();
        assert!((ingress - 4.0).abs() < 1e-6, "Window ingress should add up to 4, got {}", ingress);
        timer.shutdown();
    }
}
