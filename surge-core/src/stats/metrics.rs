//! Pipeline metrics collector
//!
//! An explicitly owned collector shared by `Arc` with every component that
//! records into it. Counters are atomics; latency histograms sit behind a
//! short-lived `Mutex` per lane. Window counters are swapped to zero by
//! `snapshot_and_reset`, histograms stay cumulative.

use crate::{Error, Result};
use hdrhistogram::Histogram;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use surge_common::Priority;
use tracing::warn;

/// Lane an item completed on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lane {
    Urgent,
    Bulk,
    /// Pipelines without priority classification
    Single,
}

impl Lane {
    pub const ALL: [Lane; 3] = [Lane::Urgent, Lane::Bulk, Lane::Single];

    pub fn as_str(&self) -> &'static str {
        match self {
            Lane::Urgent => "urgent",
            Lane::Bulk => "bulk",
            Lane::Single => "single",
        }
    }

    fn index(&self) -> usize {
        match self {
            Lane::Urgent => 0,
            Lane::Bulk => 1,
            Lane::Single => 2,
        }
    }
}

impl From<Option<Priority>> for Lane {
    fn from(priority: Option<Priority>) -> Self {
        match priority {
            Some(Priority::Urgent) => Lane::Urgent,
            Some(Priority::Bulk) => Lane::Bulk,
            None => Lane::Single,
        }
    }
}

struct LaneMetrics {
    window_completed: AtomicU64,
    window_latency_sum_ms: AtomicU64,
    total_completed: AtomicU64,
    /// Cumulative end-to-end latency in milliseconds
    latency_ms: Mutex<Histogram<u64>>,
}

impl LaneMetrics {
    fn new() -> Result<Self> {
        let histogram = Histogram::<u64>::new(3)
            .map_err(|e| Error::Other(format!("Failed to create latency histogram: {e}")))?;
        Ok(Self {
            window_completed: AtomicU64::new(0),
            window_latency_sum_ms: AtomicU64::new(0),
            total_completed: AtomicU64::new(0),
            latency_ms: Mutex::new(histogram),
        })
    }
}

/// Per-lane view in a snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LaneSnapshot {
    pub lane: &'static str,
    /// Completions per second over the window
    pub throughput: f64,
    /// Mean latency of completions in the window (0 when there were none)
    pub window_avg_latency_ms: f64,
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub p99_ms: u64,
    pub completed_total: u64,
}

/// Metrics for one reporting window
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub window_secs: f64,
    /// Items generated or received per second over the window
    pub ingress_rate: f64,
    pub ingress_total: u64,
    pub lanes: Vec<LaneSnapshot>,
}

impl MetricsSnapshot {
    pub fn lane(&self, lane: Lane) -> Option<&LaneSnapshot> {
        self.lanes.iter().find(|s| s.lane == lane.as_str())
    }
}

pub struct PipelineMetrics {
    window_ingress: AtomicU64,
    total_ingress: AtomicU64,
    lanes: [LaneMetrics; 3],
}

impl PipelineMetrics {
    pub fn new() -> Result<Self> {
        Ok(Self {
            window_ingress: AtomicU64::new(0),
            total_ingress: AtomicU64::new(0),
            lanes: [LaneMetrics::new()?, LaneMetrics::new()?, LaneMetrics::new()?],
        })
    }

    /// Count `n` items entering the pipeline
    pub fn record_ingress(&self, n: u64) {
        self.window_ingress.fetch_add(n, Ordering::Relaxed);
        self.total_ingress.fetch_add(n, Ordering::Relaxed);
    }

    /// Count one completion with its end-to-end latency
    pub fn record_completion(&self, lane: Lane, latency: Duration) {
        let metrics = &self.lanes[lane.index()];
        let latency_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        metrics.window_completed.fetch_add(1, Ordering::Relaxed);
        metrics.window_latency_sum_ms.fetch_add(latency_ms, Ordering::Relaxed);
        metrics.total_completed.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut histogram) = metrics.latency_ms.lock() {
            if let Err(e) = histogram.record(latency_ms) {
                warn!("{} latency {} ms not recorded: {}", lane.as_str(), latency_ms, e);
            }
        }
    }

    pub fn total_ingress(&self) -> u64 {
        self.total_ingress.load(Ordering::Relaxed)
    }

    pub fn total_completed(&self, lane: Lane) -> u64 {
        self.lanes[lane.index()].total_completed.load(Ordering::Relaxed)
    }

    /// Read and zero the window counters
    ///
    /// `window` is the length of the window being closed and is used to turn
    /// counts into rates. Lanes that never completed anything are omitted.
    pub fn snapshot_and_reset(&self, window: Duration) -> MetricsSnapshot {
        let secs = window.as_secs_f64();
        let per_second = |count: u64| if secs > 0.0 { count as f64 / secs } else { 0.0 };

        let ingress = self.window_ingress.swap(0, Ordering::Relaxed);
        let lanes = Lane::ALL
            .iter()
            .filter_map(|lane| {
                let metrics = &self.lanes[lane.index()];
                let completed = metrics.window_completed.swap(0, Ordering::Relaxed);
                let latency_sum = metrics.window_latency_sum_ms.swap(0, Ordering::Relaxed);
                let total = metrics.total_completed.load(Ordering::Relaxed);
                if total == 0 {
                    return None;
                }

                let (p50, p95, p99) = match metrics.latency_ms.lock() {
                    Ok(h) => (h.value_at_quantile(0.50), h.value_at_quantile(0.95), h.value_at_quantile(0.99)),
                    Err(_) => (0, 0, 0),
                };

                Some(LaneSnapshot {
                    lane: lane.as_str(),
                    throughput: per_second(completed),
                    window_avg_latency_ms: if completed > 0 {
                        latency_sum as f64 / completed as f64
                    } else {
                        0.0
                    },
                    p50_ms: p50,
                    p95_ms: p95,
                    p99_ms: p99,
                    completed_total: total,
                })
            })
            .collect();

        MetricsSnapshot {
            window_secs: secs,
            ingress_rate: per_second(ingress),
            ingress_total: self.total_ingress(),
            lanes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_counters_reset() {
        let metrics = PipelineMetrics::new().unwrap();
        metrics.record_ingress(10);
        metrics.record_completion(Lane::Urgent, Duration::from_millis(4));
        metrics.record_completion(Lane::Urgent, Duration::from_millis(6));

        let first = metrics.snapshot_and_reset(Duration::from_secs(2));
        assert_eq!(first.ingress_rate, 5.0);
        let urgent = first.lane(Lane::Urgent).unwrap();
        assert_eq!(urgent.throughput, 1.0);
        assert_eq!(urgent.window_avg_latency_ms, 5.0);
        assert!(first.lane(Lane::Bulk).is_none(), "Idle lanes are omitted");

        let second = metrics.snapshot_and_reset(Duration::from_secs(2));
        assert_eq!(second.ingress_rate, 0.0);
        let urgent = second.lane(Lane::Urgent).unwrap();
        assert_eq!(urgent.throughput, 0.0);
        assert_eq!(urgent.window_avg_latency_ms, 0.0);
        // Totals and percentiles are cumulative
        assert_eq!(urgent.completed_total, 2);
        assert_eq!(second.ingress_total, 10);
        assert!(urgent.p99_ms >= 5);
    }

    #[test]
    fn test_percentiles() {
        let metrics = PipelineMetrics::new().unwrap();
        for ms in 1..=100 {
            metrics.record_completion(Lane::Bulk, Duration::from_millis(ms));
        }
        let snapshot = metrics.snapshot_and_reset(Duration::from_secs(1));
        let bulk = snapshot.lane(Lane::Bulk).unwrap();
        assert!((49..=51).contains(&bulk.p50_ms), "p50 was {}", bulk.p50_ms);
        assert!((94..=96).contains(&bulk.p95_ms), "p95 was {}", bulk.p95_ms);
        assert!((98..=100).contains(&bulk.p99_ms), "p99 was {}", bulk.p99_ms);
        assert_eq!(bulk.throughput, 100.0);
    }

    #[test]
    fn test_lane_from_priority() {
        assert_eq!(Lane::from(Some(Priority::Urgent)), Lane::Urgent);
        assert_eq!(Lane::from(Some(Priority::Bulk)), Lane::Bulk);
        assert_eq!(Lane::from(None), Lane::Single);
    }

    #[test]
    fn test_unrecordable_latency_still_counts_completion() {
        let metrics = PipelineMetrics::new().unwrap();
        metrics.record_completion(Lane::Bulk, Duration::MAX);
        metrics.record_completion(Lane::Bulk, Duration::from_millis(7));

        assert_eq!(metrics.total_completed(Lane::Bulk), 2);
        let snapshot = metrics.snapshot_and_reset(Duration::from_secs(1));
        let bulk = snapshot.lane(Lane::Bulk).unwrap();
        assert_eq!(bulk.completed_total, 2);
        assert!(bulk.p50_ms >= 7, "p50 was {}", bulk.p50_ms);
    }

    #[test]
    fn test_zero_window_yields_zero_rates() {
        let metrics = PipelineMetrics::new().unwrap();
        metrics.record_ingress(3);
        let snapshot = metrics.snapshot_and_reset(Duration::ZERO);
        assert_eq!(snapshot.ingress_rate, 0.0);
    }
}
