//! Results output formatting

use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use surge_core::stats::{Lane, MetricsSnapshot};
use surge_core::{CreditLedger, DispatcherStats, RunSummary};

/// Results of a live pipeline run
#[derive(Debug, Clone, Serialize)]
pub struct ExperimentResults {
    pub name: String,
    pub seed: Option<u64>,
    pub duration_secs: f64,
    pub generator: RunSummary,
    pub ingress_total: u64,
    pub ingress_rate: f64,
    pub lanes: Vec<LaneResult>,
    /// Present when the run used a credit gate
    pub gate: Option<CreditLedger>,
    /// Present when the run used the priority dispatcher
    pub dispatcher: Option<DispatcherStats>,
    /// Every metrics window closed during the run
    pub windows: Vec<MetricsSnapshot>,
}

/// Completions and latency of one lane over the whole run
#[derive(Debug, Clone, Serialize)]
pub struct LaneResult {
    pub lane: &'static str,
    pub completed: u64,
    pub throughput: f64,
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub p99_ms: u64,
}

impl ExperimentResults {
    /// Build results from the cumulative state at the end of a run
    ///
    /// `last` must be a snapshot taken after the run; only its cumulative
    /// fields (totals and percentiles) are used.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: String,
        seed: Option<u64>,
        duration: Duration,
        generator: RunSummary,
        last: &MetricsSnapshot,
        gate: Option<CreditLedger>,
        dispatcher: Option<DispatcherStats>,
        windows: Vec<MetricsSnapshot>,
    ) -> Self {
        let duration_secs = duration.as_secs_f64();
        let per_second = |count: u64| {
            if duration_secs > 0.0 {
                count as f64 / duration_secs
            } else {
                0.0
            }
        };

        let lanes = Lane::ALL
            .iter()
            .filter_map(|lane| last.lane(*lane))
            .map(|lane| LaneResult {
                lane: lane.lane,
                completed: lane.completed_total,
                throughput: per_second(lane.completed_total),
                p50_ms: lane.p50_ms,
                p95_ms: lane.p95_ms,
                p99_ms: lane.p99_ms,
            })
            .collect();

        Self {
            name,
            seed,
            duration_secs,
            generator,
            ingress_total: last.ingress_total,
            ingress_rate: per_second(last.ingress_total),
            lanes,
            gate,
            dispatcher,
            windows,
        }
    }

    pub fn completed_total(&self) -> u64 {
        self.lanes.iter().map(|l| l.completed).sum()
    }

    /// Print results to stdout in human-readable format
    pub fn print_human(&self) {
        println!("\n{}", "=".repeat(60));
        println!("Surge Experiment Results");
        println!("{}", "=".repeat(60));
        println!();
        println!("Experiment:");
        println!("  Name:            {}", self.name);
        if let Some(seed) = self.seed {
            println!("  Seed:            {}", seed);
        }
        println!("  Duration:        {:.2}s", self.duration_secs);
        println!();
        println!("Generator:");
        println!("  Candidates:      {}", self.generator.candidates);
        println!("  Batches:         {}", self.generator.accepted_batches);
        println!("  Items:           {}", self.generator.emitted_items);
        println!("  Sink failures:   {}", self.generator.sink_failures);
        println!("  Ingress rate:    {:.2} items/s", self.ingress_rate);
        println!();
        println!("Completions:");
        for lane in &self.lanes {
            println!(
                "  {:<8} {:>8} done, {:>8.2}/s, p50 {} ms, p95 {} ms, p99 {} ms",
                lane.lane, lane.completed, lane.throughput, lane.p50_ms, lane.p95_ms, lane.p99_ms
            );
        }
        if let Some(gate) = &self.gate {
            println!();
            println!("Gate credits:");
            println!("  Granted:         {}", gate.granted);
            println!("  Spent:           {}", gate.spent);
            println!("  Available:       {}", gate.available);
        }
        if let Some(dispatcher) = &self.dispatcher {
            println!();
            println!("Dispatcher:");
            println!("  Ticks:           {}", dispatcher.ticks);
            println!("  Urgent admitted: {}", dispatcher.urgent_admitted);
            println!("  Bulk admitted:   {}", dispatcher.bulk_admitted);
            println!("  Requeued:        {}", dispatcher.requeued);
            println!("  Bulk flips:      {}", dispatcher.transitions);
        }
        println!();
        println!("{}", "=".repeat(60));
    }

    /// Write results to JSON file
    pub fn write_json(&self, path: &Path) -> Result<()> {
        write_json(self, path)
    }
}

/// Outcome of an offline simulation
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub name: String,
    pub seed: Option<u64>,
    pub horizon_secs: f64,
    pub intensity: &'static str,
    pub lambda_max: f64,
    pub candidates: u64,
    pub accepted_batches: u64,
    pub emitted_items: u64,
    /// Integral of the intensity over the horizon
    pub expected_batches: f64,
}

impl SimulationReport {
    /// Accepted batches relative to the expected count (1.0 is a perfect match)
    pub fn accuracy(&self) -> f64 {
        if self.expected_batches > 0.0 {
            self.accepted_batches as f64 / self.expected_batches
        } else {
            0.0
        }
    }

    pub fn print_human(&self) {
        println!("\n{}", "=".repeat(60));
        println!("Surge Simulation");
        println!("{}", "=".repeat(60));
        println!();
        println!("  Profile:         {}", self.name);
        println!("  Horizon:         {:.2}s", self.horizon_secs);
        println!("  Intensity:       {} (bound {:.3}/s)", self.intensity, self.lambda_max);
        println!("  Candidates:      {}", self.candidates);
        println!("  Batches:         {}", self.accepted_batches);
        println!("  Items:           {}", self.emitted_items);
        println!("  Expected:        {:.1} batches", self.expected_batches);
        println!("  Accuracy:        {:.2}%", self.accuracy() * 100.0);
        println!();
        println!("{}", "=".repeat(60));
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        write_json(self, path)
    }
}

fn write_json<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create output directory: {}", parent.display()))?;
    }
    let mut file = File::create(path)
        .with_context(|| format!("Failed to create output file: {}", path.display()))?;
    file.write_all(json.as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use surge_core::stats::PipelineMetrics;

    #[test]
    fn test_results_from_final_snapshot() {
        let metrics = PipelineMetrics::new().unwrap();
        metrics.record_ingress(20);
        for _ in 0..10 {
            metrics.record_completion(Lane::Urgent, Duration::from_millis(3));
        }
        let last = metrics.snapshot_and_reset(Duration::ZERO);

        let results = ExperimentResults::new(
            "unit".to_string(),
            Some(1),
            Duration::from_secs(10),
            RunSummary::default(),
            &last,
            None,
            None,
            Vec::new(),
        );

        assert_eq!(results.ingress_total, 20);
        assert_eq!(results.ingress_rate, 2.0);
        assert_eq!(results.lanes.len(), 1, "Idle lanes are not reported");
        assert_eq!(results.lanes[0].lane, "urgent");
        assert_eq!(results.lanes[0].throughput, 1.0);
        assert_eq!(results.completed_total(), 10);
    }

    #[test]
    fn test_json_serialization() {
        let report = SimulationReport {
            name: "sim".to_string(),
            seed: None,
            horizon_secs: 120.0,
            intensity: "SquareWave",
            lambda_max: 10.0,
            candidates: 1200,
            accepted_batches: 470,
            emitted_items: 470,
            expected_batches: 480.0,
        };

        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"intensity\":\"SquareWave\""));
        assert!(json.contains("\"accepted_batches\":470"));
        assert!((report.accuracy() - 470.0 / 480.0).abs() < 1e-12);
    }

    #[test]
    fn test_write_json_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.json");
        let report = SimulationReport {
            name: "sim".to_string(),
            seed: Some(3),
            horizon_secs: 1.0,
            intensity: "Constant",
            lambda_max: 1.0,
            candidates: 1,
            accepted_batches: 1,
            emitted_items: 1,
            expected_batches: 1.0,
        };
        report.write_json(&path).unwrap();

        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["seed"], 3);
    }
}
