//! Wiring of a profile into a running pipeline
//!
//! ```text
//! generator ──► [gate] ──► classifier ──► [dispatcher] ──► consumer
//!     ▲            ▲                                          │
//!     └─ timer     └──────────────── grant(1) ────────────────┘
//! ```
//!
//! Stages in brackets are optional. The consumer sleeps for the configured
//! service time, records the item's end-to-end latency and, when a gate is
//! present, returns one credit.

use crate::config::ProfileConfig;
use crate::output::{ExperimentResults, SimulationReport};
use anyhow::{Context, Result};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use surge_common::{now_millis, Priority, WorkItem};
use surge_core::generator::ThinningProcess;
use surge_core::runtime::Timer;
use surge_core::seed::{components, derive_optional};
use surge_core::stats::{Lane, MetricsReporter, PipelineMetrics};
use surge_core::workload::expected_arrivals;
use surge_core::{
    BackpressureGate, DispatcherHandle, GeneratorContext, PriorityDispatcher,
    StochasticArrivalGenerator, TaskResult,
};
use tracing::{info, warn};

/// Emulated downstream work
#[derive(Clone)]
struct Consumer {
    service_time: Duration,
    metrics: Arc<PipelineMetrics>,
    gate: Option<Arc<BackpressureGate>>,
}

impl Consumer {
    fn process(&self, item: WorkItem) -> TaskResult {
        if !self.service_time.is_zero() {
            thread::sleep(self.service_time);
        }
        let latency = Duration::from_millis(item.age_millis(now_millis()));
        self.metrics.record_completion(Lane::from(item.priority()), latency);
        if let Some(gate) = &self.gate {
            gate.grant(1);
        }
        Ok(())
    }
}

/// Assigns urgent or bulk priority at ingress
struct Classifier {
    urgent_fraction: f64,
    rng: Mutex<SmallRng>,
}

impl Classifier {
    fn new(urgent_fraction: f64, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => SmallRng::seed_from_u64(s),
            None => SmallRng::from_os_rng(),
        };
        Self { urgent_fraction, rng: Mutex::new(rng) }
    }

    fn classify(&self, item: WorkItem) -> WorkItem {
        let urgent = match self.rng.lock() {
            Ok(mut rng) => rng.random_bool(self.urgent_fraction),
            Err(_) => false,
        };
        item.into_lane(if urgent { Priority::Urgent } else { Priority::Bulk })
    }
}

/// Run the profile live and collect its results
pub fn run(config: &ProfileConfig) -> Result<ExperimentResults> {
    let metrics = Arc::new(PipelineMetrics::new()?);
    let timer = Timer::new("surge-timer")?;

    let gate = match &config.gate {
        Some(gate_config) => Some(Arc::new(BackpressureGate::new(gate_config)?)),
        None => None,
    };

    let consumer = Consumer {
        service_time: config.consumer.service_time,
        metrics: metrics.clone(),
        gate: gate.clone(),
    };

    // The dispatcher ticks on its own timer: the generator's timer thread may
    // block on a full lane or a full gate backlog.
    let mut dispatch = None;
    let sink: Arc<dyn surge_core::TaskSink> = match &config.dispatcher {
        Some(section) => {
            let dispatch_timer = Timer::new("surge-dispatch")?;
            let worker = consumer.clone();
            let handle = PriorityDispatcher::new(&section.config, move |item| worker.process(item))?
                .start(&dispatch_timer)?;
            let classifier = Classifier::new(
                section.urgent_fraction,
                derive_optional(config.experiment.seed, components::CLASSIFIER),
            );
            let lanes = handle.clone();
            dispatch = Some((handle, dispatch_timer));
            Arc::new(move |item: WorkItem| -> TaskResult {
                lanes.push(classifier.classify(item))?;
                Ok(())
            })
        }
        None => Arc::new(move |item: WorkItem| -> TaskResult { consumer.process(item) }),
    };

    let context = GeneratorContext {
        timer: timer.clone(),
        sink,
        gate: gate.clone(),
        metrics: Some(metrics.clone()),
    };
    let generator_config = config.generator_config();
    let generator = StochasticArrivalGenerator::new(&generator_config, context)?;
    let reporter = MetricsReporter::start(&timer, metrics.clone(), config.output.metrics_interval)?;

    let started = Instant::now();
    generator.start()?;
    let summary = generator.terminated().recv().context("Generator ended without a summary")?;

    let dispatcher = dispatch.as_ref().map(|(handle, _)| handle);
    wait_for_quiescence(&metrics, gate.as_deref(), dispatcher, generator_config.grace_period);
    let elapsed = started.elapsed();

    reporter.stop();
    let dispatcher_stats = dispatcher.map(DispatcherHandle::stats);
    if let Some((handle, dispatch_timer)) = &dispatch {
        handle.shutdown();
        dispatch_timer.shutdown();
    }
    let ledger = gate.as_ref().map(|gate| {
        gate.shutdown();
        gate.ledger()
    });
    timer.shutdown();

    let last = metrics.snapshot_and_reset(Duration::ZERO);
    info!(
        "Run complete: {} items generated, {} completed",
        last.ingress_total,
        Lane::ALL.iter().map(|lane| metrics.total_completed(*lane)).sum::<u64>()
    );

    Ok(ExperimentResults::new(
        config.experiment.name.clone(),
        config.experiment.seed,
        elapsed,
        summary,
        &last,
        ledger,
        dispatcher_stats,
        reporter.history(),
    ))
}

/// Wait until every generated item has completed, or the grace period ends
fn wait_for_quiescence(
    metrics: &PipelineMetrics,
    gate: Option<&BackpressureGate>,
    dispatcher: Option<&DispatcherHandle>,
    grace_period: Duration,
) {
    let deadline = Instant::now() + grace_period;
    loop {
        let completed: u64 = Lane::ALL.iter().map(|lane| metrics.total_completed(*lane)).sum();
        let outstanding = metrics.total_ingress().saturating_sub(completed);
        if outstanding == 0 {
            return;
        }
        if Instant::now() >= deadline {
            warn!(
                "Grace period over with {} items outstanding (gate backlog {}, urgent {}, bulk {})",
                outstanding,
                gate.map_or(0, BackpressureGate::queue_depth),
                dispatcher.map_or(0, DispatcherHandle::urgent_depth),
                dispatcher.map_or(0, DispatcherHandle::bulk_depth),
            );
            return;
        }
        thread::sleep(Duration::from_millis(10));
    }
}

/// Run the arrival process over virtual time, without timers or consumers
///
/// `horizon` defaults to the experiment duration.
pub fn simulate(config: &ProfileConfig, horizon: Option<Duration>) -> Result<SimulationReport> {
    let horizon = horizon.unwrap_or(config.experiment.duration);
    let mut process = ThinningProcess::from_config(&config.generator_config())?;

    let arrivals = process.simulate(horizon);
    let emitted_items = arrivals.iter().map(|a| a.batch_size as u64).sum();

    let steps = (horizon.as_secs_f64() * 100.0).clamp(1_000.0, 1_000_000.0) as u32;
    let expected_batches = expected_arrivals(process.intensity_mut(), Duration::ZERO, horizon, steps);

    Ok(SimulationReport {
        name: config.experiment.name.clone(),
        seed: config.experiment.seed,
        horizon_secs: horizon.as_secs_f64(),
        intensity: process.intensity_name(),
        lambda_max: process.lambda_max(),
        candidates: process.candidates(),
        accepted_batches: process.accepted(),
        emitted_items,
        expected_batches,
    })
}
