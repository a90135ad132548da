//! Stochastic arrival generator
//!
//! Drives a [`ThinningProcess`] on the [`Timer`]: each candidate is a timer job
//! that evaluates acceptance, emits the accepted batch, and schedules the next
//! candidate from its own candidate time. The thinning state moves from job to
//! job, so the loop needs no lock and no polling.
//!
//! Lifecycle: `NotStarted -> Running -> Stopped`. `start` and `stop` are
//! one-shot; a stopped generator cannot be restarted.

pub mod sink;
pub mod thinning;

pub use sink::TaskSink;
pub use thinning::{Arrival, ThinningProcess};

use crate::config::GeneratorConfig;
use crate::gate::BackpressureGate;
use crate::runtime::{Timer, TimerHandle};
use crate::stats::PipelineMetrics;
use crate::Result;
use crossbeam_channel::{bounded, Receiver, Sender};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread;
use std::time::{Duration, Instant};
use surge_common::WorkItem;
use tracing::{debug, error, info, warn};

const NOT_STARTED: u8 = 0;
const RUNNING: u8 = 1;
const STOPPED: u8 = 2;

/// Counters describing one generator run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Candidates evaluated
    pub candidates: u64,
    /// Candidates accepted (one batch each)
    pub accepted_batches: u64,
    /// Items emitted to the sink or the gate
    pub emitted_items: u64,
    /// Items whose sink call returned an error or panicked
    pub sink_failures: u64,
    /// Spread emissions still scheduled when the summary was taken
    pub pending_emissions: u64,
}

#[derive(Default)]
struct RunCounters {
    candidates: AtomicU64,
    accepted_batches: AtomicU64,
    emitted_items: AtomicU64,
    sink_failures: AtomicU64,
    pending_emissions: AtomicU64,
}

/// Collaborators a generator emits through
pub struct GeneratorContext {
    pub timer: Timer,
    pub sink: Arc<dyn TaskSink>,
    /// Route every emission through this gate's `enqueue`
    pub gate: Option<Arc<BackpressureGate>>,
    /// Count emissions as pipeline ingress
    pub metrics: Option<Arc<PipelineMetrics>>,
}

impl GeneratorContext {
    pub fn new(timer: Timer, sink: impl TaskSink) -> Self {
        Self { timer, sink: Arc::new(sink), gate: None, metrics: None }
    }
}

struct Inner {
    state: AtomicU8,
    process: Mutex<Option<ThinningProcess>>,
    timer: Timer,
    sink: Arc<dyn TaskSink>,
    gate: Option<Arc<BackpressureGate>>,
    metrics: Option<Arc<PipelineMetrics>>,
    run_duration: Option<Duration>,
    grace_period: Duration,
    counters: Arc<RunCounters>,
    auto_stop: Mutex<Option<TimerHandle>>,
    terminated_tx: Sender<RunSummary>,
    terminated_rx: Receiver<RunSummary>,
}

pub struct StochasticArrivalGenerator {
    inner: Arc<Inner>,
}

impl StochasticArrivalGenerator {
    /// Build a generator from its configuration
    ///
    /// Fails before anything is scheduled if the configuration is invalid.
    pub fn new(config: &GeneratorConfig, context: GeneratorContext) -> Result<Self> {
        let process = ThinningProcess::from_config(config)?;
        Ok(Self::from_process(process, config, context))
    }

    /// Build a generator around an existing thinning process
    ///
    /// Only the timing fields of `config` (`run_duration`, `grace_period`) are
    /// used; the intensity and batch sampler come from `process`.
    pub fn from_process(
        process: ThinningProcess,
        config: &GeneratorConfig,
        context: GeneratorContext,
    ) -> Self {
        info!(
            "Generator initialised: lambda_max={:.3}/s, spread={:?}, batches={}, intensity={}, gate={}",
            process.lambda_max(),
            process.intra_batch_spread(),
            process.batch_sampler_name(),
            process.intensity_name(),
            context.gate.is_some()
        );

        let (terminated_tx, terminated_rx) = bounded(1);
        Self {
            inner: Arc::new(Inner {
                state: AtomicU8::new(NOT_STARTED),
                process: Mutex::new(Some(process)),
                timer: context.timer,
                sink: context.sink,
                gate: context.gate,
                metrics: context.metrics,
                run_duration: config.run_duration,
                grace_period: config.grace_period,
                counters: Arc::new(RunCounters::default()),
                auto_stop: Mutex::new(None),
                terminated_tx,
                terminated_rx,
            }),
        }
    }

    /// Start producing arrivals for the configured run duration
    pub fn start(&self) -> Result<()> {
        self.start_for(self.inner.run_duration)
    }

    /// Start producing arrivals for at most `duration` (unbounded if `None`)
    ///
    /// Only the first call has an effect.
    pub fn start_for(&self, duration: Option<Duration>) -> Result<()> {
        if self
            .inner
            .state
            .compare_exchange(NOT_STARTED, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Generator start ignored: already started");
            return Ok(());
        }

        let Some(process) = self.inner.process.lock().ok().and_then(|mut p| p.take()) else {
            return Ok(());
        };

        let epoch = Instant::now();
        info!("Generator started for {}", describe(duration));

        if let Some(duration) = duration {
            let weak = Arc::downgrade(&self.inner);
            let handle = self.inner.timer.schedule_at(epoch + duration, move || {
                if let Some(inner) = weak.upgrade() {
                    stop_inner(&inner);
                }
            })?;
            if let Ok(mut auto_stop) = self.inner.auto_stop.lock() {
                *auto_stop = Some(handle);
            }
        }

        schedule_candidate(self.inner.clone(), process, epoch, Duration::ZERO);
        Ok(())
    }

    /// Stop scheduling candidates; already-accepted emissions drain within the grace period
    ///
    /// Idempotent, and a no-op unless the generator is running.
    pub fn stop(&self) {
        stop_inner(&self.inner);
    }

    pub fn is_running(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) == RUNNING
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) == STOPPED
    }

    /// Receives the final summary once the generator has fully terminated
    ///
    /// Termination happens after `stop()`, when every spread emission has
    /// fired or the grace period has elapsed, whichever comes first.
    pub fn terminated(&self) -> Receiver<RunSummary> {
        self.inner.terminated_rx.clone()
    }

    pub fn summary(&self) -> RunSummary {
        summarize(&self.inner.counters)
    }
}

fn describe(duration: Option<Duration>) -> String {
    match duration {
        Some(d) => format!("{:?}", d),
        None => "an unbounded duration".to_string(),
    }
}

fn summarize(counters: &RunCounters) -> RunSummary {
    RunSummary {
        candidates: counters.candidates.load(Ordering::Acquire),
        accepted_batches: counters.accepted_batches.load(Ordering::Acquire),
        emitted_items: counters.emitted_items.load(Ordering::Acquire),
        sink_failures: counters.sink_failures.load(Ordering::Acquire),
        pending_emissions: counters.pending_emissions.load(Ordering::Acquire),
    }
}

fn schedule_candidate(inner: Arc<Inner>, mut process: ThinningProcess, epoch: Instant, from: Duration) {
    let at = process.next_candidate(from);
    let Some(deadline) = epoch.checked_add(at) else {
        warn!("Next candidate at {:?} is beyond the clock range, generator idles", at);
        return;
    };

    let job_inner = inner.clone();
    if let Err(e) = inner.timer.schedule_at(deadline, move || {
        on_candidate(job_inner, process, epoch, at);
    }) {
        warn!("Could not schedule next candidate: {}", e);
    }
}

fn on_candidate(inner: Arc<Inner>, mut process: ThinningProcess, epoch: Instant, at: Duration) {
    if inner.state.load(Ordering::Acquire) != RUNNING {
        return;
    }

    inner.counters.candidates.fetch_add(1, Ordering::Relaxed);
    if let Some(k) = process.evaluate(at) {
        inner.counters.accepted_batches.fetch_add(1, Ordering::Relaxed);
        let offsets = process.spread_offsets(k);
        if offsets.is_empty() {
            for _ in 0..k {
                emit(&inner);
            }
        } else {
            spread_batch(&inner, epoch + at, offsets);
        }
    }

    schedule_candidate(inner, process, epoch, at);
}

fn spread_batch(inner: &Arc<Inner>, arrival: Instant, offsets: Vec<Duration>) {
    for offset in offsets {
        inner.counters.pending_emissions.fetch_add(1, Ordering::AcqRel);
        let job_inner = inner.clone();
        let scheduled = inner.timer.schedule_at(arrival + offset, move || {
            emit(&job_inner);
            job_inner.counters.pending_emissions.fetch_sub(1, Ordering::AcqRel);
        });
        if let Err(e) = scheduled {
            inner.counters.pending_emissions.fetch_sub(1, Ordering::AcqRel);
            warn!("Spread emission dropped: {}", e);
        }
    }
}

fn emit(inner: &Inner) {
    let seq = inner.counters.emitted_items.fetch_add(1, Ordering::AcqRel);
    let item = WorkItem::new(None, format!("payload-{seq}"));

    if let Some(metrics) = &inner.metrics {
        metrics.record_ingress(1);
    }

    match &inner.gate {
        Some(gate) => {
            let sink = inner.sink.clone();
            let counters = inner.counters.clone();
            gate.enqueue(move || {
                let result = sink.emit(item);
                if result.is_err() {
                    counters.sink_failures.fetch_add(1, Ordering::Relaxed);
                }
                result
            });
        }
        None => {
            if !sink::deliver(inner.sink.as_ref(), item) {
                inner.counters.sink_failures.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

fn stop_inner(inner: &Arc<Inner>) {
    if inner
        .state
        .compare_exchange(RUNNING, STOPPED, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        return;
    }

    if let Some(handle) = inner.auto_stop.lock().ok().and_then(|mut h| h.take()) {
        handle.cancel();
    }

    let summary = summarize(&inner.counters);
    info!(
        "Generator stopping: emitted {} items in {} batches ({} spread emissions pending)",
        summary.emitted_items, summary.accepted_batches, summary.pending_emissions
    );

    let weak = Arc::downgrade(inner);
    let grace_period = inner.grace_period;
    let tx = inner.terminated_tx.clone();
    let spawned = thread::Builder::new()
        .name("generator-grace".to_string())
        .spawn(move || await_termination(weak, grace_period, tx));
    if let Err(e) = spawned {
        error!("Could not spawn grace thread, terminating immediately: {}", e);
        let _ = inner.terminated_tx.try_send(summarize(&inner.counters));
    }
}

fn await_termination(inner: Weak<Inner>, grace_period: Duration, tx: Sender<RunSummary>) {
    let deadline = Instant::now() + grace_period;
    loop {
        let Some(inner) = inner.upgrade() else { return };
        let summary = summarize(&inner.counters);
        let now = Instant::now();
        if summary.pending_emissions == 0 || now >= deadline {
            if summary.pending_emissions > 0 {
                warn!(
                    "Grace period elapsed with {} spread emissions pending",
                    summary.pending_emissions
                );
            }
            info!("Generator terminated: {:?}", summary);
            let _ = tx.try_send(summary);
            return;
        }
        drop(inner);
        thread::sleep((deadline - now).min(Duration::from_millis(10)));
    }
}
