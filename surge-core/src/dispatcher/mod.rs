//! Two-lane priority dispatcher
//!
//! Producers place classified items into an urgent and a bulk lane (bounded,
//! blocking when full). A periodic tick on the timer thread decides what runs:
//!
//! 1. drain the urgent lane while concurrency permits are free, no cap;
//! 2. update the bulk hysteresis flag from the lane depths, once;
//! 3. if bulk is allowed and no urgent item is left waiting, admit up to
//!    `bulk_budget_per_tick` bulk items, each under a permit. A submission the
//!    pool rejects goes back to the bulk tail and ends admission for the tick.
//!
//! The hysteresis state belongs to the tick alone; producers only touch the
//! lanes. Decisions use depth snapshots that may be slightly stale, which the
//! watermark band absorbs.

pub mod hysteresis;

pub use hysteresis::{Hysteresis, Transition};

use crate::config::DispatcherConfig;
use crate::runtime::{BoundedQueue, PermitGuard, Permits, PoolStats, Timer, TimerHandle, WorkerPool};
use crate::{Result, TaskResult};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use surge_common::{Priority, WorkItem};
use tracing::debug;

/// An item travelling to a worker together with its permit
struct Admitted {
    item: WorkItem,
    _permit: PermitGuard,
}

#[derive(Default)]
struct DispatcherCounters {
    ticks: AtomicU64,
    urgent_admitted: AtomicU64,
    bulk_admitted: AtomicU64,
    requeued: AtomicU64,
    transitions: AtomicU64,
}

/// Totals since the dispatcher was created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatcherStats {
    pub ticks: u64,
    pub urgent_admitted: u64,
    pub bulk_admitted: u64,
    /// Bulk items handed back to the lane after a pool rejection
    pub requeued: u64,
    /// Flips of the bulk flag in either direction
    pub transitions: u64,
}

/// What one tick did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub urgent_admitted: usize,
    pub bulk_admitted: usize,
    pub requeued: usize,
    pub transition: Option<Transition>,
}

/// State shared between producers, the tick and introspection
struct Shared {
    urgent: BoundedQueue<WorkItem>,
    bulk: BoundedQueue<WorkItem>,
    permits: Arc<Permits>,
    pool: WorkerPool<Admitted>,
    counters: DispatcherCounters,
    /// Mirror of the tick-owned flag, for readers outside the tick
    bulk_allowed: AtomicBool,
}

pub struct PriorityDispatcher {
    shared: Arc<Shared>,
    hysteresis: Hysteresis,
    bulk_budget: usize,
    tick_period: Duration,
    /// Urgent head whose submission was rejected; retried first
    urgent_carry: Option<WorkItem>,
    /// Requeued bulk item that did not fit back into a refilled lane
    bulk_carry: Option<WorkItem>,
}

impl PriorityDispatcher {
    /// Create a dispatcher whose workers pass each admitted item to `consumer`
    pub fn new<F>(config: &DispatcherConfig, consumer: F) -> Result<Self>
    where
        F: Fn(WorkItem) -> TaskResult + Send + Sync + 'static,
    {
        config.validate()?;

        let pool = WorkerPool::new("dispatch-worker", config.worker_pool_size, move |admitted: Admitted| {
            let Admitted { item, _permit } = admitted;
            consumer(item)
        })?;

        Ok(Self {
            shared: Arc::new(Shared {
                urgent: BoundedQueue::new(config.queue_capacity)?,
                bulk: BoundedQueue::new(config.queue_capacity)?,
                permits: Permits::new(config.concurrency_permits),
                pool,
                counters: DispatcherCounters::default(),
                bulk_allowed: AtomicBool::new(false),
            }),
            hysteresis: Hysteresis::new(config.low_watermark, config.high_watermark)?,
            bulk_budget: config.bulk_budget_per_tick,
            tick_period: config.tick_period,
            urgent_carry: None,
            bulk_carry: None,
        })
    }

    /// Producer-side handle; the tick is driven manually through [`Self::tick`]
    pub fn handle(&self) -> DispatcherHandle {
        DispatcherHandle { shared: self.shared.clone(), tick: None }
    }

    /// Move the dispatcher onto `timer`, ticking every `tick_period`
    pub fn start(mut self, timer: &Timer) -> Result<DispatcherHandle> {
        let shared = self.shared.clone();
        let period = self.tick_period;
        let tick = timer.schedule_at_fixed_rate(Instant::now() + period, period, move || {
            self.tick();
        })?;
        Ok(DispatcherHandle { shared, tick: Some(tick) })
    }

    pub fn bulk_allowed(&self) -> bool {
        self.hysteresis.bulk_allowed()
    }

    /// Urgent items waiting, including a rejected head
    pub fn urgent_depth(&self) -> usize {
        self.shared.urgent.len() + usize::from(self.urgent_carry.is_some())
    }

    /// Bulk items waiting, including a carried requeue
    pub fn bulk_depth(&self) -> usize {
        self.shared.bulk.len() + usize::from(self.bulk_carry.is_some())
    }

    /// Run one scheduling round
    pub fn tick(&mut self) -> TickReport {
        let mut report = TickReport::default();
        self.shared.counters.ticks.fetch_add(1, Ordering::Relaxed);

        // Urgent first, bounded only by permits
        loop {
            if self.urgent_carry.is_none() && self.shared.urgent.is_empty() {
                break;
            }
            let Some(permit) = self.shared.permits.try_acquire() else { break };
            let Some(item) = self.urgent_carry.take().or_else(|| self.shared.urgent.pop()) else {
                break;
            };
            match self.shared.pool.try_submit(Admitted { item, _permit: permit }) {
                Ok(()) => {
                    report.urgent_admitted += 1;
                    self.shared.counters.urgent_admitted.fetch_add(1, Ordering::Relaxed);
                }
                Err(rejected) => {
                    self.urgent_carry = Some(rejected.item);
                    break;
                }
            }
        }

        let urgent_depth = self.urgent_depth();
        report.transition = self.hysteresis.update(urgent_depth, self.bulk_depth());
        if let Some(transition) = report.transition {
            debug!(
                "Dispatcher {:?}: urgent depth {}, bulk depth {}",
                transition,
                urgent_depth,
                self.bulk_depth()
            );
            self.shared.bulk_allowed.store(self.hysteresis.bulk_allowed(), Ordering::Release);
            self.shared.counters.transitions.fetch_add(1, Ordering::Relaxed);
        }

        // Bulk never goes ahead of a waiting urgent item
        if self.hysteresis.bulk_allowed() && urgent_depth == 0 {
            for _ in 0..self.bulk_budget {
                let Some(permit) = self.shared.permits.try_acquire() else { break };
                let Some(item) = self.bulk_carry.take().or_else(|| self.shared.bulk.pop()) else {
                    break;
                };
                match self.shared.pool.try_submit(Admitted { item, _permit: permit }) {
                    Ok(()) => {
                        report.bulk_admitted += 1;
                        self.shared.counters.bulk_admitted.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(rejected) => {
                        self.requeue_bulk(rejected.item);
                        report.requeued += 1;
                        self.shared.counters.requeued.fetch_add(1, Ordering::Relaxed);
                        break;
                    }
                }
            }
        }

        report
    }

    fn requeue_bulk(&mut self, item: WorkItem) {
        if let Err(item) = self.shared.bulk.try_push(item) {
            self.bulk_carry = Some(item);
        }
    }
}

/// Producer and introspection handle for a dispatcher
#[derive(Clone)]
pub struct DispatcherHandle {
    shared: Arc<Shared>,
    tick: Option<TimerHandle>,
}

impl DispatcherHandle {
    /// Route by the item's priority; unclassified items go to bulk
    pub fn push(&self, item: WorkItem) -> Result<()> {
        match item.priority() {
            Some(Priority::Urgent) => self.push_urgent(item),
            _ => self.push_bulk(item),
        }
    }

    /// Blocks while the urgent lane is full
    pub fn push_urgent(&self, item: WorkItem) -> Result<()> {
        self.shared.urgent.push(item.into_lane(Priority::Urgent))
    }

    /// Blocks while the bulk lane is full
    pub fn push_bulk(&self, item: WorkItem) -> Result<()> {
        self.shared.bulk.push(item.into_lane(Priority::Bulk))
    }

    pub fn urgent_depth(&self) -> usize {
        self.shared.urgent.len()
    }

    pub fn bulk_depth(&self) -> usize {
        self.shared.bulk.len()
    }

    /// Last value published by the tick
    pub fn bulk_allowed(&self) -> bool {
        self.shared.bulk_allowed.load(Ordering::Acquire)
    }

    pub fn permits_available(&self) -> usize {
        self.shared.permits.available()
    }

    pub fn stats(&self) -> DispatcherStats {
        let counters = &self.shared.counters;
        DispatcherStats {
            ticks: counters.ticks.load(Ordering::Relaxed),
            urgent_admitted: counters.urgent_admitted.load(Ordering::Relaxed),
            bulk_admitted: counters.bulk_admitted.load(Ordering::Relaxed),
            requeued: counters.requeued.load(Ordering::Relaxed),
            transitions: counters.transitions.load(Ordering::Relaxed),
        }
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.shared.pool.stats()
    }

    /// Stop ticking, release blocked producers, and wait for running items
    ///
    /// Must not be called from a dispatch worker.
    pub fn shutdown(&self) {
        if let Some(tick) = &self.tick {
            tick.cancel();
        }
        self.shared.urgent.close();
        self.shared.bulk.close();
        self.shared.pool.shutdown();
    }
}
