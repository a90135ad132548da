//! Fixed-size worker pool with direct hand-off
//!
//! Submissions go through a zero-capacity channel, so a job is accepted only
//! when a worker is idle and blocked on receive. There is no internal buffer:
//! a saturated pool either hands the job back (`try_submit`) or runs it on the
//! calling thread (`execute`).

use crate::{Error, Result, TaskResult};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, warn};

enum Message<T> {
    Job(T),
    Stop,
}

/// Counters kept by a worker pool
#[derive(Debug, Default)]
struct PoolCounters {
    handed_off: AtomicU64,
    caller_runs: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time view of pool counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Jobs accepted by an idle worker
    pub handed_off: u64,
    /// Jobs run on the submitting thread because every worker was busy
    pub caller_runs: u64,
    /// Jobs that returned `Err` or panicked
    pub failed: u64,
}

/// Runs the handler for one job, logging and counting failures
fn run_guarded<T>(
    name: &str,
    handler: &(dyn Fn(T) -> TaskResult + Send + Sync),
    counters: &PoolCounters,
    job: T,
) {
    match catch_unwind(AssertUnwindSafe(|| handler(job))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            error!("Task failed in pool {}: {:#}", name, e);
        }
        Err(_) => {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            error!("Task panicked in pool {}", name);
        }
    }
}

/// Worker pool processing jobs of type `T` with a shared handler
pub struct WorkerPool<T: Send + 'static> {
    name: String,
    size: usize,
    tx: Sender<Message<T>>,
    handler: Arc<dyn Fn(T) -> TaskResult + Send + Sync>,
    counters: Arc<PoolCounters>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shut_down: AtomicBool,
}

impl<T: Send + 'static> WorkerPool<T> {
    /// Spawn `size` worker threads running `handler` for every job
    pub fn new<F>(name: &str, size: usize, handler: F) -> Result<Self>
    where
        F: Fn(T) -> TaskResult + Send + Sync + 'static,
    {
        if size == 0 {
            return Err(Error::config(format!("{name}: worker_pool_size must be > 0")));
        }

        let (tx, rx) = bounded::<Message<T>>(0);
        let handler: Arc<dyn Fn(T) -> TaskResult + Send + Sync> = Arc::new(handler);
        let counters = Arc::new(PoolCounters::default());

        let mut workers = Vec::with_capacity(size);
        for worker_id in 0..size {
            let rx: Receiver<Message<T>> = rx.clone();
            let handler = handler.clone();
            let counters = counters.clone();
            let pool_name = name.to_string();

            let handle = thread::Builder::new()
                .name(format!("{name}-{worker_id}"))
                .spawn(move || {
                    while let Ok(Message::Job(job)) = rx.recv() {
                        run_guarded(&pool_name, handler.as_ref(), &counters, job);
                    }
                    debug!("Worker {}-{} exiting", pool_name, worker_id);
                })?;
            workers.push(handle);
        }

        Ok(Self {
            name: name.to_string(),
            size,
            tx,
            handler,
            counters,
            workers: Mutex::new(workers),
            shut_down: AtomicBool::new(false),
        })
    }

    /// Hand `job` to an idle worker, or give it back if none is idle
    pub fn try_submit(&self, job: T) -> std::result::Result<(), T> {
        if self.is_shut_down() {
            return Err(job);
        }
        match self.tx.try_send(Message::Job(job)) {
            Ok(()) => {
                self.counters.handed_off.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => match e.into_inner() {
                Message::Job(job) => Err(job),
                Message::Stop => Ok(()),
            },
        }
    }

    /// Hand `job` to an idle worker, or run it on the calling thread
    ///
    /// Fails only after `shutdown`, in which case the job is dropped.
    pub fn execute(&self, job: T) -> Result<()> {
        if self.is_shut_down() {
            warn!("Pool {} is shut down, dropping job", self.name);
            return Err(Error::Shutdown(format!("worker pool {}", self.name)));
        }
        if let Err(job) = self.try_submit(job) {
            self.counters.caller_runs.fetch_add(1, Ordering::Relaxed);
            run_guarded(&self.name, self.handler.as_ref(), &self.counters, job);
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            handed_off: self.counters.handed_off.load(Ordering::Relaxed),
            caller_runs: self.counters.caller_runs.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Stop accepting jobs, let running jobs finish, and join the workers
    ///
    /// Must not be called from one of this pool's own workers.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let workers = match self.workers.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(_) => return,
        };
        // Each worker consumes exactly one stop message after its current job
        for _ in 0..workers.len() {
            let _ = self.tx.send(Message::Stop);
        }
        for handle in workers {
            if handle.join().is_err() {
                error!("Worker thread in pool {} panicked", self.name);
            }
        }
        debug!("Pool {} shut down", self.name);
    }
}
