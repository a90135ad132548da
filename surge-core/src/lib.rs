//! Surge Core Library
//!
//! This crate provides the engines of the surge load shaper: a non-homogeneous
//! stochastic arrival generator, a credit-based backpressure gate and a two-lane
//! priority dispatcher, together with the timer, worker pools and metrics
//! collector they run on.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod gate;
pub mod generator;
pub mod runtime;
pub mod seed;
pub mod stats;
pub mod workload;

pub use config::{DispatcherConfig, GateConfig, GeneratorConfig, IntensityConfig};
pub use dispatcher::{DispatcherHandle, DispatcherStats, PriorityDispatcher};
pub use error::{Error, Result};
pub use gate::{BackpressureGate, CreditLedger};
pub use generator::{GeneratorContext, RunSummary, StochasticArrivalGenerator, TaskSink};

/// Outcome of a user callback run at an emission or dispatch boundary
pub type TaskResult = anyhow::Result<()>;
