//! Configuration types for surge core
//!
//! Every struct has documented defaults and a `validate()` that fails fast with
//! `Error::Config` naming the offending parameter, before anything is scheduled.

use crate::seed::{components, derive_optional};
use crate::workload::{
    ConstantIntensity, IntensityFunction, RampIntensity, SawtoothIntensity, SinusoidalIntensity,
    SpikeIntensity, SquareWaveIntensity,
};
use crate::Error;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use surge_common::{BatchSizeSampler, GeometricBatchSize};

#[cfg(feature = "schema")]
use schemars::JsonSchema;

/// Arrival-rate shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(JsonSchema))]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum IntensityConfig {
    Constant {
        rate: f64,
    },
    SquareWave {
        low_rate: f64,
        high_rate: f64,
        #[serde(with = "humantime_serde")]
        #[cfg_attr(feature = "schema", schemars(with = "String"))]
        period: Duration,
        duty_cycle: f64,
        #[serde(default)]
        jitter_fraction: f64,
        #[serde(default, with = "humantime_serde")]
        #[cfg_attr(feature = "schema", schemars(with = "String"))]
        phase: Duration,
    },
    Ramp {
        start_rate: f64,
        end_rate: f64,
        #[serde(with = "humantime_serde")]
        #[cfg_attr(feature = "schema", schemars(with = "String"))]
        duration: Duration,
    },
    Spike {
        normal_rate: f64,
        spike_rate: f64,
        #[serde(with = "humantime_serde")]
        #[cfg_attr(feature = "schema", schemars(with = "String"))]
        spike_start: Duration,
        #[serde(with = "humantime_serde")]
        #[cfg_attr(feature = "schema", schemars(with = "String"))]
        spike_duration: Duration,
    },
    Sinusoidal {
        base_rate: f64,
        amplitude: f64,
        #[serde(with = "humantime_serde")]
        #[cfg_attr(feature = "schema", schemars(with = "String"))]
        period: Duration,
    },
    Sawtooth {
        min_rate: f64,
        max_rate: f64,
        #[serde(with = "humantime_serde")]
        #[cfg_attr(feature = "schema", schemars(with = "String"))]
        period: Duration,
    },
}

impl Default for IntensityConfig {
    fn default() -> Self {
        IntensityConfig::SquareWave {
            low_rate: 2.0,
            high_rate: 10.0,
            period: Duration::from_secs(60),
            duty_cycle: 0.25,
            jitter_fraction: 0.0,
            phase: Duration::ZERO,
        }
    }
}

impl IntensityConfig {
    /// Build the intensity function; `seed` seeds square-wave jitter
    pub fn build(&self, seed: Option<u64>) -> crate::Result<Box<dyn IntensityFunction>> {
        let intensity: Box<dyn IntensityFunction> = match *self {
            IntensityConfig::Constant { rate } => Box::new(ConstantIntensity::new(rate)?),
            IntensityConfig::SquareWave {
                low_rate,
                high_rate,
                period,
                duty_cycle,
                jitter_fraction,
                phase,
            } => Box::new(
                SquareWaveIntensity::new(low_rate, high_rate, period, duty_cycle)?
                    .with_jitter(jitter_fraction, seed)?
                    .with_phase(phase),
            ),
            IntensityConfig::Ramp { start_rate, end_rate, duration } => {
                Box::new(RampIntensity::new(start_rate, end_rate, duration)?)
            }
            IntensityConfig::Spike { normal_rate, spike_rate, spike_start, spike_duration } => {
                Box::new(SpikeIntensity::new(normal_rate, spike_rate, spike_start, spike_duration)?)
            }
            IntensityConfig::Sinusoidal { base_rate, amplitude, period } => {
                Box::new(SinusoidalIntensity::new(base_rate, amplitude, period)?)
            }
            IntensityConfig::Sawtooth { min_rate, max_rate, period } => {
                Box::new(SawtoothIntensity::new(min_rate, max_rate, period)?)
            }
        };
        Ok(intensity)
    }

    pub fn validate(&self) -> crate::Result<()> {
        self.build(None).map(|_| ())
    }
}

/// Largest accepted `batch_mean`
///
/// Every item of a batch is emitted (and, with a spread, scheduled) on its own,
/// so the geometric tail has to stay far below what one timer can hold.
pub const MAX_BATCH_MEAN: f64 = 10_000.0;

/// Arrival generator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(JsonSchema))]
#[serde(default)]
pub struct GeneratorConfig {
    /// Rate shape; defaults to the 2/10 events/s square wave with a 60s period
    pub intensity: IntensityConfig,
    /// Mean compound-batch size in `[1, MAX_BATCH_MEAN]`; 1 means every arrival is a single item
    pub batch_mean: f64,
    /// Window over which the items of one batch are spread; zero emits them inline
    #[serde(with = "humantime_serde")]
    #[cfg_attr(feature = "schema", schemars(with = "String"))]
    pub intra_batch_spread: Duration,
    /// Stop automatically after this long; `None` runs until `stop()`
    #[serde(with = "humantime_serde")]
    #[cfg_attr(feature = "schema", schemars(with = "Option<String>"))]
    pub run_duration: Option<Duration>,
    /// Upper bound on the wait for in-flight spread emissions after `stop()`
    #[serde(with = "humantime_serde")]
    #[cfg_attr(feature = "schema", schemars(with = "String"))]
    pub grace_period: Duration,
    /// Master seed; `None` draws every stream from entropy
    pub seed: Option<u64>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            intensity: IntensityConfig::default(),
            batch_mean: 1.0,
            intra_batch_spread: Duration::ZERO,
            run_duration: None,
            grace_period: Duration::from_secs(5),
            seed: None,
        }
    }
}

impl GeneratorConfig {
    pub fn validate(&self) -> crate::Result<()> {
        self.intensity.validate()?;
        if !(1.0..=MAX_BATCH_MEAN).contains(&self.batch_mean) {
            return Err(Error::config(format!(
                "batch_mean must be in [1, {}], got {}",
                MAX_BATCH_MEAN, self.batch_mean
            )));
        }
        if self.run_duration.is_some_and(|d| d.is_zero()) {
            return Err(Error::config("run_duration must be > 0 when set"));
        }
        Ok(())
    }

    pub fn build_intensity(&self) -> crate::Result<Box<dyn IntensityFunction>> {
        self.intensity.build(derive_optional(self.seed, components::INTENSITY_JITTER))
    }

    pub fn build_batch_sampler(&self) -> crate::Result<Box<dyn BatchSizeSampler>> {
        let sampler = GeometricBatchSize::with_seed(
            self.batch_mean,
            derive_optional(self.seed, components::BATCH_SIZE),
        )?;
        Ok(Box::new(sampler))
    }
}

/// Credit gate configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(JsonSchema))]
#[serde(default)]
pub struct GateConfig {
    /// Credits available before the consumer grants any
    pub initial_credits: u64,
    /// Backlog capacity; `enqueue` blocks beyond it
    pub queue_capacity: usize,
    /// Worker threads executing admitted tasks
    pub worker_pool_size: usize,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self { initial_credits: 0, queue_capacity: 10_000, worker_pool_size: 4 }
    }
}

impl GateConfig {
    pub fn validate(&self) -> crate::Result<()> {
        if self.queue_capacity == 0 {
            return Err(Error::config("queue_capacity must be > 0"));
        }
        if self.worker_pool_size == 0 {
            return Err(Error::config("worker_pool_size must be > 0"));
        }
        Ok(())
    }
}

/// Two-lane dispatcher configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(JsonSchema))]
#[serde(default)]
pub struct DispatcherConfig {
    /// Urgent depth strictly below which bulk may be re-enabled
    pub low_watermark: usize,
    /// Urgent depth strictly above which bulk is disabled
    pub high_watermark: usize,
    /// Maximum bulk items admitted per tick
    pub bulk_budget_per_tick: usize,
    #[serde(with = "humantime_serde")]
    #[cfg_attr(feature = "schema", schemars(with = "String"))]
    pub tick_period: Duration,
    /// Maximum number of items executing at once, across both lanes
    pub concurrency_permits: usize,
    /// Capacity of each lane
    pub queue_capacity: usize,
    /// Worker threads executing dispatched items
    pub worker_pool_size: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            low_watermark: 5,
            high_watermark: 20,
            bulk_budget_per_tick: 10,
            tick_period: Duration::from_millis(20),
            concurrency_permits: 8,
            queue_capacity: 100_000,
            worker_pool_size: 8,
        }
    }
}

impl DispatcherConfig {
    pub fn validate(&self) -> crate::Result<()> {
        if self.low_watermark >= self.high_watermark {
            return Err(Error::config(format!(
                "low_watermark ({}) must be < high_watermark ({})",
                self.low_watermark, self.high_watermark
            )));
        }
        if self.tick_period.is_zero() {
            return Err(Error::config("tick_period must be > 0"));
        }
        if self.concurrency_permits == 0 {
            return Err(Error::config("concurrency_permits must be > 0"));
        }
        if self.queue_capacity == 0 {
            return Err(Error::config("queue_capacity must be > 0"));
        }
        if self.worker_pool_size == 0 {
            return Err(Error::config("worker_pool_size must be > 0"));
        }
        Ok(())
    }
}
