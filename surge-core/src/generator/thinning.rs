//! Lewis–Shedler thinning for non-homogeneous Poisson arrivals
//!
//! Candidates are drawn from a homogeneous Poisson process at rate λmax (the
//! intensity's upper bound). A candidate at time `t` is accepted with
//! probability `λ(t) / λmax`. The next candidate is always measured from the
//! candidate just evaluated, accepted or not, which keeps the base process
//! memoryless and makes the accepted stream a valid non-homogeneous Poisson
//! process with intensity λ(t).
//!
//! Each accepted arrival is a compound batch of `k >= 1` items.

use crate::config::GeneratorConfig;
use crate::seed::{components, derive_optional};
use crate::workload::IntensityFunction;
use crate::{Error, Result};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::time::Duration;
use surge_common::{BatchSizeSampler, ExponentialDistribution};

fn seeded_rng(seed: Option<u64>) -> SmallRng {
    match seed {
        Some(s) => SmallRng::seed_from_u64(s),
        None => SmallRng::from_os_rng(),
    }
}

/// One accepted arrival in virtual time
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Arrival {
    /// Offset since the start of the run
    pub at: Duration,
    /// Number of items in the batch
    pub batch_size: u32,
}

/// Thinning state: intensity, candidate clock, acceptance draws and batch sampler
///
/// Owned by exactly one driver at a time. In a live run it moves through the
/// chain of scheduled candidate jobs, so it is never shared.
pub struct ThinningProcess {
    intensity: Box<dyn IntensityFunction>,
    batch_sampler: Box<dyn BatchSizeSampler>,
    lambda_max: f64,
    clock: ExponentialDistribution,
    acceptance: SmallRng,
    spread: Duration,
    spread_rng: SmallRng,
    candidates: u64,
    accepted: u64,
}

impl ThinningProcess {
    /// Create a thinning process
    ///
    /// # Parameters
    /// - `intensity`: Rate function; its upper bound becomes λmax
    /// - `batch_sampler`: Batch size per accepted arrival (sampled once here as a sanity check)
    /// - `intra_batch_spread`: Window over which one batch's items are spread
    /// - `seed`: Optional master seed for the clock, acceptance and spread streams
    pub fn new(
        intensity: Box<dyn IntensityFunction>,
        mut batch_sampler: Box<dyn BatchSizeSampler>,
        intra_batch_spread: Duration,
        seed: Option<u64>,
    ) -> Result<Self> {
        let lambda_max = intensity.upper_bound();
        if !lambda_max.is_finite() || lambda_max <= 0.0 {
            return Err(Error::config(format!(
                "{} upper bound must be finite and > 0, got {lambda_max}",
                intensity.name()
            )));
        }

        if batch_sampler.sample() == 0 {
            return Err(Error::config(format!(
                "{} batch sampler returned 0; batch sizes must be >= 1",
                batch_sampler.name()
            )));
        }

        let clock = ExponentialDistribution::with_seed(
            lambda_max,
            derive_optional(seed, components::CANDIDATE_CLOCK),
        )?;

        Ok(Self {
            intensity,
            batch_sampler,
            lambda_max,
            clock,
            acceptance: seeded_rng(derive_optional(seed, components::ACCEPTANCE)),
            spread: intra_batch_spread,
            spread_rng: seeded_rng(derive_optional(seed, components::SPREAD_JITTER)),
            candidates: 0,
            accepted: 0,
        })
    }

    /// Build the process described by a generator configuration
    pub fn from_config(config: &GeneratorConfig) -> Result<Self> {
        config.validate()?;
        Self::new(
            config.build_intensity()?,
            config.build_batch_sampler()?,
            config.intra_batch_spread,
            config.seed,
        )
    }

    /// Time of the next candidate after `from`: `from + Exp(λmax)`
    pub fn next_candidate(&mut self, from: Duration) -> Duration {
        let delay = self.clock.sample_inter_arrival();
        let delay = Duration::try_from_secs_f64(delay).unwrap_or(Duration::MAX);
        from.saturating_add(delay)
    }

    /// Evaluate the candidate at `at`; returns the batch size if accepted
    pub fn evaluate(&mut self, at: Duration) -> Option<u32> {
        self.candidates += 1;

        let rate = self.intensity.rate_at(at).clamp(0.0, self.lambda_max);
        let p = (rate / self.lambda_max).min(1.0);
        let u: f64 = self.acceptance.random();
        if u >= p {
            return None;
        }

        self.accepted += 1;
        Some(self.batch_sampler.sample().max(1))
    }

    /// Offsets from the arrival time at which the `k` items of a batch fire
    ///
    /// Empty when the batch is emitted inline (no spread, or a single item).
    /// Otherwise slot `i` fires at `i * D/k + jitter`, jitter uniform in `[0, D/k)`.
    pub fn spread_offsets(&mut self, k: u32) -> Vec<Duration> {
        if self.spread.is_zero() || k <= 1 {
            return Vec::new();
        }
        let step_ns = (self.spread.as_nanos() / k as u128) as u64;
        (0..k as u64)
            .map(|i| {
                let jitter = if step_ns > 0 { self.spread_rng.random_range(0..step_ns) } else { 0 };
                Duration::from_nanos(i.saturating_mul(step_ns).saturating_add(jitter))
            })
            .collect()
    }

    /// Run the process over virtual time `[0, horizon)` and collect accepted arrivals
    pub fn simulate(&mut self, horizon: Duration) -> Vec<Arrival> {
        let mut arrivals = Vec::new();
        let mut t = self.next_candidate(Duration::ZERO);
        while t < horizon {
            if let Some(batch_size) = self.evaluate(t) {
                arrivals.push(Arrival { at: t, batch_size });
            }
            t = self.next_candidate(t);
        }
        arrivals
    }

    pub fn lambda_max(&self) -> f64 {
        self.lambda_max
    }

    pub fn intra_batch_spread(&self) -> Duration {
        self.spread
    }

    pub fn intensity_name(&self) -> &'static str {
        self.intensity.name()
    }

    pub fn batch_sampler_name(&self) -> &'static str {
        self.batch_sampler.name()
    }

    /// Candidates evaluated so far
    pub fn candidates(&self) -> u64 {
        self.candidates
    }

    /// Candidates accepted so far
    pub fn accepted(&self) -> u64 {
        self.accepted
    }

    /// Mutable access to the intensity, e.g. to integrate it for comparison
    pub fn intensity_mut(&mut self) -> &mut dyn IntensityFunction {
        self.intensity.as_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workload::{ConstantIntensity, SquareWaveIntensity};
    use surge_common::{FixedBatchSize, GeometricBatchSize};

    /// Intensity with a configurable bound, for rejecting bad bounds
    struct BrokenBound(f64);

    impl IntensityFunction for BrokenBound {
        fn rate_at(&mut self, _elapsed: Duration) -> f64 {
            1.0
        }

        fn upper_bound(&self) -> f64 {
            self.0
        }

        fn name(&self) -> &'static str {
            "BrokenBound"
        }
    }

    struct ZeroBatch;

    impl BatchSizeSampler for ZeroBatch {
        fn sample(&mut self) -> u32 {
            0
        }

        fn mean(&self) -> f64 {
            0.0
        }

        fn name(&self) -> &'static str {
            "Zero"
        }
    }

    fn constant(rate: f64, seed: u64) -> ThinningProcess {
        ThinningProcess::new(
            Box::new(ConstantIntensity::new(rate).unwrap()),
            Box::new(FixedBatchSize::new(1).unwrap()),
            Duration::ZERO,
            Some(seed),
        )
        .unwrap()
    }

    #[test]
    fn test_rejects_invalid_upper_bound() {
        for bound in [0.0, -1.0, f64::INFINITY, f64::NAN] {
            let result = ThinningProcess::new(
                Box::new(BrokenBound(bound)),
                Box::new(FixedBatchSize::new(1).unwrap()),
                Duration::ZERO,
                None,
            );
            assert!(result.is_err(), "Bound {} should be rejected", bound);
        }
    }

    #[test]
    fn test_rejects_zero_batch_sampler() {
        let result = ThinningProcess::new(
            Box::new(ConstantIntensity::new(1.0).unwrap()),
            Box::new(ZeroBatch),
            Duration::ZERO,
            None,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_constant_intensity_accepts_everything() {
        let mut process = constant(50.0, 7);
        let arrivals = process.simulate(Duration::from_secs(10));
        assert_eq!(process.candidates(), process.accepted(), "p = 1 for a constant intensity");
        assert_eq!(arrivals.len() as u64, process.accepted());
    }

    #[test]
    fn test_candidates_are_strictly_increasing() {
        let mut process = constant(1000.0, 3);
        let arrivals = process.simulate(Duration::from_secs(1));
        for pair in arrivals.windows(2) {
            assert!(pair[0].at <= pair[1].at);
        }
        assert!(arrivals.iter().all(|a| a.at < Duration::from_secs(1)));
    }

    #[test]
    fn test_seeded_runs_are_reproducible() {
        let a = constant(20.0, 99).simulate(Duration::from_secs(30));
        let b = constant(20.0, 99).simulate(Duration::from_secs(30));
        assert_eq!(a, b);
    }

    #[test]
    fn test_low_phase_is_thinned() {
        let wave = SquareWaveIntensity::new(1.0, 100.0, Duration::from_secs(10), 0.5).unwrap();
        let mut process = ThinningProcess::new(
            Box::new(wave),
            Box::new(FixedBatchSize::new(1).unwrap()),
            Duration::ZERO,
            Some(5),
        )
        .unwrap();

        let arrivals = process.simulate(Duration::from_secs(100));
        let high = arrivals.iter().filter(|a| a.at.as_secs() % 10 < 5).count();
        let low = arrivals.len() - high;
        // Expected ~5000 high vs ~50 low
        assert!(high > 20 * low, "high={} low={}", high, low);
        assert!(process.accepted() < process.candidates());
    }

    #[test]
    fn test_batch_sizes_come_from_sampler() {
        let mut process = ThinningProcess::new(
            Box::new(ConstantIntensity::new(100.0).unwrap()),
            Box::new(GeometricBatchSize::with_seed(4.0, Some(1)).unwrap()),
            Duration::ZERO,
            Some(2),
        )
        .unwrap();
        let arrivals = process.simulate(Duration::from_secs(100));
        assert!(arrivals.iter().all(|a| a.batch_size >= 1));
        let mean = arrivals.iter().map(|a| a.batch_size as f64).sum::<f64>() / arrivals.len() as f64;
        assert!((mean - 4.0).abs() < 0.3, "Mean batch size {} should be ~4", mean);
    }

    #[test]
    fn test_spread_offsets() {
        let mut process = ThinningProcess::new(
            Box::new(ConstantIntensity::new(1.0).unwrap()),
            Box::new(FixedBatchSize::new(1).unwrap()),
            Duration::from_millis(100),
            Some(8),
        )
        .unwrap();

        assert!(process.spread_offsets(1).is_empty(), "Single items fire inline");

        let offsets = process.spread_offsets(4);
        assert_eq!(offsets.len(), 4);
        for (i, offset) in offsets.iter().enumerate() {
            let slot_start = Duration::from_millis(25 * i as u64);
            assert!(*offset >= slot_start && *offset < slot_start + Duration::from_millis(25));
        }
    }

    #[test]
    fn test_no_spread_is_inline() {
        let mut process = constant(1.0, 1);
        assert!(process.spread_offsets(10).is_empty());
    }
}
