//! Random distributions for arrival generation
//!
//! Provides the samplers used by the arrival generator:
//! - Inter-candidate timing (Exponential, the base Poisson process)
//! - Compound-arrival batch sizes (Geometric, Fixed)

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Exp};

fn seeded_rng(seed: Option<u64>) -> SmallRng {
    match seed {
        Some(s) => SmallRng::seed_from_u64(s),
        None => SmallRng::from_os_rng(),
    }
}

/// Exponential distribution (Poisson inter-arrival times)
pub struct ExponentialDistribution {
    lambda: f64,
    rng: SmallRng,
    dist: Exp<f64>,
}

impl ExponentialDistribution {
    pub fn new(lambda: f64) -> anyhow::Result<Self> {
        Self::with_seed(lambda, None)
    }

    pub fn with_seed(lambda: f64, seed: Option<u64>) -> anyhow::Result<Self> {
        if !(lambda > 0.0) || !lambda.is_finite() {
            anyhow::bail!("Exponential lambda must be finite and > 0, got {lambda}");
        }

        let dist = Exp::new(lambda)?;
        Ok(Self { lambda, rng: seeded_rng(seed), dist })
    }

    /// Sample an inter-arrival time in seconds
    pub fn sample_inter_arrival(&mut self) -> f64 {
        self.dist.sample(&mut self.rng)
    }

    pub fn lambda(&self) -> f64 {
        self.lambda
    }
}

/// Sampler of compound-arrival batch sizes
///
/// Each accepted arrival emits `k` work items, where `k` is drawn independently
/// per arrival. Implementations must never return 0.
pub trait BatchSizeSampler: Send {
    /// Draw a batch size `k >= 1`
    fn sample(&mut self) -> u32;

    /// Expected batch size
    fn mean(&self) -> f64;

    /// Get sampler name
    fn name(&self) -> &'static str;
}

/// Shifted geometric batch size on `{1, 2, ...}` with success probability `p = 1/mean`
///
/// Sampled by inversion: `k = 1 + floor(ln(1 - U) / ln(1 - p))`, computed with
/// `ln_1p` so that small `p` (large means) keeps full precision.
pub struct GeometricBatchSize {
    p: f64,
    rng: SmallRng,
}

impl GeometricBatchSize {
    /// Create a geometric sampler with the given target mean (entropy seed)
    pub fn of_mean(mean: f64) -> anyhow::Result<Self> {
        Self::with_seed(mean, None)
    }

    /// Create a geometric sampler with the given target mean and explicit seed
    pub fn with_seed(mean: f64, seed: Option<u64>) -> anyhow::Result<Self> {
        if !(mean >= 1.0) || !mean.is_finite() {
            anyhow::bail!("Geometric batch mean must be finite and >= 1, got {mean}");
        }
        Ok(Self { p: 1.0 / mean, rng: seeded_rng(seed) })
    }

    /// Success probability `p`
    pub fn p(&self) -> f64 {
        self.p
    }
}

impl BatchSizeSampler for GeometricBatchSize {
    fn sample(&mut self) -> u32 {
        if self.p >= 1.0 {
            return 1;
        }
        let u: f64 = self.rng.random();
        let trials = ((-u).ln_1p() / (-self.p).ln_1p()).floor();
        // float-to-int casts saturate, so very long tails clamp at u32::MAX
        (1.0 + trials).max(1.0) as u32
    }

    fn mean(&self) -> f64 {
        1.0 / self.p
    }

    fn name(&self) -> &'static str {
        "Geometric"
    }
}

/// Constant batch size
pub struct FixedBatchSize {
    k: u32,
}

impl FixedBatchSize {
    pub fn new(k: u32) -> anyhow::Result<Self> {
        if k == 0 {
            anyhow::bail!("Fixed batch size must be >= 1");
        }
        Ok(Self { k })
    }
}

impl BatchSizeSampler for FixedBatchSize {
    fn sample(&mut self) -> u32 {
        self.k
    }

    fn mean(&self) -> f64 {
        self.k as f64
    }

    fn name(&self) -> &'static str {
        "Fixed"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_basic() {
        let mut dist = ExponentialDistribution::new(1000.0).expect("Failed to create Exponential");
        for _ in 0..100 {
            let sample = dist.sample_inter_arrival();
            assert!(sample >= 0.0, "Sample should be non-negative");
        }
    }

    #[test]
    fn test_exponential_rejects_bad_lambda() {
        assert!(ExponentialDistribution::new(0.0).is_err());
        assert!(ExponentialDistribution::new(-1.0).is_err());
        assert!(ExponentialDistribution::new(f64::INFINITY).is_err());
        assert!(ExponentialDistribution::new(f64::NAN).is_err());
    }

    #[test]
    fn test_exponential_mean() {
        let mut dist = ExponentialDistribution::with_seed(4.0, Some(7)).unwrap();
        let n = 100_000;
        let mean: f64 = (0..n).map(|_| dist.sample_inter_arrival()).sum::<f64>() / n as f64;
        assert!((mean - 0.25).abs() < 0.01, "Mean {} should be ~0.25", mean);
    }

    #[test]
    fn test_geometric_mean_one_always_one() {
        let mut sampler = GeometricBatchSize::with_seed(1.0, Some(1)).unwrap();
        for _ in 0..10_000 {
            assert_eq!(sampler.sample(), 1);
        }
    }

    #[test]
    fn test_geometric_mean_five() {
        let mut sampler = GeometricBatchSize::with_seed(5.0, Some(42)).unwrap();
        let n = 100_000;
        let mut sum = 0u64;
        for _ in 0..n {
            let k = sampler.sample();
            assert!(k >= 1, "Batch size must be >= 1");
            sum += k as u64;
        }
        let mean = sum as f64 / n as f64;
        assert!((mean - 5.0).abs() < 0.25, "Empirical mean {} should be within 5% of 5", mean);
    }

    #[test]
    fn test_geometric_large_mean_stays_positive() {
        let mut sampler = GeometricBatchSize::with_seed(1e9, Some(3)).unwrap();
        for _ in 0..1000 {
            assert!(sampler.sample() >= 1);
        }
    }

    #[test]
    fn test_geometric_rejects_bad_mean() {
        assert!(GeometricBatchSize::of_mean(0.5).is_err());
        assert!(GeometricBatchSize::of_mean(0.0).is_err());
        assert!(GeometricBatchSize::of_mean(f64::NAN).is_err());
        assert!(GeometricBatchSize::of_mean(f64::INFINITY).is_err());
    }

    #[test]
    fn test_fixed_batch_size() {
        assert!(FixedBatchSize::new(0).is_err());
        let mut sampler = FixedBatchSize::new(3).unwrap();
        assert_eq!(sampler.sample(), 3);
        assert_eq!(sampler.mean(), 3.0);
        assert_eq!(sampler.name(), "Fixed");
    }
}
