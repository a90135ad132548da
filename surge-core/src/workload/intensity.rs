//! Intensity functions for time-varying arrival rates
//!
//! An intensity function gives the instantaneous arrival rate λ(t) (events per
//! second) at a time offset since the run started, together with a finite global
//! upper bound λmax with `λ(t) <= λmax` for every `t`. The bound drives thinning:
//! candidates are generated at rate λmax and kept with probability λ(t)/λmax.

use crate::{Error, Result};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

/// Time-varying rate with a known finite upper bound
pub trait IntensityFunction: Send {
    /// Rate in events per second at `elapsed` since the run started. Never negative.
    ///
    /// Takes `&mut self` because some variants draw per-sample jitter.
    fn rate_at(&mut self, elapsed: Duration) -> f64;

    /// Global upper bound for `rate_at`, finite and strictly positive
    fn upper_bound(&self) -> f64;

    /// Get intensity name
    fn name(&self) -> &'static str;
}

fn ensure_rate(name: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(Error::config(format!("{name} must be finite and >= 0, got {value}")));
    }
    Ok(())
}

fn ensure_period(name: &str, period: Duration) -> Result<()> {
    if period.is_zero() {
        return Err(Error::config(format!("{name} must be > 0")));
    }
    Ok(())
}

fn ensure_bound(name: &str, bound: f64) -> Result<()> {
    if !bound.is_finite() || bound <= 0.0 {
        return Err(Error::config(format!("{name} upper bound must be finite and > 0, got {bound}")));
    }
    Ok(())
}

/// Fractional position of `elapsed + shift` within a repeating period, in `[0, 1)`
fn cycle_position(elapsed: Duration, shift: Duration, period: Duration) -> f64 {
    let period_ns = period.as_nanos();
    let position_ns = (elapsed.as_nanos() % period_ns + shift.as_nanos() % period_ns) % period_ns;
    position_ns as f64 / period_ns as f64
}

/// Constant rate
pub struct ConstantIntensity {
    rate: f64,
}

impl ConstantIntensity {
    pub fn new(rate: f64) -> Result<Self> {
        ensure_rate("rate", rate)?;
        ensure_bound("Constant", rate)?;
        Ok(Self { rate })
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }
}

impl IntensityFunction for ConstantIntensity {
    fn rate_at(&mut self, _elapsed: Duration) -> f64 {
        self.rate
    }

    fn upper_bound(&self) -> f64 {
        self.rate
    }

    fn name(&self) -> &'static str {
        "Constant"
    }
}

/// Square wave alternating between a low and a high rate
///
/// Each period starts in the high state for `duty_cycle * period`, then drops to
/// the low rate for the remainder. An optional multiplicative jitter `j` scales
/// every sample by `Uniform(1 - j, 1 + j)`, floored at zero.
pub struct SquareWaveIntensity {
    low: f64,
    high: f64,
    period: Duration,
    duty_cycle: f64,
    phase: Duration,
    jitter_fraction: f64,
    rng: SmallRng,
}

impl SquareWaveIntensity {
    /// Create a square wave without jitter
    ///
    /// # Parameters
    /// - `low`: Rate outside the high window (events/s, > 0)
    /// - `high`: Rate inside the high window (events/s, >= low)
    /// - `period`: Length of one full cycle
    /// - `duty_cycle`: Fraction of the period spent at `high`, in `[0, 1]`
    pub fn new(low: f64, high: f64, period: Duration, duty_cycle: f64) -> Result<Self> {
        if !(low > 0.0) || !low.is_finite() {
            return Err(Error::config(format!("lowRate must be finite and > 0, got {low}")));
        }
        if !high.is_finite() || high < low {
            return Err(Error::config(format!("highRate ({high}) must be finite and >= lowRate ({low})")));
        }
        ensure_period("period", period)?;
        if !(0.0..=1.0).contains(&duty_cycle) {
            return Err(Error::config(format!("dutyCycle must be in [0,1], got {duty_cycle}")));
        }

        Ok(Self {
            low,
            high,
            period,
            duty_cycle,
            phase: Duration::ZERO,
            jitter_fraction: 0.0,
            rng: SmallRng::from_os_rng(),
        })
    }

    /// Enable multiplicative jitter
    ///
    /// # Parameters
    /// - `jitter_fraction`: `j` in `[0, 1]`; e.g. 0.1 scales samples by `U[0.9, 1.1]`
    /// - `seed`: Optional seed for the jitter stream (None = use entropy)
    pub fn with_jitter(mut self, jitter_fraction: f64, seed: Option<u64>) -> Result<Self> {
        if !(0.0..=1.0).contains(&jitter_fraction) {
            return Err(Error::config(format!(
                "jitterFraction must be in [0,1], got {jitter_fraction}"
            )));
        }
        self.jitter_fraction = jitter_fraction;
        if let Some(s) = seed {
            self.rng = SmallRng::seed_from_u64(s);
        }
        Ok(self)
    }

    /// Shift the wave so that the cycle starts `phase` before the run started
    pub fn with_phase(mut self, phase: Duration) -> Self {
        self.phase = phase;
        self
    }

    pub fn low(&self) -> f64 {
        self.low
    }

    pub fn high(&self) -> f64 {
        self.high
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn duty_cycle(&self) -> f64 {
        self.duty_cycle
    }

    pub fn jitter_fraction(&self) -> f64 {
        self.jitter_fraction
    }

    /// Rate without jitter at the given offset
    pub fn base_rate_at(&self, elapsed: Duration) -> f64 {
        if cycle_position(elapsed, self.phase, self.period) < self.duty_cycle {
            self.high
        } else {
            self.low
        }
    }
}

impl IntensityFunction for SquareWaveIntensity {
    fn rate_at(&mut self, elapsed: Duration) -> f64 {
        let base = self.base_rate_at(elapsed);
        if self.jitter_fraction == 0.0 {
            return base;
        }
        let j = self.jitter_fraction;
        let multiplier = self.rng.random_range((1.0 - j)..=(1.0 + j));
        (base * multiplier).max(0.0)
    }

    fn upper_bound(&self) -> f64 {
        self.high * (1.0 + self.jitter_fraction)
    }

    fn name(&self) -> &'static str {
        "SquareWave"
    }
}

/// Ramp pattern (linearly increase/decrease, then hold)
///
/// Gradually changes the rate from `start_rate` to `end_rate` over `duration`
/// and holds `end_rate` afterwards. Useful for finding saturation points.
pub struct RampIntensity {
    start_rate: f64,
    end_rate: f64,
    duration: Duration,
}

impl RampIntensity {
    pub fn new(start_rate: f64, end_rate: f64, duration: Duration) -> Result<Self> {
        ensure_rate("start_rate", start_rate)?;
        ensure_rate("end_rate", end_rate)?;
        ensure_period("Ramp duration", duration)?;
        ensure_bound("Ramp", start_rate.max(end_rate))?;
        Ok(Self { start_rate, end_rate, duration })
    }
}

impl IntensityFunction for RampIntensity {
    fn rate_at(&mut self, elapsed: Duration) -> f64 {
        let progress = (elapsed.as_secs_f64() / self.duration.as_secs_f64()).min(1.0);
        self.start_rate + (self.end_rate - self.start_rate) * progress
    }

    fn upper_bound(&self) -> f64 {
        self.start_rate.max(self.end_rate)
    }

    fn name(&self) -> &'static str {
        "Ramp"
    }
}

/// Spike pattern (one sudden burst)
pub struct SpikeIntensity {
    normal_rate: f64,
    spike_rate: f64,
    spike_start: Duration,
    spike_duration: Duration,
}

impl SpikeIntensity {
    pub fn new(
        normal_rate: f64,
        spike_rate: f64,
        spike_start: Duration,
        spike_duration: Duration,
    ) -> Result<Self> {
        ensure_rate("normal_rate", normal_rate)?;
        ensure_rate("spike_rate", spike_rate)?;
        ensure_period("spike_duration", spike_duration)?;
        ensure_bound("Spike", normal_rate.max(spike_rate))?;
        Ok(Self { normal_rate, spike_rate, spike_start, spike_duration })
    }
}

impl IntensityFunction for SpikeIntensity {
    fn rate_at(&mut self, elapsed: Duration) -> f64 {
        let spike_end = self.spike_start.saturating_add(self.spike_duration);
        if elapsed >= self.spike_start && elapsed < spike_end {
            self.spike_rate
        } else {
            self.normal_rate
        }
    }

    fn upper_bound(&self) -> f64 {
        self.normal_rate.max(self.spike_rate)
    }

    fn name(&self) -> &'static str {
        "Spike"
    }
}

/// Sinusoidal pattern (daily-cycle style oscillation), floored at zero
pub struct SinusoidalIntensity {
    base_rate: f64,
    amplitude: f64,
    period: Duration,
    phase_shift: Duration,
}

impl SinusoidalIntensity {
    /// The rate varies between `max(0, base_rate - amplitude)` and `base_rate + amplitude`.
    pub fn new(base_rate: f64, amplitude: f64, period: Duration) -> Result<Self> {
        if !(base_rate > 0.0) || !base_rate.is_finite() {
            return Err(Error::config(format!("base_rate must be finite and > 0, got {base_rate}")));
        }
        ensure_rate("amplitude", amplitude)?;
        ensure_period("Sinusoidal period", period)?;
        Ok(Self { base_rate, amplitude, period, phase_shift: Duration::ZERO })
    }

    pub fn with_phase_shift(mut self, phase_shift: Duration) -> Self {
        self.phase_shift = phase_shift;
        self
    }
}

impl IntensityFunction for SinusoidalIntensity {
    fn rate_at(&mut self, elapsed: Duration) -> f64 {
        let angle = 2.0 * std::f64::consts::PI * cycle_position(elapsed, self.phase_shift, self.period);
        (self.base_rate + self.amplitude * angle.sin()).max(0.0)
    }

    fn upper_bound(&self) -> f64 {
        self.base_rate + self.amplitude
    }

    fn name(&self) -> &'static str {
        "Sinusoidal"
    }
}

/// Sawtooth pattern (repeated ramps from `min_rate` to `max_rate`)
pub struct SawtoothIntensity {
    min_rate: f64,
    max_rate: f64,
    period: Duration,
}

impl SawtoothIntensity {
    pub fn new(min_rate: f64, max_rate: f64, period: Duration) -> Result<Self> {
        ensure_rate("min_rate", min_rate)?;
        ensure_rate("max_rate", max_rate)?;
        if min_rate >= max_rate {
            return Err(Error::config(format!(
                "Sawtooth min_rate ({min_rate}) must be < max_rate ({max_rate})"
            )));
        }
        ensure_period("Sawtooth period", period)?;
        Ok(Self { min_rate, max_rate, period })
    }
}

impl IntensityFunction for SawtoothIntensity {
    fn rate_at(&mut self, elapsed: Duration) -> f64 {
        let position = cycle_position(elapsed, Duration::ZERO, self.period);
        self.min_rate + (self.max_rate - self.min_rate) * position
    }

    fn upper_bound(&self) -> f64 {
        self.max_rate
    }

    fn name(&self) -> &'static str {
        "Sawtooth"
    }
}

/// Expected number of arrivals in `[from, to)`: the integral of λ(t), midpoint rule.
pub fn expected_arrivals(
    intensity: &mut dyn IntensityFunction,
    from: Duration,
    to: Duration,
    steps: u32,
) -> f64 {
    if to <= from || steps == 0 {
        return 0.0;
    }
    let width = (to - from).as_secs_f64() / steps as f64;
    (0..steps)
        .map(|i| {
            let offset = Duration::try_from_secs_f64(width * (i as f64 + 0.5)).unwrap_or(Duration::MAX);
            let mid = from.saturating_add(offset);
            intensity.rate_at(mid) * width
        })
        .sum()
}
