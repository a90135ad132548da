//! Workload shaping: intensity functions and batch sizes

pub mod intensity;

// Re-export samplers from surge-common
pub use surge_common::distributions;
pub use surge_common::{BatchSizeSampler, FixedBatchSize, GeometricBatchSize};

pub use intensity::{
    expected_arrivals, ConstantIntensity, IntensityFunction, RampIntensity, SawtoothIntensity,
    SinusoidalIntensity, SpikeIntensity, SquareWaveIntensity,
};
