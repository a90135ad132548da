use clap::{Parser, Subcommand};
use schemars::schema_for;
use std::path::{Path, PathBuf};
use std::time::Duration;
use surge_cli::config::ProfileConfig;
use surge_cli::pipeline;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Surge: load shaping for bursty, time-varying workloads
///
/// Surge uses TOML configuration files (profiles) to describe an experiment:
/// a non-homogeneous arrival intensity, compound batches, an optional credit
/// gate and an optional urgent/bulk priority dispatcher in front of an
/// emulated consumer.
///
/// Example usage:
///   surge run -P profiles/square-wave-gated.toml
///   surge run -P profiles/spike-dispatch.toml --set experiment.duration=30s
///   surge simulate -P profiles/constant-direct.toml --horizon 1h
///   surge schema > profile.schema.json
///
/// Override any config value using dot notation:
///   --set experiment.seed=7
///   --set intensity.high_rate=50.0
///   --set gate.initial_credits=16
///   --set 'intensity={type="constant",rate=5.0}'
#[derive(Parser)]
#[command(name = "surge")]
#[command(version, about = "Load shaper with stochastic arrivals, credit gating and priority dispatch", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline described by a profile in real time
    Run {
        /// Path to TOML profile configuration file (REQUIRED)
        #[arg(short = 'P', long, required = true)]
        profile: PathBuf,

        /// Override any configuration value using dot notation (can be specified multiple times)
        ///
        /// Examples:
        ///   --set experiment.duration=60s
        ///   --set experiment.seed=999
        ///   --set dispatcher.urgent_fraction=0.5
        ///   --set output.file=/tmp/results.json
        #[arg(long = "set", value_name = "KEY=VALUE")]
        set: Vec<String>,
    },

    /// Run only the arrival process over virtual time and compare it with the intensity integral
    Simulate {
        /// Path to TOML profile configuration file (REQUIRED)
        #[arg(short = 'P', long, required = true)]
        profile: PathBuf,

        /// Override any configuration value using dot notation
        #[arg(long = "set", value_name = "KEY=VALUE")]
        set: Vec<String>,

        /// Virtual time to simulate (defaults to experiment.duration)
        #[arg(long, value_parser = humantime::parse_duration)]
        horizon: Option<Duration>,
    },

    /// Generate JSON Schema for configuration files
    Schema,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Commands::Schema => {
            let schema = schema_for!(ProfileConfig);
            println!("{}", serde_json::to_string_pretty(&schema)?);
            Ok(())
        }
        Commands::Run { profile, set } => run_experiment(profile, set),
        Commands::Simulate { profile, set, horizon } => run_simulation(profile, set, horizon),
    }
}

fn load_profile(profile: &Path, set: &[String]) -> anyhow::Result<ProfileConfig> {
    tracing::info!("Loading profile: {}", profile.display());
    ProfileConfig::from_file_with_overrides(profile, set)
}

fn run_experiment(profile: PathBuf, set: Vec<String>) -> anyhow::Result<()> {
    let config = load_profile(&profile, &set)?;

    tracing::info!("=== Experiment Configuration ===");
    tracing::info!("Name: {}", config.experiment.name);
    if let Some(desc) = &config.experiment.description {
        tracing::info!("Description: {}", desc);
    }
    if let Some(seed) = config.experiment.seed {
        tracing::info!("Seed: {} (reproducible mode)", seed);
    }
    tracing::info!("Duration: {:?}", config.experiment.duration);
    tracing::info!("Intensity: {:?}", config.intensity);
    tracing::info!(
        "Batches: mean {}, spread {:?}",
        config.generator.batch_mean,
        config.generator.intra_batch_spread
    );
    match &config.gate {
        Some(gate) => tracing::info!("Gate: {:?}", gate),
        None => tracing::info!("Gate: disabled"),
    }
    match &config.dispatcher {
        Some(dispatcher) => tracing::info!(
            "Dispatcher: {:?}, urgent fraction {}",
            dispatcher.config,
            dispatcher.urgent_fraction
        ),
        None => tracing::info!("Dispatcher: disabled"),
    }
    tracing::info!("Consumer service time: {:?}", config.consumer.service_time);
    tracing::info!("================================");

    let results = pipeline::run(&config)?;
    results.print_human();

    if let Some(path) = &config.output.file {
        results.write_json(path)?;
        tracing::info!("Results written to: {}", path.display());
    }
    Ok(())
}

fn run_simulation(profile: PathBuf, set: Vec<String>, horizon: Option<Duration>) -> anyhow::Result<()> {
    let config = load_profile(&profile, &set)?;
    let report = pipeline::simulate(&config, horizon)?;
    report.print_human();

    if let Some(path) = &config.output.file {
        report.write_json(path)?;
        tracing::info!("Simulation written to: {}", path.display());
    }
    Ok(())
}
