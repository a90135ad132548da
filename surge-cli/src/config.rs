//! Profile files for surge experiments
//!
//! A profile is a TOML file describing one run: the arrival intensity, how
//! arrivals are batched, whether they pass through a credit gate and a
//! priority dispatcher, and how long the emulated consumer takes per item.
//! Any value can be overridden from the command line with `--set key=value`.

use anyhow::{bail, Context, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use surge_core::{DispatcherConfig, GateConfig, GeneratorConfig, IntensityConfig};

/// Top-level profile configuration
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
pub struct ProfileConfig {
    pub experiment: ExperimentConfig,
    /// Arrival-rate shape; defaults to the 2/10 events/s square wave
    #[serde(default)]
    pub intensity: IntensityConfig,
    #[serde(default)]
    pub generator: GeneratorSection,
    /// Credit gate between generator and consumer; omitted means no backpressure
    #[serde(default)]
    pub gate: Option<GateConfig>,
    /// Two-lane dispatcher; omitted means items go straight to the consumer
    #[serde(default)]
    pub dispatcher: Option<DispatcherSection>,
    #[serde(default)]
    pub consumer: ConsumerConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// Experiment metadata
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
pub struct ExperimentConfig {
    /// Experiment name
    pub name: String,
    /// Optional description
    #[serde(default)]
    pub description: Option<String>,
    /// Random seed for reproducibility (None = use entropy)
    #[serde(default)]
    pub seed: Option<u64>,
    /// How long the generator produces arrivals
    #[serde(with = "humantime_serde")]
    #[schemars(with = "String")]
    pub duration: Duration,
}

/// Batching and shutdown settings of the arrival generator
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(default)]
pub struct GeneratorSection {
    /// Mean compound-batch size (>= 1)
    pub batch_mean: f64,
    /// Window over which the items of one batch are spread
    #[serde(with = "humantime_serde")]
    #[schemars(with = "String")]
    pub intra_batch_spread: Duration,
    /// Upper bound on the wait for in-flight work after the run ends
    #[serde(with = "humantime_serde")]
    #[schemars(with = "String")]
    pub grace_period: Duration,
}

impl Default for GeneratorSection {
    fn default() -> Self {
        let defaults = GeneratorConfig::default();
        Self {
            batch_mean: defaults.batch_mean,
            intra_batch_spread: defaults.intra_batch_spread,
            grace_period: defaults.grace_period,
        }
    }
}

/// Dispatcher settings plus ingress classification
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
pub struct DispatcherSection {
    #[serde(flatten)]
    pub config: DispatcherConfig,
    /// Probability that a generated item is classified urgent
    #[serde(default = "default_urgent_fraction")]
    pub urgent_fraction: f64,
}

fn default_urgent_fraction() -> f64 {
    0.2
}

/// Emulated downstream consumer
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(default)]
pub struct ConsumerConfig {
    /// Time spent on each item
    #[serde(with = "humantime_serde")]
    #[schemars(with = "String")]
    pub service_time: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self { service_time: Duration::from_millis(5) }
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(default)]
pub struct OutputConfig {
    /// Length of each logged metrics window
    #[serde(with = "humantime_serde")]
    #[schemars(with = "String")]
    pub metrics_interval: Duration,
    /// Write the results as JSON to this file
    pub file: Option<PathBuf>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self { metrics_interval: Duration::from_secs(1), file: None }
    }
}

impl ProfileConfig {
    /// Load profile from TOML file
    ///
    /// The result is not validated; call [`Self::validate`] or use
    /// [`Self::from_file_with_overrides`].
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load profile from TOML file, apply `--set` style overrides, and validate
    pub fn from_file_with_overrides<P: AsRef<Path>>(path: P, overrides: &[String]) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut value: toml::Value = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        for override_str in overrides {
            let (key, val) = parse_key_value(override_str)
                .with_context(|| format!("Invalid override format: {}", override_str))?;

            set_toml_path(&mut value, &key, &val)
                .with_context(|| format!("Failed to apply override: {}", override_str))?;
        }

        let config: ProfileConfig =
            value.try_into().context("Failed to deserialize modified configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.experiment.name.is_empty() {
            bail!("Experiment name cannot be empty");
        }
        if self.experiment.duration.is_zero() {
            bail!("Experiment duration must be > 0");
        }

        self.generator_config().validate()?;

        if let Some(gate) = &self.gate {
            gate.validate()?;
            if gate.initial_credits == 0 {
                bail!("gate.initial_credits must be > 0, otherwise nothing is ever admitted");
            }
        }

        if let Some(dispatcher) = &self.dispatcher {
            dispatcher.config.validate()?;
            if !(0.0..=1.0).contains(&dispatcher.urgent_fraction) {
                bail!(
                    "dispatcher.urgent_fraction must be in [0,1], got {}",
                    dispatcher.urgent_fraction
                );
            }
        }

        // Gate credits bound the items in flight; a lane that can fill up would
        // block the dispatch workers that return those credits
        if let (Some(gate), Some(dispatcher)) = (&self.gate, &self.dispatcher) {
            if gate.initial_credits as usize > dispatcher.config.queue_capacity {
                bail!(
                    "gate.initial_credits ({}) must not exceed dispatcher.queue_capacity ({})",
                    gate.initial_credits,
                    dispatcher.config.queue_capacity
                );
            }
        }

        if self.output.metrics_interval.is_zero() {
            bail!("output.metrics_interval must be > 0");
        }

        Ok(())
    }

    /// Generator configuration for this profile
    ///
    /// The run lasts `experiment.duration` and all randomness derives from
    /// `experiment.seed`.
    pub fn generator_config(&self) -> GeneratorConfig {
        GeneratorConfig {
            intensity: self.intensity.clone(),
            batch_mean: self.generator.batch_mean,
            intra_batch_spread: self.generator.intra_batch_spread,
            run_duration: Some(self.experiment.duration),
            grace_period: self.generator.grace_period,
            seed: self.experiment.seed,
        }
    }
}

/// Parse a "key=value" string into (key, value) tuple
fn parse_key_value(override_str: &str) -> Result<(String, String)> {
    match override_str.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => bail!("Invalid override format '{}'. Expected 'key=value'", override_str),
    }
}

/// Set a value in TOML using dot-notation path
///
/// Missing intermediate tables are created, numeric segments index arrays and
/// a trailing `+` appends to an array.
fn set_toml_path(root: &mut toml::Value, path: &str, value_str: &str) -> Result<()> {
    let parts = parse_path(path);
    let Some((last, parents)) = parts.split_last() else {
        bail!("Empty path");
    };

    let mut current = root;
    for part in parents {
        current = match part {
            PathSegment::Key(key) => {
                let toml::Value::Table(table) = current else {
                    bail!("Cannot navigate through non-table value at key '{}'", key);
                };
                table
                    .entry(key.clone())
                    .or_insert_with(|| toml::Value::Table(Default::default()))
            }
            PathSegment::Index(idx) => {
                let toml::Value::Array(arr) = current else {
                    bail!("Cannot index non-array value");
                };
                let len = arr.len();
                match arr.get_mut(*idx) {
                    Some(element) => element,
                    None => bail!("Array index {} out of bounds (length: {})", idx, len),
                }
            }
            PathSegment::Append => bail!("Append operation '+' can only be at the end of path"),
        };
    }

    let parsed_value = parse_value(value_str)?;
    match last {
        PathSegment::Key(key) => {
            let toml::Value::Table(table) = current else {
                bail!("Cannot set key '{}' on non-table value", key);
            };
            table.insert(key.clone(), parsed_value);
        }
        PathSegment::Index(idx) => {
            let toml::Value::Array(arr) = current else {
                bail!("Cannot index non-array value");
            };
            let len = arr.len();
            match arr.get_mut(*idx) {
                Some(element) => *element = parsed_value,
                None => bail!("Array index {} out of bounds (length: {})", idx, len),
            }
        }
        PathSegment::Append => {
            let toml::Value::Array(arr) = current else {
                bail!("Cannot append to non-array value");
            };
            arr.push(parsed_value);
        }
    }
    Ok(())
}

/// Parse a path string into segments (handles "key", "0", "+")
fn parse_path(path: &str) -> Vec<PathSegment> {
    path.split('.')
        .filter(|part| !part.is_empty())
        .map(|part| {
            if part == "+" {
                PathSegment::Append
            } else if let Ok(idx) = part.parse::<usize>() {
                PathSegment::Index(idx)
            } else {
                PathSegment::Key(part.to_string())
            }
        })
        .collect()
}

/// Path segment types
enum PathSegment {
    Key(String),
    Index(usize),
    Append,
}

/// Parse a string value with type inference
fn parse_value(value_str: &str) -> Result<toml::Value> {
    let trimmed = value_str.trim();

    match trimmed {
        "true" => return Ok(toml::Value::Boolean(true)),
        "false" => return Ok(toml::Value::Boolean(false)),
        _ => {}
    }

    if let Ok(int_val) = trimmed.parse::<i64>() {
        return Ok(toml::Value::Integer(int_val));
    }
    if let Ok(float_val) = trimmed.parse::<f64>() {
        return Ok(toml::Value::Float(float_val));
    }

    let is_array = trimmed.starts_with('[') && trimmed.ends_with(']');
    let is_table = trimmed.starts_with('{') && trimmed.ends_with('}');
    if is_array || is_table {
        let wrapped = format!("value = {}", trimmed);
        if let Ok(toml::Value::Table(mut table)) = toml::from_str::<toml::Value>(&wrapped) {
            if let Some(value) = table.remove("value") {
                return Ok(value);
            }
        }
        let kind = if is_array { "array" } else { "inline table" };
        bail!("Failed to parse {}: {}", kind, trimmed);
    }

    // Anything else is a string; surrounding quotes are optional
    let unquoted = trimmed
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .or_else(|| trimmed.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')))
        .unwrap_or(trimmed);

    Ok(toml::Value::String(unquoted.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(src: &str) -> toml::Value {
        toml::from_str(src).unwrap()
    }

    #[test]
    fn test_parse_value_inference() {
        assert_eq!(parse_value("true").unwrap(), toml::Value::Boolean(true));
        assert_eq!(parse_value("42").unwrap(), toml::Value::Integer(42));
        assert_eq!(parse_value("0.25").unwrap(), toml::Value::Float(0.25));
        assert_eq!(parse_value("30s").unwrap(), toml::Value::String("30s".to_string()));
        assert_eq!(parse_value("'quoted'").unwrap(), toml::Value::String("quoted".to_string()));
        assert_eq!(
            parse_value("[1, 2]").unwrap(),
            toml::Value::Array(vec![toml::Value::Integer(1), toml::Value::Integer(2)])
        );
        assert!(parse_value("[1, ]]").is_err(), "Malformed arrays are rejected");
    }

    #[test]
    fn test_parse_value_inline_table() {
        let value = parse_value("{ type = \"constant\", rate = 3.0 }").unwrap();
        let toml::Value::Table(t) = value else { panic!("Expected a table") };
        assert_eq!(t.get("type"), Some(&toml::Value::String("constant".to_string())));
    }

    #[test]
    fn test_set_creates_intermediate_tables() {
        let mut root = table("[experiment]\nname = \"x\"\n");
        set_toml_path(&mut root, "gate.initial_credits", "8").unwrap();
        assert_eq!(root["gate"]["initial_credits"], toml::Value::Integer(8));
    }

    #[test]
    fn test_set_array_index_and_append() {
        let mut root = table("values = [1, 2]\n");
        set_toml_path(&mut root, "values.0", "5").unwrap();
        set_toml_path(&mut root, "values.+", "9").unwrap();
        assert_eq!(
            root["values"],
            toml::Value::Array(vec![
                toml::Value::Integer(5),
                toml::Value::Integer(2),
                toml::Value::Integer(9)
            ])
        );
        assert!(set_toml_path(&mut root, "values.7", "1").is_err(), "Out of bounds index must fail");
        assert!(set_toml_path(&mut root, "values.+.x", "1").is_err(), "Append must be last");
    }

    #[test]
    fn test_parse_key_value() {
        assert_eq!(
            parse_key_value("experiment.seed=7").unwrap(),
            ("experiment.seed".to_string(), "7".to_string())
        );
        assert!(parse_key_value("no-equals").is_err());
        assert!(parse_key_value("=value").is_err());
    }
}
