// SPDX-License-Identifier: MIT OR Apache-2.0
//! Configuration loading and validation for the logpipe engine.
//!
//! This crate provides [`EngineConfig`] (worker pool sizing, step ceiling,
//! queue depth and the pipeline topology) together with helpers for loading
//! from TOML files, applying environment overrides, and producing advisory
//! [`ConfigWarning`]s.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during configuration loading or validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The requested configuration file was not found.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// Path that was requested.
        path: String,
    },

    /// The file could not be parsed as valid TOML.
    #[error("failed to parse config: {reason}")]
    ParseError {
        /// Human-readable parse error detail.
        reason: String,
    },

    /// An environment override held a value of the wrong shape.
    #[error("invalid value for {var}: {reason}")]
    InvalidOverride {
        /// Variable name.
        var: String,
        /// Parse failure detail.
        reason: String,
    },

    /// Semantic validation failed (one or more problems).
    #[error("config validation failed: {reasons:?}")]
    ValidationError {
        /// Individual validation failure messages.
        reasons: Vec<String>,
    },
}

// ---------------------------------------------------------------------------
// Warnings
// ---------------------------------------------------------------------------

/// Advisory-level issues that do not prevent operation but deserve attention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// An asynchronous processor waits unusually long before timing out.
    LargeTimeout {
        /// Location of the processor.
        processor: String,
        /// Timeout in seconds.
        secs: u64,
    },
    /// Events finishing this pipeline have nowhere to go and will be counted
    /// as failed.
    NoDestination {
        /// Pipeline name.
        pipeline: String,
    },
    /// An output queue is declared for a pipeline that does not exist.
    UnusedOutput {
        /// Output name.
        output: String,
    },
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::LargeTimeout { processor, secs } => {
                write!(f, "{processor} has a large timeout ({secs}s)")
            }
            ConfigWarning::NoDestination { pipeline } => {
                write!(
                    f,
                    "pipeline '{pipeline}' has neither a next pipeline nor an output"
                )
            }
            ConfigWarning::UnusedOutput { output } => {
                write!(f, "output '{output}' does not match any pipeline")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

/// Top-level engine configuration.
///
/// ```
/// let cfg = logpipe_config::parse_toml(r#"
/// workers = 4
///
/// [pipelines.main]
/// steps = [{ type = "set", field = "seen", value = true }]
///
/// [outputs.main]
/// capacity = 10
/// "#).unwrap();
/// assert_eq!(cfg.workers, 4);
/// assert!(logpipe_config::validate_config(&cfg).unwrap().is_empty());
/// ```
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct EngineConfig {
    /// Number of worker threads sharing the input queue.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Maximum processor steps per event before it is failed as a loop.
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,

    /// Capacity of the shared input queue.
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,

    /// Interval between sweeps of expired paused events, in milliseconds.
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,

    /// Timeout of asynchronous processors that do not set their own.
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,

    /// Log level override (e.g. `"debug"`, `"info"`, `"warn"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    /// Named pipelines.
    #[serde(default)]
    pub pipelines: BTreeMap<String, PipelineConfig>,

    /// Output queues, keyed by the pipeline feeding them.
    #[serde(default)]
    pub outputs: BTreeMap<String, OutputConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_steps: default_max_steps(),
            queue_depth: default_queue_depth(),
            sweep_interval_ms: default_sweep_interval_ms(),
            default_timeout_secs: default_timeout_secs(),
            log_level: None,
            pipelines: BTreeMap::new(),
            outputs: BTreeMap::new(),
        }
    }
}

impl EngineConfig {
    /// Sweep interval as a [`Duration`].
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    /// Default asynchronous timeout as a [`Duration`].
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }
}

fn default_workers() -> usize {
    2
}

fn default_max_steps() -> u32 {
    2048
}

fn default_queue_depth() -> usize {
    100
}

fn default_sweep_interval_ms() -> u64 {
    1_000
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_lanes() -> usize {
    1
}

fn default_capacity() -> usize {
    100
}

/// A named pipeline.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct PipelineConfig {
    /// Pipeline receiving events once this one finishes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,

    /// Lanes per step. Each event runs through exactly one lane per step.
    #[serde(default = "default_lanes")]
    pub lanes: usize,

    /// Ordered processors.
    #[serde(default)]
    pub steps: Vec<ProcessorConfig>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            next: None,
            lanes: default_lanes(),
            steps: Vec::new(),
        }
    }
}

/// An output queue drained by an external sender.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct OutputConfig {
    /// Queue capacity.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
        }
    }
}

/// One processor together with its continuations.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ProcessorConfig {
    /// Display name; defaults to the processor type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// What the processor does.
    #[serde(flatten)]
    pub kind: ProcessorKindConfig,

    /// Runs next when the business result is `true`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<Box<ProcessorConfig>>,

    /// Runs next when the business result is `false`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<Box<ProcessorConfig>>,

    /// Runs next when processing raised a recoverable error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception: Option<Box<ProcessorConfig>>,
}

impl ProcessorConfig {
    /// Processor without continuations.
    pub fn new(kind: ProcessorKindConfig) -> Self {
        Self {
            name: None,
            kind,
            success: None,
            failure: None,
            exception: None,
        }
    }

    /// Configured name, falling back to the type tag.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or_else(|| self.kind.type_name())
    }
}

/// Built-in processor types, selected by the `type` key.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProcessorKindConfig {
    /// Replace a field's value through a lookup table.
    Mapper {
        /// Field to rewrite.
        field: String,
        /// Lookup table keyed by the field's current value.
        map: BTreeMap<String, Value>,
    },
    /// Assign a constant.
    Set {
        /// Field to write.
        field: String,
        /// Value to store.
        value: Value,
    },
    /// Move a field to a new name.
    Rename {
        /// Source field.
        from: String,
        /// Destination field.
        to: String,
    },
    /// Delete a field.
    Remove {
        /// Field to delete.
        field: String,
    },
    /// Business result is whether a field equals a value.
    Matches {
        /// Field to compare.
        field: String,
        /// Expected value.
        value: Value,
    },
    /// Always raise a recoverable processing error.
    Fail {
        /// Error message.
        message: String,
    },
    /// Log the event through tracing.
    Log {
        /// One of the recognised log levels; defaults to `info`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        level: Option<String>,
        /// Message logged alongside the event.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// Drop the event.
    Drop,
    /// Submit a copy of the event into another pipeline.
    Fork {
        /// Destination pipeline.
        destination: String,
    },
    /// Narrow the field view to a dotted path.
    Wrap {
        /// Dotted field path.
        path: String,
    },
    /// Restore the parent field view.
    Unwrap,
    /// Suspend the event and resume it after a delay.
    Delay {
        /// Delay before completion, in milliseconds.
        #[serde(default)]
        millis: u64,
        /// Never complete; the timeout drives resumption.
        #[serde(default)]
        never: bool,
        /// Suspension timeout in milliseconds, defaulting to the engine's.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
        /// Field receiving the completion value.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        field: Option<String>,
    },
}

impl ProcessorKindConfig {
    /// The `type` tag of this processor.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Mapper { .. } => "mapper",
            Self::Set { .. } => "set",
            Self::Rename { .. } => "rename",
            Self::Remove { .. } => "remove",
            Self::Matches { .. } => "matches",
            Self::Fail { .. } => "fail",
            Self::Log { .. } => "log",
            Self::Drop => "drop",
            Self::Fork { .. } => "fork",
            Self::Wrap { .. } => "wrap",
            Self::Unwrap => "unwrap",
            Self::Delay { .. } => "delay",
        }
    }
}

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Maximum allowed timeout in seconds (24 hours).
const MAX_TIMEOUT_SECS: u64 = 86_400;

/// Threshold above which a timeout generates a warning.
const LARGE_TIMEOUT_THRESHOLD: u64 = 3_600;

/// Recognised log levels.
pub const VALID_LOG_LEVELS: &[&str] = &["error", "warn", "info", "debug", "trace"];

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Load an [`EngineConfig`] from an optional TOML file path.
///
/// * If `path` is `Some`, reads and parses the file.
/// * If `path` is `None`, returns [`EngineConfig::default()`].
///
/// Environment variable overrides are applied on top in both cases.
pub fn load_config(path: Option<&Path>) -> Result<EngineConfig, ConfigError> {
    let mut config = match path {
        Some(p) => {
            let content = std::fs::read_to_string(p).map_err(|_| ConfigError::FileNotFound {
                path: p.display().to_string(),
            })?;
            parse_toml(&content)?
        }
        None => EngineConfig::default(),
    };
    apply_env_overrides(&mut config)?;
    Ok(config)
}

/// Parse a TOML string into an [`EngineConfig`].
pub fn parse_toml(content: &str) -> Result<EngineConfig, ConfigError> {
    toml::from_str::<EngineConfig>(content).map_err(|e| ConfigError::ParseError {
        reason: e.to_string(),
    })
}

/// JSON schema of the configuration file.
pub fn config_schema() -> schemars::Schema {
    schemars::schema_for!(EngineConfig)
}

// ---------------------------------------------------------------------------
// Env overrides
// ---------------------------------------------------------------------------

/// Apply environment variable overrides.
///
/// Recognised variables:
/// - `LOGPIPE_WORKERS`
/// - `LOGPIPE_MAX_STEPS`
/// - `LOGPIPE_QUEUE_DEPTH`
/// - `LOGPIPE_LOG_LEVEL`
pub fn apply_env_overrides(config: &mut EngineConfig) -> Result<(), ConfigError> {
    apply_overrides(config, |var| std::env::var(var).ok())
}

/// Apply overrides read through `lookup` instead of the process environment.
pub fn apply_overrides<F>(config: &mut EngineConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(val) = lookup("LOGPIPE_WORKERS") {
        config.workers = parse_override("LOGPIPE_WORKERS", &val)?;
    }
    if let Some(val) = lookup("LOGPIPE_MAX_STEPS") {
        config.max_steps = parse_override("LOGPIPE_MAX_STEPS", &val)?;
    }
    if let Some(val) = lookup("LOGPIPE_QUEUE_DEPTH") {
        config.queue_depth = parse_override("LOGPIPE_QUEUE_DEPTH", &val)?;
    }
    if let Some(val) = lookup("LOGPIPE_LOG_LEVEL") {
        config.log_level = Some(val);
    }
    Ok(())
}

fn parse_override<T>(var: &str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidOverride {
            var: var.to_string(),
            reason: e.to_string(),
        })
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a parsed configuration, returning advisory warnings.
///
/// Hard errors (zero-sized pools, dangling pipeline references, out-of-range
/// timeouts) are returned as a [`ConfigError::ValidationError`]; soft issues
/// come back as warnings.
pub fn validate_config(config: &EngineConfig) -> Result<Vec<ConfigWarning>, ConfigError> {
    let mut errors: Vec<String> = Vec::new();
    let mut warnings: Vec<ConfigWarning> = Vec::new();

    if let Some(ref level) = config.log_level
        && !VALID_LOG_LEVELS.contains(&level.as_str())
    {
        errors.push(format!(
            "invalid log_level '{level}' (expected one of: {})",
            VALID_LOG_LEVELS.join(", ")
        ));
    }

    if config.workers == 0 {
        errors.push("workers must be at least 1".into());
    }
    if config.max_steps == 0 {
        errors.push("max_steps must be at least 1".into());
    }
    if config.queue_depth == 0 {
        errors.push("queue_depth must be at least 1".into());
    }
    if config.sweep_interval_ms == 0 {
        errors.push("sweep_interval_ms must be at least 1".into());
    }
    if config.default_timeout_secs == 0 || config.default_timeout_secs > MAX_TIMEOUT_SECS {
        errors.push(format!(
            "default_timeout_secs {} out of range (1..{MAX_TIMEOUT_SECS})",
            config.default_timeout_secs
        ));
    } else if config.default_timeout_secs > LARGE_TIMEOUT_THRESHOLD {
        warnings.push(ConfigWarning::LargeTimeout {
            processor: "default_timeout_secs".into(),
            secs: config.default_timeout_secs,
        });
    }

    let names: BTreeSet<&str> = config.pipelines.keys().map(String::as_str).collect();

    for (name, pipeline) in &config.pipelines {
        if name.trim().is_empty() {
            errors.push("pipeline name must not be empty".into());
        }
        if pipeline.lanes == 0 {
            errors.push(format!("pipeline '{name}': lanes must be at least 1"));
        }
        match pipeline.next.as_deref() {
            Some(next) if !names.contains(next) => {
                errors.push(format!(
                    "pipeline '{name}': next pipeline '{next}' is not defined"
                ));
            }
            Some(next) if next == name => {
                errors.push(format!("pipeline '{name}': next pipeline is itself"));
            }
            Some(_) => {}
            None if !config.outputs.contains_key(name) => {
                warnings.push(ConfigWarning::NoDestination {
                    pipeline: name.clone(),
                });
            }
            None => {}
        }
        for (index, step) in pipeline.steps.iter().enumerate() {
            let location = format!("pipeline '{name}' step {index}");
            validate_processor(step, &location, &names, &mut errors, &mut warnings);
        }
    }

    for (output, cfg) in &config.outputs {
        if !names.contains(output.as_str()) {
            warnings.push(ConfigWarning::UnusedOutput {
                output: output.clone(),
            });
        }
        if cfg.capacity == 0 {
            errors.push(format!("output '{output}': capacity must be at least 1"));
        }
    }

    if errors.is_empty() {
        Ok(warnings)
    } else {
        Err(ConfigError::ValidationError { reasons: errors })
    }
}

fn validate_processor(
    processor: &ProcessorConfig,
    location: &str,
    pipelines: &BTreeSet<&str>,
    errors: &mut Vec<String>,
    warnings: &mut Vec<ConfigWarning>,
) {
    let here = format!("{location} ({})", processor.display_name());
    let require = |errors: &mut Vec<String>, label: &str, value: &str| {
        if value.trim().is_empty() {
            errors.push(format!("{here}: {label} must not be empty"));
        }
    };

    match &processor.kind {
        ProcessorKindConfig::Mapper { field, .. }
        | ProcessorKindConfig::Set { field, .. }
        | ProcessorKindConfig::Remove { field }
        | ProcessorKindConfig::Matches { field, .. } => require(errors, "field", field),
        ProcessorKindConfig::Rename { from, to } => {
            require(errors, "from", from);
            require(errors, "to", to);
        }
        ProcessorKindConfig::Wrap { path } => {
            if path.split('.').any(|segment| segment.trim().is_empty()) {
                errors.push(format!("{here}: invalid path '{path}'"));
            }
        }
        ProcessorKindConfig::Fork { destination } => {
            if !pipelines.contains(destination.as_str()) {
                errors.push(format!(
                    "{here}: fork destination '{destination}' is not defined"
                ));
            }
        }
        ProcessorKindConfig::Log {
            level: Some(level), ..
        } if !VALID_LOG_LEVELS.contains(&level.as_str()) => {
            errors.push(format!("{here}: invalid level '{level}'"));
        }
        ProcessorKindConfig::Delay {
            timeout_ms: Some(ms),
            ..
        } => {
            if *ms == 0 || *ms > MAX_TIMEOUT_SECS * 1_000 {
                errors.push(format!(
                    "{here}: timeout_ms {ms} out of range (1..{})",
                    MAX_TIMEOUT_SECS * 1_000
                ));
            } else if *ms > LARGE_TIMEOUT_THRESHOLD * 1_000 {
                warnings.push(ConfigWarning::LargeTimeout {
                    processor: here.clone(),
                    secs: ms / 1_000,
                });
            }
        }
        _ => {}
    }

    for (label, next) in [
        ("success", &processor.success),
        ("failure", &processor.failure),
        ("exception", &processor.exception),
    ] {
        if let Some(next) = next {
            let nested = format!("{location} {label}");
            validate_processor(next, &nested, pipelines, errors, warnings);
        }
    }
}
