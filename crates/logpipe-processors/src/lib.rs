// SPDX-License-Identifier: MIT OR Apache-2.0
//! Built-in processors and pipeline construction from configuration.
//!
//! [`build_pipelines`] turns the `[pipelines]` section of an
//! [`EngineConfig`] into immutable [`Pipeline`]s ready to hand to the engine.
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Logging and failure transforms.
pub mod control;
/// The timer-driven asynchronous processor.
pub mod delay;
/// Field transforms.
pub mod fields;

use logpipe_config::{EngineConfig, PipelineConfig, ProcessorConfig, ProcessorKindConfig};
use logpipe_core::{PipeStep, Pipeline, Processor};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{Level, debug};

pub use control::{Fail, Log};
pub use delay::Delay;
pub use fields::{Mapper, Matches, Remove, Rename, Set};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised while turning configuration into processors.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// A processor's settings cannot be used.
    #[error("invalid processor {processor}: {reason}")]
    InvalidProcessor {
        /// Processor location.
        processor: String,
        /// What is wrong.
        reason: String,
    },

    /// A pipeline or fork refers to a pipeline that is not configured.
    #[error("{referrer} refers to unknown pipeline '{pipeline}'")]
    UnknownPipeline {
        /// Referenced pipeline.
        pipeline: String,
        /// Where the reference appears.
        referrer: String,
    },

    /// An asynchronous processor needs a tokio runtime and none was given.
    #[error("processor {processor} needs a tokio runtime")]
    MissingRuntime {
        /// Processor location.
        processor: String,
    },
}

// ---------------------------------------------------------------------------
// Build context
// ---------------------------------------------------------------------------

/// Settings shared by every processor being built.
#[derive(Debug, Clone)]
pub struct BuildContext {
    default_timeout: Duration,
    runtime: Option<Handle>,
}

impl BuildContext {
    /// Context whose asynchronous processors time out after
    /// `default_timeout` unless they set their own.
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            default_timeout,
            runtime: None,
        }
    }

    /// Context derived from an engine configuration.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.default_timeout())
    }

    /// Runtime used by timer-driven processors.
    #[must_use]
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Default asynchronous timeout.
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

/// Build every configured pipeline.
pub fn build_pipelines(
    config: &EngineConfig,
    ctx: &BuildContext,
) -> Result<BTreeMap<String, Arc<Pipeline>>, BuildError> {
    let mut pipelines = BTreeMap::new();
    for (name, pipeline) in &config.pipelines {
        if let Some(next) = &pipeline.next
            && !config.pipelines.contains_key(next)
        {
            return Err(BuildError::UnknownPipeline {
                pipeline: next.clone(),
                referrer: format!("pipeline '{name}'"),
            });
        }
        let built = build_pipeline(name, pipeline, ctx)?;
        pipelines.insert(name.clone(), Arc::new(built));
    }

    for pipeline in pipelines.values() {
        for step in pipeline.steps() {
            for lane in step.lanes() {
                check_forks(lane, &pipelines, pipeline.name())?;
            }
        }
    }
    debug!(target: "logpipe.processors", count = pipelines.len(), "pipelines built");
    Ok(pipelines)
}

/// Build one pipeline. Every step gets `lanes` independent instances.
pub fn build_pipeline(
    name: &str,
    config: &PipelineConfig,
    ctx: &BuildContext,
) -> Result<Pipeline, BuildError> {
    if config.lanes == 0 {
        return Err(BuildError::InvalidProcessor {
            processor: format!("pipeline '{name}'"),
            reason: "lanes must be at least 1".into(),
        });
    }
    let mut pipeline = Pipeline::new(name);
    for (index, step) in config.steps.iter().enumerate() {
        let location = format!("{name}[{index}]");
        let lanes = (0..config.lanes)
            .map(|_| build_processor(step, &location, ctx).map(Arc::new))
            .collect::<Result<Vec<_>, _>>()?;
        pipeline = pipeline.step(PipeStep::with_lanes(lanes));
    }
    if let Some(next) = &config.next {
        pipeline = pipeline.then(next.clone());
    }
    Ok(pipeline)
}

/// Build one processor and its continuations. `location` prefixes error
/// messages.
pub fn build_processor(
    config: &ProcessorConfig,
    location: &str,
    ctx: &BuildContext,
) -> Result<Processor, BuildError> {
    let name = config.display_name().to_string();
    let here = format!("{location} ({name})");
    let processor = match &config.kind {
        ProcessorKindConfig::Mapper { field, map } => {
            Processor::transform(name, Mapper::new(field.clone(), map.clone()))
        }
        ProcessorKindConfig::Set { field, value } => {
            Processor::transform(name, Set::new(field.clone(), value.clone()))
        }
        ProcessorKindConfig::Rename { from, to } => {
            Processor::transform(name, Rename::new(from.clone(), to.clone()))
        }
        ProcessorKindConfig::Remove { field } => {
            Processor::transform(name, Remove::new(field.clone()))
        }
        ProcessorKindConfig::Matches { field, value } => {
            Processor::transform(name, Matches::new(field.clone(), value.clone()))
        }
        ProcessorKindConfig::Fail { message } => {
            Processor::transform(name, Fail::new(message.clone()))
        }
        ProcessorKindConfig::Log { level, message } => {
            let level = match level.as_deref() {
                None => Level::INFO,
                Some(level) => {
                    level
                        .parse::<Level>()
                        .map_err(|e| BuildError::InvalidProcessor {
                            processor: here.clone(),
                            reason: e.to_string(),
                        })?
                }
            };
            let message = message.clone().unwrap_or_else(|| name.clone());
            Processor::transform(name, Log::new(level, message))
        }
        ProcessorKindConfig::Drop => Processor::drop_event(name),
        ProcessorKindConfig::Fork { destination } => Processor::fork(name, destination.clone()),
        ProcessorKindConfig::Wrap { path } => {
            let segments: Vec<&str> = path.split('.').map(str::trim).collect();
            if segments.iter().any(|s| s.is_empty()) {
                return Err(BuildError::InvalidProcessor {
                    processor: here,
                    reason: format!("invalid path '{path}'"),
                });
            }
            Processor::wrap(name, segments)
        }
        ProcessorKindConfig::Unwrap => Processor::unwrap(name),
        ProcessorKindConfig::Delay {
            millis,
            never,
            timeout_ms,
            field,
        } => {
            let runtime = ctx
                .runtime
                .clone()
                .ok_or_else(|| BuildError::MissingRuntime {
                    processor: here.clone(),
                })?;
            let mut delay = Delay::new(Duration::from_millis(*millis), runtime);
            if *never {
                delay = delay.never();
            }
            if let Some(field) = field {
                delay = delay.into_field(field.clone());
            }
            let timeout = timeout_ms.map_or(ctx.default_timeout, Duration::from_millis);
            Processor::asynchronous(name, delay, timeout)
        }
    };

    let continuation = |next: &Option<Box<ProcessorConfig>>, label: &str| {
        next.as_deref()
            .map(|cfg| build_processor(cfg, &format!("{location}.{label}"), ctx).map(Arc::new))
            .transpose()
    };
    Ok(processor.with_continuations(
        continuation(&config.success, "success")?,
        continuation(&config.failure, "failure")?,
        continuation(&config.exception, "exception")?,
    ))
}

fn check_forks(
    processor: &Processor,
    pipelines: &BTreeMap<String, Arc<Pipeline>>,
    owner: &str,
) -> Result<(), BuildError> {
    if let logpipe_core::ProcessorKind::Fork { destination } = processor.kind()
        && !pipelines.contains_key(destination)
    {
        return Err(BuildError::UnknownPipeline {
            pipeline: destination.clone(),
            referrer: format!("fork '{}' in pipeline '{owner}'", processor.name()),
        });
    }
    for next in [processor.success(), processor.failure(), processor.exception()]
        .into_iter()
        .flatten()
    {
        check_forks(next, pipelines, owner)?;
    }
    Ok(())
}
