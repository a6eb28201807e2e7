// SPDX-License-Identifier: MIT OR Apache-2.0
//! logpipe
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Facade over the logpipe workspace: re-exports the event model, the engine
//! and the built-in processors, and wires a parsed [`EngineConfig`] into a
//! running [`Engine`].
//!
//! ```no_run
//! use logpipe::{BuildContext, engine_from_config, load_config};
//! use std::path::Path;
//!
//! let config = load_config(Some(Path::new("logpipe.toml")))?;
//! let engine = engine_from_config(&config, &BuildContext::from_config(&config))?;
//! engine.submit("main", logpipe::Event::empty())?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub use logpipe_config::{
    ConfigError, ConfigWarning, EngineConfig, OutputConfig, PipelineConfig, ProcessorConfig,
    ProcessorKindConfig, load_config, parse_toml, validate_config,
};
pub use logpipe_core::{
    AsyncTransform, Completer, Completion, CompletionError, Event, EventError, PipeStep, Pipeline,
    Processor, ProcessorError, ProcessorKind, Transform,
};
pub use logpipe_engine::{
    Engine, EngineBuilder, EngineError, EventsRepository, LogTestSink, MemoryTestSink, TestSink,
};
pub use logpipe_processors::{BuildContext, BuildError, build_pipelines};
pub use logpipe_telemetry::{JsonExporter, Metrics, MetricsSnapshot, TelemetryExporter, names};

use tracing::info;

/// Errors raised while turning a configuration into a running engine.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    /// The configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A processor or pipeline could not be built.
    #[error(transparent)]
    Build(#[from] BuildError),

    /// The engine refused its settings or could not spawn threads.
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Engine builder preloaded with every pipeline, output and engine setting of
/// `config`. Callers may still adjust it (a test sink, shared metrics) before
/// starting.
///
/// The configuration is validated first; warnings are logged, errors abort.
pub fn builder_from_config(
    config: &EngineConfig,
    ctx: &BuildContext,
) -> Result<EngineBuilder, SetupError> {
    for warning in validate_config(config)? {
        tracing::warn!(target: "logpipe", "{warning}");
    }
    let pipelines = build_pipelines(config, ctx)?;
    let mut builder = Engine::builder()
        .pipelines(pipelines.into_values())
        .workers(config.workers)
        .max_steps(config.max_steps)
        .queue_depth(config.queue_depth)
        .sweep_interval(config.sweep_interval());
    for (name, output) in &config.outputs {
        builder = builder.output(name.clone(), output.capacity);
    }
    Ok(builder)
}

/// Validate `config`, build its pipelines and start an engine.
pub fn engine_from_config(config: &EngineConfig, ctx: &BuildContext) -> Result<Engine, SetupError> {
    let engine = builder_from_config(config, ctx)?.start()?;
    info!(
        target: "logpipe",
        pipelines = config.pipelines.len(),
        outputs = config.outputs.len(),
        "engine built from configuration"
    );
    Ok(engine)
}
