// SPDX-License-Identifier: MIT OR Apache-2.0
//! Command implementations for the logpipe CLI.
//!
//! These functions take readers and writers instead of touching the process
//! streams so the binary stays a thin argument parser.

use anyhow::{Context, Result, bail};
use logpipe::{
    BuildContext, ConfigWarning, EngineConfig, Event, JsonExporter, MemoryTestSink,
    MetricsSnapshot, TelemetryExporter, builder_from_config, validate_config,
};
use std::io::{BufRead, Write};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// Outcome of `logpipe check`.
#[derive(Debug)]
pub struct CheckReport {
    /// Configured pipelines.
    pub pipelines: usize,
    /// Configured output queues.
    pub outputs: usize,
    /// Advisory findings.
    pub warnings: Vec<ConfigWarning>,
}

/// Load and validate a configuration file.
pub fn check_config(path: &Path) -> Result<CheckReport> {
    let config = logpipe::load_config(Some(path))
        .with_context(|| format!("load config '{}'", path.display()))?;
    let warnings = validate_config(&config).context("validate config")?;
    Ok(CheckReport {
        pipelines: config.pipelines.len(),
        outputs: config.outputs.len(),
        warnings,
    })
}

/// JSON schema of the configuration file, pretty-printed.
pub fn schema_json() -> Result<String> {
    let value = serde_json::to_value(logpipe_config::config_schema())?;
    serde_json::to_string_pretty(&value).context("serialize schema")
}

/// Options for `logpipe run`.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Pipeline every input event enters.
    pub pipeline: String,
    /// Mark events as test events so they end in the test sink.
    pub test: bool,
    /// How long to wait for in-flight events before shutting down.
    pub idle_timeout: Duration,
}

/// Outcome of `logpipe run`.
#[derive(Debug)]
pub struct RunSummary {
    /// Events read from the input.
    pub submitted: usize,
    /// Events written to the output.
    pub emitted: usize,
    /// Whether every event finished before the idle timeout.
    pub idle: bool,
    /// Metrics at shutdown.
    pub snapshot: MetricsSnapshot,
}

/// Run JSON-lines events from `input` through an engine built from `config`
/// and write every event that reaches an output queue (or, in test mode, the
/// test sink) to `out` as one JSON record per line.
pub fn run_events<R, W>(
    config: &EngineConfig,
    options: &RunOptions,
    input: R,
    out: &mut W,
) -> Result<RunSummary>
where
    R: BufRead,
    W: Write,
{
    if !config.pipelines.contains_key(&options.pipeline) {
        bail!("unknown pipeline '{}'", options.pipeline);
    }

    let runtime = tokio::runtime::Runtime::new().context("start tokio runtime")?;
    let ctx = BuildContext::from_config(config).with_runtime(runtime.handle().clone());
    let sink = Arc::new(MemoryTestSink::new());
    let mut builder = builder_from_config(config, &ctx).context("build engine")?;
    if options.test {
        builder = builder.test_sink(Arc::clone(&sink) as Arc<dyn logpipe::TestSink>);
    }
    let engine = builder.start().context("start engine")?;

    let drains = config
        .outputs
        .keys()
        .filter_map(|name| engine.output(name))
        .map(|queue| thread::spawn(move || queue.iter().collect::<Vec<Event>>()))
        .collect::<Vec<_>>();

    let mut submitted = 0;
    for (index, line) in input.lines().enumerate() {
        let line = line.context("read input")?;
        if line.trim().is_empty() {
            continue;
        }
        let value: serde_json::Value = serde_json::from_str(&line)
            .with_context(|| format!("line {}: invalid JSON", index + 1))?;
        let mut event =
            Event::from_json(value).with_context(|| format!("line {}: not an event", index + 1))?;
        if options.test {
            event = event.into_test();
        }
        engine
            .submit(&options.pipeline, event)
            .with_context(|| format!("line {}: submit", index + 1))?;
        submitted += 1;
    }
    debug!(target: "logpipe.cli", submitted, "input exhausted");

    let idle = engine.wait_idle(options.idle_timeout);
    if !idle {
        warn!(
            target: "logpipe.cli",
            live = engine.live_events(),
            "events still in flight at shutdown"
        );
    }
    let metrics = Arc::clone(engine.metrics());
    engine.shutdown();
    runtime.shutdown_background();

    let mut emitted = 0;
    for drain in drains {
        let events = drain
            .join()
            .map_err(|_| anyhow::anyhow!("output drain panicked"))?;
        for event in events {
            serde_json::to_writer(&mut *out, &event.record()).context("write event")?;
            writeln!(out)?;
            emitted += 1;
        }
    }
    for record in sink.events() {
        serde_json::to_writer(&mut *out, &record).context("write event")?;
        writeln!(out)?;
        emitted += 1;
    }

    Ok(RunSummary {
        submitted,
        emitted,
        idle,
        snapshot: metrics.snapshot(),
    })
}

/// Render a metrics snapshot as pretty JSON.
pub fn stats_json(snapshot: &MetricsSnapshot) -> Result<String> {
    JsonExporter
        .export(snapshot)
        .map_err(|e| anyhow::anyhow!(e))
        .context("export metrics")
}
