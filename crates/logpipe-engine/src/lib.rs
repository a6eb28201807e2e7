// SPDX-License-Identifier: MIT OR Apache-2.0
//! logpipe-engine
//!
//! Runtime of the event-processing engine.
//!
//! Responsibilities:
//! - run a fixed pool of worker threads over one shared input queue
//! - execute each processor under the per-processor contract
//! - park suspended events and resume them on completion or timeout
//! - route finished events to the next pipeline, the test sink or an output
//!   queue without ever blocking

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Live-event accounting.
pub mod lifecycle;
/// Paused events and the completion entry point.
pub mod repository;
mod resume;
/// Destination selection for finished events.
pub mod router;
/// Sinks for dry-run events.
pub mod sink;
/// Worker loop and execution contract.
pub mod worker;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use logpipe_core::{Event, Pipeline};
use logpipe_telemetry::{Metrics, names};
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info};

pub use lifecycle::Lifecycle;
pub use repository::{EventsRepository, PausedEvent};
pub use router::Router;
pub use sink::{LogTestSink, MemoryTestSink, TestSink};
pub use worker::{EventsProcessor, Processed, ProcessingStatus};

/// Default number of worker threads.
pub const DEFAULT_WORKERS: usize = 2;
/// Default step ceiling.
pub const DEFAULT_MAX_STEPS: u32 = 2048;
/// Default input queue capacity.
pub const DEFAULT_QUEUE_DEPTH: usize = 100;
/// Default interval between timeout sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Errors from building or feeding the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A sizing parameter was zero.
    #[error("invalid engine setting {name}: must be at least 1")]
    InvalidSetting {
        /// Setting name.
        name: &'static str,
    },

    /// Two pipelines share a name.
    #[error("duplicate pipeline: {name}")]
    DuplicatePipeline {
        /// Pipeline name.
        name: String,
    },

    /// No pipeline with this name is registered.
    #[error("unknown pipeline: {name}")]
    UnknownPipeline {
        /// Pipeline name.
        name: String,
    },

    /// The input queue is full.
    #[error("input queue full, event for pipeline {pipeline} rejected")]
    QueueFull {
        /// Pipeline the event was submitted to.
        pipeline: String,
    },

    /// The engine has been shut down.
    #[error("engine is stopped")]
    Stopped,

    /// A worker or sweeper thread could not be spawned.
    #[error("failed to spawn engine thread")]
    Spawn(#[source] std::io::Error),
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Configures and starts an [`Engine`].
///
/// ```
/// use logpipe_core::{Event, Pipeline, Processor, ProcessorError};
/// use logpipe_engine::Engine;
/// use std::time::Duration;
///
/// let pipeline = Pipeline::new("main").processor(Processor::transform(
///     "tag",
///     |ev: &mut Event| -> Result<bool, ProcessorError> {
///         ev.put("seen", true);
///         Ok(true)
///     },
/// ));
/// let engine = Engine::builder()
///     .pipeline(pipeline)
///     .output("main", 8)
///     .workers(1)
///     .start()
///     .unwrap();
/// engine.submit("main", Event::empty()).unwrap();
/// assert!(engine.wait_idle(Duration::from_secs(5)));
/// let out = engine.output("main").unwrap().try_recv().unwrap();
/// assert_eq!(out.get("seen"), Some(&serde_json::json!(true)));
/// engine.shutdown();
/// ```
pub struct EngineBuilder {
    pipelines: Vec<Arc<Pipeline>>,
    outputs: Vec<(String, usize)>,
    workers: usize,
    max_steps: u32,
    queue_depth: usize,
    sweep_interval: Duration,
    test_sink: Arc<dyn TestSink>,
    metrics: Arc<Metrics>,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self {
            pipelines: Vec::new(),
            outputs: Vec::new(),
            workers: DEFAULT_WORKERS,
            max_steps: DEFAULT_MAX_STEPS,
            queue_depth: DEFAULT_QUEUE_DEPTH,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            test_sink: Arc::new(LogTestSink),
            metrics: Arc::new(Metrics::new()),
        }
    }
}

impl EngineBuilder {
    /// Register a pipeline.
    #[must_use]
    pub fn pipeline(mut self, pipeline: impl Into<Arc<Pipeline>>) -> Self {
        self.pipelines.push(pipeline.into());
        self
    }

    /// Register several pipelines.
    #[must_use]
    pub fn pipelines<I>(mut self, pipelines: I) -> Self
    where
        I: IntoIterator<Item = Arc<Pipeline>>,
    {
        self.pipelines.extend(pipelines);
        self
    }

    /// Attach an output queue of `capacity` to pipeline `name`.
    #[must_use]
    pub fn output(mut self, name: impl Into<String>, capacity: usize) -> Self {
        self.outputs.push((name.into(), capacity));
        self
    }

    /// Number of worker threads.
    #[must_use]
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Step ceiling per event.
    #[must_use]
    pub fn max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Capacity of the shared input queue.
    #[must_use]
    pub fn queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth;
        self
    }

    /// Interval between timeout sweeps.
    #[must_use]
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Destination of finished dry-run events.
    #[must_use]
    pub fn test_sink(mut self, sink: Arc<dyn TestSink>) -> Self {
        self.test_sink = sink;
        self
    }

    /// Use an existing metrics registry.
    #[must_use]
    pub fn metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Spawn the workers and the sweeper.
    pub fn start(self) -> Result<Engine, EngineError> {
        for (name, value) in [
            ("workers", self.workers),
            ("queue_depth", self.queue_depth),
            ("max_steps", self.max_steps as usize),
        ] {
            if value == 0 {
                return Err(EngineError::InvalidSetting { name });
            }
        }
        if self.sweep_interval.is_zero() {
            return Err(EngineError::InvalidSetting {
                name: "sweep_interval",
            });
        }

        let mut pipelines = HashMap::new();
        for pipeline in self.pipelines {
            let name = pipeline.name().to_string();
            if pipelines.insert(name.clone(), pipeline).is_some() {
                return Err(EngineError::DuplicatePipeline { name });
            }
        }

        let mut output_senders = HashMap::new();
        let mut output_receivers = HashMap::new();
        for (name, capacity) in self.outputs {
            if capacity == 0 {
                return Err(EngineError::InvalidSetting {
                    name: "output capacity",
                });
            }
            let (tx, rx) = bounded(capacity);
            output_senders.insert(name.clone(), tx);
            output_receivers.insert(name, rx);
        }

        let (input_tx, input_rx) = bounded(self.queue_depth);
        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);
        let lifecycle = Arc::new(Lifecycle::default());
        let router = Arc::new(Router::new(
            pipelines,
            output_senders,
            input_tx.clone(),
            Arc::clone(&self.metrics),
            self.test_sink,
            Arc::clone(&lifecycle),
        ));
        let repository = Arc::new(EventsRepository::new(
            input_tx,
            Arc::clone(&self.metrics),
            Arc::clone(&lifecycle),
        ));
        let processor = EventsProcessor::new(
            Arc::clone(&router),
            Arc::clone(&repository),
            Arc::clone(&self.metrics),
            self.max_steps,
        );

        let mut engine = Engine {
            router,
            repository,
            metrics: self.metrics,
            lifecycle,
            outputs: output_receivers,
            threads: Vec::with_capacity(self.workers + 1),
            shutdown: Some(shutdown_tx),
        };

        for index in 0..self.workers {
            let worker = processor.clone();
            let input = input_rx.clone();
            let shutdown = shutdown_rx.clone();
            let handle = thread::Builder::new()
                .name(format!("logpipe-worker-{index}"))
                .spawn(move || worker.run(&input, &shutdown))
                .map_err(EngineError::Spawn)?;
            engine.threads.push(handle);
        }

        let repository = Arc::clone(&engine.repository);
        let interval = self.sweep_interval;
        let handle = thread::Builder::new()
            .name("logpipe-sweeper".into())
            .spawn(move || sweep_loop(&repository, &shutdown_rx, interval))
            .map_err(EngineError::Spawn)?;
        engine.threads.push(handle);

        info!(target: "logpipe.engine", workers = self.workers, max_steps = self.max_steps, queue_depth = self.queue_depth, "engine started");
        Ok(engine)
    }
}

fn sweep_loop(repository: &EventsRepository, shutdown: &Receiver<()>, interval: Duration) {
    loop {
        match shutdown.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {
                let expired = repository.sweep(Instant::now());
                if expired > 0 {
                    debug!(target: "logpipe.engine", expired, "paused events timed out");
                }
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// A running engine.
///
/// Dropping the engine shuts it down and joins its threads.
pub struct Engine {
    router: Arc<Router>,
    repository: Arc<EventsRepository>,
    metrics: Arc<Metrics>,
    lifecycle: Arc<Lifecycle>,
    outputs: HashMap<String, Receiver<Event>>,
    threads: Vec<JoinHandle<()>>,
    shutdown: Option<Sender<()>>,
}

impl Engine {
    /// Start configuring an engine.
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    /// Enter `event` into `pipeline`, blocking while the input queue is full.
    pub fn submit(&self, pipeline: &str, mut event: Event) -> Result<(), EngineError> {
        if self.shutdown.is_none() {
            return Err(EngineError::Stopped);
        }
        let target = self.lookup(pipeline)?;
        event.enter_pipeline(target);
        self.lifecycle.begin();
        self.router.input().send(event).map_err(|_| {
            self.lifecycle.finish();
            EngineError::Stopped
        })
    }

    /// Enter `event` into `pipeline` without blocking. A full input queue
    /// marks `Pipeline.<pipeline>.blocked.in` and rejects the event.
    pub fn try_submit(&self, pipeline: &str, event: Event) -> Result<(), EngineError> {
        if self.shutdown.is_none() {
            return Err(EngineError::Stopped);
        }
        let target = self.lookup(pipeline)?;
        self.lifecycle.begin();
        match event.inject(target, self.router.input()) {
            Ok(()) => Ok(()),
            Err(event) => {
                self.metrics.meter(&names::blocked_in(pipeline)).mark();
                event.end();
                self.lifecycle.finish();
                Err(EngineError::QueueFull {
                    pipeline: pipeline.to_string(),
                })
            }
        }
    }

    /// Receiving end of the output queue attached to `pipeline`.
    pub fn output(&self, pipeline: &str) -> Option<Receiver<Event>> {
        self.outputs.get(pipeline).cloned()
    }

    /// The paused-event registry, also the completion entry point.
    pub fn repository(&self) -> &Arc<EventsRepository> {
        &self.repository
    }

    /// Metrics registry.
    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Events submitted or forked that have not yet finished or reached an
    /// output queue.
    pub fn live_events(&self) -> usize {
        self.lifecycle.live()
    }

    /// Block until every live event has finished or `timeout` elapses.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.lifecycle.wait_idle(timeout)
    }

    /// Stop the workers and the sweeper, and join them. Events still queued
    /// or paused are abandoned.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn lookup(&self, pipeline: &str) -> Result<&Pipeline, EngineError> {
        self.router
            .pipeline(pipeline)
            .map(Arc::as_ref)
            .ok_or_else(|| EngineError::UnknownPipeline {
                name: pipeline.to_string(),
            })
    }

    fn stop(&mut self) {
        if self.shutdown.take().is_none() {
            return;
        }
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                debug!(target: "logpipe.engine", "engine thread panicked");
            }
        }
        info!(target: "logpipe.engine", live = self.lifecycle.live(), "engine stopped");
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("router", &self.router)
            .field("threads", &self.threads.len())
            .field("live", &self.lifecycle.live())
            .finish_non_exhaustive()
    }
}
