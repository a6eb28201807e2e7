// SPDX-License-Identifier: MIT OR Apache-2.0
//! Routing of events whose chain is exhausted, and fork submission.
//!
//! Routing never blocks. A saturated or missing destination turns into a
//! lost event plus a `blocked.in` / `blocked.out` mark.

use crate::lifecycle::Lifecycle;
use crate::sink::TestSink;
use crossbeam_channel::Sender;
use logpipe_core::{Event, Pipeline};
use logpipe_telemetry::{Metrics, names};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, trace};

/// Pipeline topology and destinations shared by every worker.
pub struct Router {
    pipelines: HashMap<String, Arc<Pipeline>>,
    outputs: HashMap<String, Sender<Event>>,
    input: Sender<Event>,
    metrics: Arc<Metrics>,
    test_sink: Arc<dyn TestSink>,
    lifecycle: Arc<Lifecycle>,
}

impl Router {
    /// Router over `pipelines`, re-injecting into `input` and delivering to
    /// the per-pipeline `outputs`.
    pub fn new(
        pipelines: HashMap<String, Arc<Pipeline>>,
        outputs: HashMap<String, Sender<Event>>,
        input: Sender<Event>,
        metrics: Arc<Metrics>,
        test_sink: Arc<dyn TestSink>,
        lifecycle: Arc<Lifecycle>,
    ) -> Self {
        Self {
            pipelines,
            outputs,
            input,
            metrics,
            test_sink,
            lifecycle,
        }
    }

    /// Look up a pipeline by name.
    pub fn pipeline(&self, name: &str) -> Option<&Arc<Pipeline>> {
        self.pipelines.get(name)
    }

    /// Names of all registered pipelines, unordered.
    pub fn pipeline_names(&self) -> impl Iterator<Item = &str> {
        self.pipelines.keys().map(String::as_str)
    }

    /// The shared input queue.
    pub fn input(&self) -> &Sender<Event> {
        &self.input
    }

    /// Live-event accounting.
    pub fn lifecycle(&self) -> &Arc<Lifecycle> {
        &self.lifecycle
    }

    /// Deliver an event whose chain is exhausted.
    ///
    /// In order: the next pipeline if one is named, the test sink for dry-run
    /// events, the output queue of the current pipeline, and otherwise a
    /// misconfiguration failure.
    pub fn route(&self, event: Event) {
        if let Some(next) = event.next_pipeline().map(str::to_owned) {
            self.forward(event, &next);
            return;
        }

        if event.is_test() {
            self.test_sink.record(&event);
            event.end();
            self.lifecycle.finish();
            return;
        }

        let current = event.current_pipeline().unwrap_or_default().to_string();
        match self.outputs.get(&current) {
            Some(output) => match event.offer(output) {
                Ok(()) => {
                    trace!(target: "logpipe.router", pipeline = %current, "event delivered to output");
                    self.lifecycle.finish();
                }
                Err(event) => {
                    debug!(target: "logpipe.router", pipeline = %current, "output queue full, event lost");
                    self.metrics.meter(&names::blocked_out(&current)).mark();
                    event.end();
                    self.lifecycle.finish();
                }
            },
            None => {
                error!(target: "logpipe.router", pipeline = %current, id = %event.id(), "no destination for event, pipeline misconfigured");
                self.metrics.meter(names::ALL_FAILED).mark();
                event.end();
                self.lifecycle.finish();
            }
        }
    }

    /// Submit an independent copy of `event` into `destination` without
    /// blocking. A missing or saturated destination marks
    /// `Pipeline.<destination>.blocked.in`; the original is unaffected.
    pub fn fork(&self, event: &Event, destination: &str) {
        let copy = event.fork();
        let Some(pipeline) = self.pipelines.get(destination) else {
            error!(target: "logpipe.router", destination, "fork to unknown pipeline");
            self.metrics.meter(&names::blocked_in(destination)).mark();
            copy.end();
            return;
        };
        self.lifecycle.begin();
        match copy.inject(pipeline, &self.input) {
            Ok(()) => trace!(target: "logpipe.router", destination, "event forked"),
            Err(copy) => {
                debug!(target: "logpipe.router", destination, "input queue full, fork lost");
                self.metrics.meter(&names::blocked_in(destination)).mark();
                copy.end();
                self.lifecycle.finish();
            }
        }
    }

    fn forward(&self, event: Event, next: &str) {
        let Some(pipeline) = self.pipelines.get(next) else {
            error!(target: "logpipe.router", next, id = %event.id(), "next pipeline is not registered");
            self.metrics.meter(&names::blocked_in(next)).mark();
            event.end();
            self.lifecycle.finish();
            return;
        };
        match event.inject(pipeline, &self.input) {
            Ok(()) => trace!(target: "logpipe.router", next, "event moved to next pipeline"),
            Err(event) => {
                debug!(target: "logpipe.router", next, "input queue full, event lost");
                self.metrics.meter(&names::blocked_in(next)).mark();
                event.end();
                self.lifecycle.finish();
            }
        }
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut pipelines: Vec<&str> = self.pipeline_names().collect();
        pipelines.sort_unstable();
        let mut outputs: Vec<&str> = self.outputs.keys().map(String::as_str).collect();
        outputs.sort_unstable();
        f.debug_struct("Router")
            .field("pipelines", &pipelines)
            .field("outputs", &outputs)
            .finish_non_exhaustive()
    }
}
