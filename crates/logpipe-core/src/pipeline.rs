// SPDX-License-Identifier: MIT OR Apache-2.0
//! Named pipelines and their execution ranks.

use crate::event::Event;
use crate::processor::Processor;
use std::sync::Arc;

/// One execution rank of a pipeline.
///
/// A step holds one or more lanes, each an instance of the same processor
/// configuration. Lanes are fixed when the pipeline is built; an event sticks
/// to the lane selected by its id.
#[derive(Debug, Clone)]
pub struct PipeStep {
    lanes: Vec<Arc<Processor>>,
}

impl PipeStep {
    /// Single-lane step.
    pub fn new(processor: impl Into<Arc<Processor>>) -> Self {
        Self {
            lanes: vec![processor.into()],
        }
    }

    /// Multi-lane step. An empty lane list yields a step that does nothing.
    pub fn with_lanes(lanes: Vec<Arc<Processor>>) -> Self {
        Self { lanes }
    }

    /// All lanes of this step.
    pub fn lanes(&self) -> &[Arc<Processor>] {
        &self.lanes
    }

    /// Lane used for `event`.
    pub fn lane_for(&self, event: &Event) -> Option<&Arc<Processor>> {
        if self.lanes.is_empty() {
            return None;
        }
        let index = (event.id().as_u128() % self.lanes.len() as u128) as usize;
        self.lanes.get(index)
    }
}

/// Named, immutable processor topology with an optional successor.
///
/// ```
/// use logpipe_core::{Pipeline, PipeStep, Processor};
///
/// let pipeline = Pipeline::new("main")
///     .step(PipeStep::new(Processor::drop_event("discard")))
///     .then("archive");
/// assert_eq!(pipeline.next(), Some("archive"));
/// ```
#[derive(Debug, Clone)]
pub struct Pipeline {
    name: String,
    steps: Vec<PipeStep>,
    next: Option<String>,
}

impl Pipeline {
    /// Empty pipeline.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            next: None,
        }
    }

    /// Append a step (builder pattern).
    #[must_use]
    pub fn step(mut self, step: PipeStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Append a single-lane step running `processor`.
    #[must_use]
    pub fn processor(self, processor: impl Into<Arc<Processor>>) -> Self {
        self.step(PipeStep::new(processor))
    }

    /// Set the successor pipeline.
    #[must_use]
    pub fn then(mut self, next: impl Into<String>) -> Self {
        self.next = Some(next.into());
        self
    }

    /// Pipeline name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Execution ranks in order.
    pub fn steps(&self) -> &[PipeStep] {
        &self.steps
    }

    /// Successor pipeline, if any.
    pub fn next(&self) -> Option<&str> {
        self.next.as_deref()
    }

    /// Ordered processors `event` runs through in this pipeline.
    pub fn processors_for(&self, event: &Event) -> Vec<Arc<Processor>> {
        self.steps
            .iter()
            .filter_map(|step| step.lane_for(event))
            .cloned()
            .collect()
    }
}
