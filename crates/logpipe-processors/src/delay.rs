// SPDX-License-Identifier: MIT OR Apache-2.0
//! An asynchronous processor completed by a tokio timer.

use logpipe_core::{AsyncTransform, Completion, CompletionError, Event, ProcessorError, Suspender};
use serde_json::json;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::trace;

/// Suspends the event and completes it after a fixed delay on a tokio
/// runtime, without occupying a worker thread.
///
/// In `never` mode no completion is scheduled, so the processor's timeout
/// decides the outcome. The completion value is the delay in milliseconds and
/// is stored in `field` when one is configured.
#[derive(Debug, Clone)]
pub struct Delay {
    delay: Duration,
    never: bool,
    field: Option<String>,
    runtime: Handle,
}

impl Delay {
    /// Complete after `delay`, scheduling timers on `runtime`.
    pub fn new(delay: Duration, runtime: Handle) -> Self {
        Self {
            delay,
            never: false,
            field: None,
            runtime,
        }
    }

    /// Never complete; resumption happens only through the timeout.
    #[must_use]
    pub fn never(mut self) -> Self {
        self.never = true;
        self
    }

    /// Store the completion value in `field`.
    #[must_use]
    pub fn into_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }
}

impl AsyncTransform for Delay {
    fn start(&self, event: &mut Event, suspender: &Suspender) -> Result<bool, ProcessorError> {
        let (request, completer) = suspender.suspend();
        if self.never {
            trace!(target: "logpipe.processors", id = %event.id(), token = %completer.token(), "delay waits for timeout");
            return Err(ProcessorError::Paused(request));
        }
        let delay = self.delay;
        self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
            completer.succeed(json!(millis));
        });
        Err(ProcessorError::Paused(request))
    }

    fn complete(&self, event: &mut Event, outcome: Completion) -> Result<bool, ProcessorError> {
        match outcome {
            Ok(value) => {
                if let Some(field) = &self.field {
                    event.put(field.clone(), value);
                }
                Ok(true)
            }
            Err(CompletionError::TimedOut) => Err(ProcessorError::processing("delay timed out")),
            Err(e) => Err(ProcessorError::processing_with("delay failed", e)),
        }
    }
}
