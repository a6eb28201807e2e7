// SPDX-License-Identifier: MIT OR Apache-2.0
//! The worker loop and the per-processor execution contract.
//!
//! Each worker thread takes events from the shared input queue and drives
//! them through their pending chain. Every processor outcome, including a
//! panic, is classified as a [`ProcessingStatus`]; nothing a processor raises
//! escapes the worker.

use crate::repository::{EventsRepository, PausedEvent};
use crate::router::Router;
use crossbeam_channel::{Receiver, select};
use logpipe_core::{
    AsyncTransform, Completions, ErrorKind, Event, PauseRequest, Processor, ProcessorError,
    ProcessorKind, Suspender,
};
use logpipe_telemetry::{Metrics, names};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, trace};

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Classification of one processor execution, independent of the
/// processor's business result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingStatus {
    /// Continue with the next pending processor.
    Success,
    /// The event now belongs to the events repository.
    Paused,
    /// The event must be discarded.
    Dropped,
    /// The event must be ended as failed.
    Failed,
}

/// Outcome of [`EventsProcessor::process`], carrying the event back to the
/// worker loop.
#[derive(Debug)]
pub enum Processed {
    /// Keep processing this event.
    Success(Event),
    /// Hand this event to the events repository.
    Paused(Box<PausedEvent>),
    /// Discard this event.
    Dropped(Event),
    /// End this event as failed.
    Failed(Event),
}

impl Processed {
    /// Status of this outcome.
    pub fn status(&self) -> ProcessingStatus {
        match self {
            Self::Success(_) => ProcessingStatus::Success,
            Self::Paused(_) => ProcessingStatus::Paused,
            Self::Dropped(_) => ProcessingStatus::Dropped,
            Self::Failed(_) => ProcessingStatus::Failed,
        }
    }

    /// The event, unless it is waiting to be parked.
    pub fn into_event(self) -> Option<Event> {
        match self {
            Self::Success(ev) | Self::Dropped(ev) | Self::Failed(ev) => Some(ev),
            Self::Paused(_) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// EventsProcessor
// ---------------------------------------------------------------------------

/// One worker. Cheap to clone; every clone shares the same router,
/// repository and metrics.
#[derive(Clone)]
pub struct EventsProcessor {
    router: Arc<Router>,
    repository: Arc<EventsRepository>,
    completions: Arc<dyn Completions>,
    metrics: Arc<Metrics>,
    max_steps: u32,
}

impl EventsProcessor {
    /// Worker failing events after `max_steps` processor steps.
    pub fn new(
        router: Arc<Router>,
        repository: Arc<EventsRepository>,
        metrics: Arc<Metrics>,
        max_steps: u32,
    ) -> Self {
        let completions: Arc<dyn Completions> = repository.clone();
        Self {
            router,
            repository,
            completions,
            metrics,
            max_steps,
        }
    }

    /// Take events from `input` until `shutdown` disconnects.
    pub fn run(&self, input: &Receiver<Event>, shutdown: &Receiver<()>) {
        debug!(target: "logpipe.worker", "worker started");
        loop {
            select! {
                recv(input) -> msg => match msg {
                    Ok(event) => self.handle(event),
                    Err(_) => break,
                },
                recv(shutdown) -> _ => break,
            }
        }
        debug!(target: "logpipe.worker", "worker stopped");
    }

    /// Drive one event through its pending chain.
    pub fn handle(&self, mut event: Event) {
        let pipeline = event.current_pipeline().unwrap_or_default().to_string();
        let metrics_on = event.metrics_enabled();
        let gauge = metrics_on.then(|| self.metrics.counter(&names::inflight(&pipeline)));
        if let Some(gauge) = &gauge {
            gauge.inc();
        }
        let timer = (!event.is_test()).then(|| self.metrics.timer(&names::timer(&pipeline)).time());

        let outcome = loop {
            let Some(processor) = event.next_processor() else {
                break Processed::Success(event);
            };
            trace!(target: "logpipe.worker", id = %event.id(), pipeline = %pipeline, processor = %processor, "processing");
            event = match self.process(event, &processor) {
                Processed::Success(event) => event,
                other => break other,
            };
        };

        // Leave the pipeline before parking: the event may resume on another
        // worker as soon as it is registered.
        if let Some(gauge) = &gauge {
            gauge.dec();
        }
        drop(timer);
        trace!(target: "logpipe.worker", pipeline = %pipeline, status = ?outcome.status(), "chain stopped");

        match outcome {
            Processed::Success(event) => self.router.route(event),
            Processed::Paused(paused) => self.repository.pause(*paused),
            Processed::Dropped(event) => {
                if metrics_on {
                    self.metrics.meter(names::ALL_DROPPED).mark();
                    self.metrics.meter(&names::dropped(&pipeline)).mark();
                }
                debug!(target: "logpipe.worker", id = %event.id(), pipeline = %pipeline, "event dropped");
                event.discard();
                self.router.lifecycle().finish();
            }
            Processed::Failed(event) => {
                if metrics_on {
                    self.metrics.meter(names::ALL_FAILED).mark();
                    self.metrics.meter(&names::failed(&pipeline)).mark();
                }
                debug!(target: "logpipe.worker", id = %event.id(), pipeline = %pipeline, "event failed");
                event.end();
                self.router.lifecycle().finish();
            }
        }
    }

    /// Execute one processor against `event`.
    pub fn process(&self, mut event: Event, processor: &Arc<Processor>) -> Processed {
        match processor.kind() {
            ProcessorKind::Fork { destination } => {
                self.router.fork(&event, destination);
                Processed::Success(event)
            }
            ProcessorKind::Drop => Processed::Dropped(event),
            ProcessorKind::Wrap(path) => match event.wrap(path.iter().cloned()) {
                Ok(()) => Processed::Success(event),
                Err(e) => {
                    self.record_exception(&event, ErrorKind::Unexpected, &e.to_string());
                    Processed::Failed(event)
                }
            },
            ProcessorKind::Unwrap => {
                event.unwrap();
                Processed::Success(event)
            }
            ProcessorKind::Transform(transform) => {
                if self.over_ceiling(&mut event, processor) {
                    return Processed::Failed(event);
                }
                let result = panic::catch_unwind(AssertUnwindSafe(|| {
                    if transform.is_process_needed(&event) {
                        transform.process(&mut event)
                    } else {
                        Ok(false)
                    }
                }));
                self.settle(event, processor, result, None)
            }
            ProcessorKind::Async { transform, timeout } => {
                if self.over_ceiling(&mut event, processor) {
                    return Processed::Failed(event);
                }
                let suspender = Suspender::new(Arc::clone(&self.completions), *timeout);
                let result = panic::catch_unwind(AssertUnwindSafe(|| {
                    if transform.is_process_needed(&event) {
                        transform.start(&mut event, &suspender)
                    } else {
                        Ok(false)
                    }
                }));
                self.settle(event, processor, result, Some((transform, *timeout)))
            }
        }
    }

    fn over_ceiling(&self, event: &mut Event, processor: &Processor) -> bool {
        let steps = event.increment_steps();
        if steps <= self.max_steps {
            return false;
        }
        let pipeline = event.current_pipeline().unwrap_or_default();
        error!(target: "logpipe.worker", id = %event.id(), pipeline, processor = %processor, steps, "step ceiling exceeded, processing loop suspected");
        self.metrics.exceptions().new_error(
            ErrorKind::LoopDetected.as_str(),
            format!("{pipeline}: more than {} steps", self.max_steps),
        );
        true
    }

    fn settle(
        &self,
        mut event: Event,
        processor: &Processor,
        result: std::thread::Result<Result<bool, ProcessorError>>,
        asynchronous: Option<(&Arc<dyn AsyncTransform>, Duration)>,
    ) -> Processed {
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(target: "logpipe.worker", id = %event.id(), processor = %processor, message = %message, "processor panicked");
                self.record_exception(&event, ErrorKind::Panic, &message);
                return Processed::Failed(event);
            }
        };

        match outcome {
            Ok(true) => {
                if let Some(next) = processor.success() {
                    event.insert_processor(Arc::clone(next));
                }
                Processed::Success(event)
            }
            Ok(false) => {
                if let Some(next) = processor.failure() {
                    event.insert_processor(Arc::clone(next));
                }
                Processed::Success(event)
            }
            Err(ProcessorError::Paused(request)) => match asynchronous {
                Some((transform, timeout)) => {
                    self.park(event, processor, Arc::clone(transform), timeout, request)
                }
                None => {
                    let pipeline = event.current_pipeline().unwrap_or_default().to_string();
                    error!(target: "logpipe.worker", id = %event.id(), processor = %processor, "synchronous processor tried to pause the event");
                    self.metrics.meter(&names::exception(&pipeline)).mark();
                    self.metrics.exceptions().new_exception(
                        ErrorKind::AsyncMismatch.as_str(),
                        format!("{} is not asynchronous", processor.name()),
                    );
                    self.repository.cancel(request.token());
                    Processed::Failed(event)
                }
            },
            Err(ProcessorError::Discard) => Processed::Dropped(event),
            Err(ProcessorError::Ignore) => Processed::Success(event),
            Err(err @ ProcessorError::Processing { .. }) => {
                debug!(target: "logpipe.worker", id = %event.id(), processor = %processor, error = %err, "processing error");
                self.metrics
                    .exceptions()
                    .new_error(err.kind().as_str(), err.to_string());
                match processor.exception() {
                    Some(next) => {
                        event.insert_processor(Arc::clone(next));
                        Processed::Success(event)
                    }
                    None => Processed::Failed(event),
                }
            }
            Err(err @ ProcessorError::Unexpected(_)) => {
                error!(target: "logpipe.worker", id = %event.id(), processor = %processor, error = ?err, "unexpected processor failure");
                self.record_exception(&event, err.kind(), &err.to_string());
                Processed::Failed(event)
            }
        }
    }

    fn park(
        &self,
        mut event: Event,
        processor: &Processor,
        transform: Arc<dyn AsyncTransform>,
        timeout: Duration,
        request: PauseRequest,
    ) -> Processed {
        let token = request.token();
        let scoped = match request.scope() {
            Some(scope) => match event.wrap(scope.iter().cloned()) {
                Ok(()) => true,
                Err(e) => {
                    self.repository.cancel(token);
                    self.record_exception(&event, ErrorKind::Unexpected, &e.to_string());
                    return Processed::Failed(event);
                }
            },
            None => false,
        };
        trace!(target: "logpipe.worker", id = %event.id(), processor = %processor, %token, "event paused");
        Processed::Paused(Box::new(PausedEvent::new(
            event, token, timeout, processor, transform, scoped,
        )))
    }

    fn record_exception(&self, event: &Event, kind: ErrorKind, message: &str) {
        if event.metrics_enabled() {
            let pipeline = event.current_pipeline().unwrap_or_default();
            self.metrics.meter(&names::exception(pipeline)).mark();
        }
        self.metrics
            .exceptions()
            .new_exception(kind.as_str(), message.to_string());
    }
}

impl fmt::Debug for EventsProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventsProcessor")
            .field("max_steps", &self.max_steps)
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
