// SPDX-License-Identifier: MIT OR Apache-2.0
//! Processors and their capability kinds.
//!
//! A [`Processor`] couples a [`ProcessorKind`] with up to three continuation
//! processors. The worker dispatches on the kind; only `Transform` and `Async`
//! kinds carry user code.

use crate::completion::{Completion, Suspender};
use crate::error::ProcessorError;
use crate::event::Event;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Core traits
// ---------------------------------------------------------------------------

/// A synchronous transformation applied to an event.
pub trait Transform: Send + Sync {
    /// Guard evaluated before [`process`](Self::process). Declining yields a
    /// `false` business result without running the transform.
    fn is_process_needed(&self, _event: &Event) -> bool {
        true
    }

    /// Transform the event and report the business result.
    fn process(&self, event: &mut Event) -> Result<bool, ProcessorError>;
}

impl<F> Transform for F
where
    F: Fn(&mut Event) -> Result<bool, ProcessorError> + Send + Sync,
{
    fn process(&self, event: &mut Event) -> Result<bool, ProcessorError> {
        self(event)
    }
}

/// A transformation that may suspend the event pending an external
/// completion.
pub trait AsyncTransform: Send + Sync {
    /// Guard evaluated before [`start`](Self::start).
    fn is_process_needed(&self, _event: &Event) -> bool {
        true
    }

    /// Begin processing. To suspend, obtain a completer from `suspender` and
    /// return [`ProcessorError::Paused`]; returning a result directly skips the
    /// suspension.
    fn start(&self, event: &mut Event, suspender: &Suspender) -> Result<bool, ProcessorError>;

    /// Apply the completion outcome once the event resumes. A timed-out
    /// suspension arrives here as `Err(CompletionError::TimedOut)`.
    fn complete(&self, event: &mut Event, outcome: Completion) -> Result<bool, ProcessorError>;
}

// ---------------------------------------------------------------------------
// ProcessorKind
// ---------------------------------------------------------------------------

/// Capability discriminant of a processor.
#[derive(Clone)]
pub enum ProcessorKind {
    /// Plain synchronous transform.
    Transform(Arc<dyn Transform>),
    /// Transform that may suspend, with the timeout applied to suspensions.
    Async {
        /// The transform.
        transform: Arc<dyn AsyncTransform>,
        /// Maximum time an event stays paused.
        timeout: Duration,
    },
    /// Submit an independent copy of the event into `destination`.
    Fork {
        /// Pipeline receiving the copy.
        destination: String,
    },
    /// Drop the event.
    Drop,
    /// Narrow the event's field view to a sub-path.
    Wrap(Vec<String>),
    /// Restore the parent field view.
    Unwrap,
}

impl ProcessorKind {
    /// Short tag used in logs.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Transform(_) => "transform",
            Self::Async { .. } => "async",
            Self::Fork { .. } => "fork",
            Self::Drop => "drop",
            Self::Wrap(_) => "wrap",
            Self::Unwrap => "unwrap",
        }
    }

    /// `true` for wrap/unwrap, which the worker applies directly.
    pub fn is_structural(&self) -> bool {
        matches!(self, Self::Wrap(_) | Self::Unwrap)
    }
}

impl fmt::Debug for ProcessorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Async { timeout, .. } => f
                .debug_struct("Async")
                .field("timeout", timeout)
                .finish_non_exhaustive(),
            Self::Fork { destination } => f
                .debug_struct("Fork")
                .field("destination", destination)
                .finish(),
            Self::Wrap(path) => f.debug_tuple("Wrap").field(path).finish(),
            other => f.write_str(other.tag()),
        }
    }
}

// ---------------------------------------------------------------------------
// Processor
// ---------------------------------------------------------------------------

/// A unit of work with optional success/failure/exception continuations.
///
/// ```
/// use logpipe_core::{Event, Processor, ProcessorError};
///
/// let tag = Processor::transform("tag", |ev: &mut Event| -> Result<bool, ProcessorError> {
///     ev.put("tagged", true);
///     Ok(true)
/// })
/// .on_failure(Processor::drop_event("discard"));
/// assert_eq!(tag.name(), "tag");
/// ```
#[derive(Debug, Clone)]
pub struct Processor {
    name: String,
    kind: ProcessorKind,
    success: Option<Arc<Processor>>,
    failure: Option<Arc<Processor>>,
    exception: Option<Arc<Processor>>,
}

impl Processor {
    /// Create a processor of the given kind without continuations.
    pub fn new(name: impl Into<String>, kind: ProcessorKind) -> Self {
        Self {
            name: name.into(),
            kind,
            success: None,
            failure: None,
            exception: None,
        }
    }

    /// Plain transform processor.
    pub fn transform(name: impl Into<String>, transform: impl Transform + 'static) -> Self {
        Self::new(name, ProcessorKind::Transform(Arc::new(transform)))
    }

    /// Asynchronous processor whose suspensions expire after `timeout`.
    pub fn asynchronous(
        name: impl Into<String>,
        transform: impl AsyncTransform + 'static,
        timeout: Duration,
    ) -> Self {
        Self::new(
            name,
            ProcessorKind::Async {
                transform: Arc::new(transform),
                timeout,
            },
        )
    }

    /// Fork processor submitting copies into `destination`.
    pub fn fork(name: impl Into<String>, destination: impl Into<String>) -> Self {
        Self::new(
            name,
            ProcessorKind::Fork {
                destination: destination.into(),
            },
        )
    }

    /// Drop processor.
    pub fn drop_event(name: impl Into<String>) -> Self {
        Self::new(name, ProcessorKind::Drop)
    }

    /// Structural processor narrowing the view to `path`.
    pub fn wrap<I, S>(name: impl Into<String>, path: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            name,
            ProcessorKind::Wrap(path.into_iter().map(Into::into).collect()),
        )
    }

    /// Structural processor restoring the parent view.
    pub fn unwrap(name: impl Into<String>) -> Self {
        Self::new(name, ProcessorKind::Unwrap)
    }

    /// Continuation inserted after a `true` business result.
    #[must_use]
    pub fn on_success(mut self, next: impl Into<Arc<Processor>>) -> Self {
        self.success = Some(next.into());
        self
    }

    /// Continuation inserted after a `false` business result.
    #[must_use]
    pub fn on_failure(mut self, next: impl Into<Arc<Processor>>) -> Self {
        self.failure = Some(next.into());
        self
    }

    /// Continuation inserted after a recoverable processing error.
    #[must_use]
    pub fn on_exception(mut self, next: impl Into<Arc<Processor>>) -> Self {
        self.exception = Some(next.into());
        self
    }

    /// Replace all three continuations at once.
    #[must_use]
    pub fn with_continuations(
        mut self,
        success: Option<Arc<Processor>>,
        failure: Option<Arc<Processor>>,
        exception: Option<Arc<Processor>>,
    ) -> Self {
        self.success = success;
        self.failure = failure;
        self.exception = exception;
        self
    }

    /// Processor name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Capability kind.
    pub fn kind(&self) -> &ProcessorKind {
        &self.kind
    }

    /// On-success continuation.
    pub fn success(&self) -> Option<&Arc<Processor>> {
        self.success.as_ref()
    }

    /// On-failure continuation.
    pub fn failure(&self) -> Option<&Arc<Processor>> {
        self.failure.as_ref()
    }

    /// On-exception continuation.
    pub fn exception(&self) -> Option<&Arc<Processor>> {
        self.exception.as_ref()
    }

    /// Suspension timeout, for asynchronous processors only.
    pub fn timeout(&self) -> Option<Duration> {
        match &self.kind {
            ProcessorKind::Async { timeout, .. } => Some(*timeout),
            _ => None,
        }
    }
}

impl fmt::Display for Processor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.kind.tag())
    }
}
