// SPDX-License-Identifier: MIT OR Apache-2.0
//! Suspension tokens and the completion entry point used by asynchronous
//! processors.
//!
//! An [`AsyncTransform`](crate::AsyncTransform) that needs to wait for an
//! external party calls [`Suspender::suspend`], hands the returned
//! [`Completer`] to whatever will eventually finish the work, and returns
//! [`ProcessorError::Paused`](crate::ProcessorError::Paused) carrying the
//! [`PauseRequest`]. The engine parks the event until the completer fires or
//! the processor's timeout expires, whichever comes first.

use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// CompletionToken
// ---------------------------------------------------------------------------

/// Opaque handle correlating a suspension with its eventual resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CompletionToken(Uuid);

impl CompletionToken {
    /// Create a new, globally unique token.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CompletionToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CompletionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Completion outcome
// ---------------------------------------------------------------------------

/// Why an asynchronous operation did not produce a value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompletionError {
    /// The processor's timeout expired before the completion arrived.
    #[error("completion timed out")]
    TimedOut,
    /// The external party reported a failure.
    #[error("completion failed: {0}")]
    Failed(String),
}

/// Result delivered to [`AsyncTransform::complete`](crate::AsyncTransform::complete).
pub type Completion = Result<Value, CompletionError>;

/// Registry side of the suspension protocol, implemented by the engine's
/// events repository.
pub trait Completions: Send + Sync {
    /// Issue a fresh token that will be parked with the given timeout.
    fn issue(&self, timeout: Duration) -> CompletionToken;

    /// Resolve a token. Returns `true` when this call resumed (or armed the
    /// resumption of) a suspended event, `false` when the token was unknown or
    /// already consumed.
    fn complete(&self, token: CompletionToken, outcome: Completion) -> bool;
}

// ---------------------------------------------------------------------------
// PauseRequest
// ---------------------------------------------------------------------------

/// Payload of [`ProcessorError::Paused`](crate::ProcessorError::Paused).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PauseRequest {
    token: CompletionToken,
    scope: Option<Vec<String>>,
}

impl PauseRequest {
    /// Pause the event as-is until `token` completes.
    #[must_use]
    pub fn new(token: CompletionToken) -> Self {
        Self { token, scope: None }
    }

    /// Park a view of the event scoped to `path` instead of the event itself.
    ///
    /// The view is released again once the resumed processor has run.
    #[must_use]
    pub fn with_scope<I, S>(mut self, path: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scope = Some(path.into_iter().map(Into::into).collect());
        self
    }

    /// Token the event is waiting on.
    #[must_use]
    pub fn token(&self) -> CompletionToken {
        self.token
    }

    /// Optional field path of the view to park.
    #[must_use]
    pub fn scope(&self) -> Option<&[String]> {
        self.scope.as_deref()
    }
}

// ---------------------------------------------------------------------------
// Suspender / Completer
// ---------------------------------------------------------------------------

/// Handed to [`AsyncTransform::start`](crate::AsyncTransform::start) so the
/// processor can obtain a token bound to its configured timeout.
#[derive(Clone)]
pub struct Suspender {
    completions: Arc<dyn Completions>,
    timeout: Duration,
}

impl Suspender {
    /// Create a suspender issuing tokens from `completions`.
    pub fn new(completions: Arc<dyn Completions>, timeout: Duration) -> Self {
        Self {
            completions,
            timeout,
        }
    }

    /// Timeout applied to events paused through this suspender.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Issue a token and return the pause request together with the one-shot
    /// [`Completer`] that resolves it.
    #[must_use]
    pub fn suspend(&self) -> (PauseRequest, Completer) {
        let token = self.completions.issue(self.timeout);
        (
            PauseRequest::new(token),
            Completer {
                token,
                completions: Arc::clone(&self.completions),
            },
        )
    }
}

impl fmt::Debug for Suspender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Suspender")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// One-shot handle resolving a suspended event. Safe to move to any thread.
pub struct Completer {
    token: CompletionToken,
    completions: Arc<dyn Completions>,
}

impl Completer {
    /// Token this completer resolves.
    #[must_use]
    pub fn token(&self) -> CompletionToken {
        self.token
    }

    /// Deliver an outcome. Returns `false` if the event already timed out.
    pub fn complete(self, outcome: Completion) -> bool {
        self.completions.complete(self.token, outcome)
    }

    /// Deliver a successful value.
    pub fn succeed(self, value: Value) -> bool {
        self.complete(Ok(value))
    }

    /// Deliver a failure.
    pub fn fail(self, reason: impl Into<String>) -> bool {
        self.complete(Err(CompletionError::Failed(reason.into())))
    }
}

impl fmt::Debug for Completer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completer")
            .field("token", &self.token)
            .finish_non_exhaustive()
    }
}
