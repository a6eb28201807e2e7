// SPDX-License-Identifier: MIT OR Apache-2.0
//! Processor error taxonomy.
//!
//! A processor returns `Ok(bool)` for its business result. Every other
//! outcome travels as a [`ProcessorError`]; only some of them are failures.
//! The worker converts each variant into a processing status, so nothing
//! raised here propagates past the execution of a single processor.

use crate::completion::PauseRequest;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// ErrorKind
// ---------------------------------------------------------------------------

/// Stable classification used by exception statistics and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Suspension pending an external completion.
    Paused,
    /// Deliberate discard of the event.
    Discarded,
    /// Deliberate no-op.
    Ignored,
    /// Recoverable processing failure.
    Processing,
    /// A synchronous processor attempted to suspend.
    AsyncMismatch,
    /// The step ceiling was exceeded.
    LoopDetected,
    /// The processor panicked.
    Panic,
    /// Anything else.
    Unexpected,
}

impl ErrorKind {
    /// Stable `&'static str` representation (e.g. `"ASYNC_MISMATCH"`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Paused => "PAUSED",
            Self::Discarded => "DISCARDED",
            Self::Ignored => "IGNORED",
            Self::Processing => "PROCESSING",
            Self::AsyncMismatch => "ASYNC_MISMATCH",
            Self::LoopDetected => "LOOP_DETECTED",
            Self::Panic => "PANIC",
            Self::Unexpected => "UNEXPECTED",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ProcessorError
// ---------------------------------------------------------------------------

/// Non-boolean outcomes of a processor invocation.
#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    /// The event must be parked until the request's token completes.
    #[error("event paused on token {}", .0.token())]
    Paused(PauseRequest),

    /// The event must be discarded.
    #[error("event discarded")]
    Discard,

    /// Nothing happened; continue without inserting continuations.
    #[error("event ignored")]
    Ignore,

    /// Recoverable failure, absorbed by an on-exception continuation when one
    /// is configured.
    #[error("processing failed: {message}")]
    Processing {
        /// Human-readable reason.
        message: String,
        /// Underlying cause, if any.
        #[source]
        source: Option<anyhow::Error>,
    },

    /// Unrecoverable failure.
    #[error("unexpected failure: {0}")]
    Unexpected(#[source] anyhow::Error),
}

impl ProcessorError {
    /// Recoverable failure with a message.
    pub fn processing(message: impl Into<String>) -> Self {
        Self::Processing {
            message: message.into(),
            source: None,
        }
    }

    /// Recoverable failure caused by another error.
    pub fn processing_with(message: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Self::Processing {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Unrecoverable failure.
    pub fn unexpected(source: impl Into<anyhow::Error>) -> Self {
        Self::Unexpected(source.into())
    }

    /// Classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Paused(_) => ErrorKind::Paused,
            Self::Discard => ErrorKind::Discarded,
            Self::Ignore => ErrorKind::Ignored,
            Self::Processing { .. } => ErrorKind::Processing,
            Self::Unexpected(_) => ErrorKind::Unexpected,
        }
    }
}

// ---------------------------------------------------------------------------
// EventError
// ---------------------------------------------------------------------------

/// Structural errors on the event container itself.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventError {
    /// A view was requested through a value that is not an object.
    #[error("field '{path}' is not an object")]
    NotAnObject {
        /// Dotted path of the offending value.
        path: String,
    },
}
