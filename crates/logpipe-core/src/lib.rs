// SPDX-License-Identifier: MIT OR Apache-2.0
//! logpipe-core
//!
//! The data model shared by every logpipe crate: the [`Event`] flowing through
//! pipelines, the [`Processor`] units of work applied to it, the immutable
//! [`Pipeline`] topology, and the error taxonomy processors use to signal
//! anything other than a plain business result.
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Suspension tokens and the completion entry point.
pub mod completion;
/// Processor error taxonomy.
pub mod error;
/// The event container and its traversal state.
pub mod event;
/// Named pipelines and their execution ranks.
pub mod pipeline;
/// Processors and their capability kinds.
pub mod processor;

pub use completion::{
    Completer, Completion, CompletionError, CompletionToken, Completions, PauseRequest, Suspender,
};
pub use error::{ErrorKind, EventError, ProcessorError};
pub use event::Event;
pub use pipeline::{PipeStep, Pipeline};
pub use processor::{AsyncTransform, Processor, ProcessorKind, Transform};
