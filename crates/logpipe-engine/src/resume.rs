// SPDX-License-Identifier: MIT OR Apache-2.0
//! The step inserted into a resumed event's chain.

use logpipe_core::{AsyncTransform, Completion, CompletionError, Event, ProcessorError, Transform};
use std::sync::{Arc, Mutex};

/// Delivers a completion outcome to the asynchronous processor that
/// suspended the event.
///
/// Runs as an ordinary transform so the worker applies the suspended
/// processor's continuations exactly as it would for a synchronous result.
/// When the event was parked under a scoped view, the view is released once
/// the outcome has been applied.
///
/// A timed-out outcome is still shown to the processor, but the step always
/// ends as a processing error, so the exception continuation runs (or the
/// event fails) whatever `complete` returns.
pub(crate) struct Resume {
    name: String,
    transform: Arc<dyn AsyncTransform>,
    outcome: Mutex<Option<Completion>>,
    scoped: bool,
}

impl Resume {
    pub(crate) fn new(
        name: impl Into<String>,
        transform: Arc<dyn AsyncTransform>,
        outcome: Completion,
        scoped: bool,
    ) -> Self {
        Self {
            name: name.into(),
            transform,
            outcome: Mutex::new(Some(outcome)),
            scoped,
        }
    }
}

impl Transform for Resume {
    fn process(&self, event: &mut Event) -> Result<bool, ProcessorError> {
        let outcome = self
            .outcome
            .lock()
            .expect("resume lock poisoned")
            .take()
            .ok_or_else(|| ProcessorError::unexpected(anyhow::anyhow!("completion already applied")))?;
        let timed_out = matches!(outcome, Err(CompletionError::TimedOut));
        let result = self.transform.complete(event, outcome);
        if self.scoped {
            event.unwrap();
        }
        if timed_out {
            return Err(ProcessorError::processing(format!("{} timed out", self.name)));
        }
        result
    }
}
