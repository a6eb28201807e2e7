// SPDX-License-Identifier: MIT OR Apache-2.0
//! Transforms that steer or observe the event without reshaping it.

use logpipe_core::{Event, ProcessorError, Transform};
use tracing::{Level, debug, error, info, trace, warn};

/// Always raises a recoverable processing error.
#[derive(Debug, Clone)]
pub struct Fail {
    message: String,
}

impl Fail {
    /// Fail with `message`.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Transform for Fail {
    fn process(&self, _event: &mut Event) -> Result<bool, ProcessorError> {
        Err(ProcessorError::processing(self.message.clone()))
    }
}

/// Logs the event under the `logpipe.processors` target.
#[derive(Debug, Clone)]
pub struct Log {
    level: Level,
    message: String,
}

impl Log {
    /// Log at `level` with `message`.
    pub fn new(level: Level, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
        }
    }
}

impl Transform for Log {
    fn process(&self, event: &mut Event) -> Result<bool, ProcessorError> {
        let record = serde_json::to_string(&event.record())
            .map_err(|e| ProcessorError::processing_with("event is not serialisable", e))?;
        let message = &self.message;
        match self.level {
            Level::ERROR => error!(target: "logpipe.processors", event = %record, "{message}"),
            Level::WARN => warn!(target: "logpipe.processors", event = %record, "{message}"),
            Level::INFO => info!(target: "logpipe.processors", event = %record, "{message}"),
            Level::DEBUG => debug!(target: "logpipe.processors", event = %record, "{message}"),
            _ => trace!(target: "logpipe.processors", event = %record, "{message}"),
        }
        Ok(true)
    }
}
