// SPDX-License-Identifier: MIT OR Apache-2.0
//! Destinations for dry-run events.
//!
//! Test events never reach an output queue; once their chain completes the
//! router hands them to the engine's [`TestSink`].

use logpipe_core::Event;
use serde_json::Value;
use std::sync::Mutex;
use tracing::info;

/// Receives finished dry-run events.
pub trait TestSink: Send + Sync {
    /// Record a finished test event.
    fn record(&self, event: &Event);
}

/// Logs each test event as JSON under the `logpipe.test` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTestSink;

impl TestSink for LogTestSink {
    fn record(&self, event: &Event) {
        match serde_json::to_string(&event.record()) {
            Ok(json) => info!(target: "logpipe.test", event = %json, "test event"),
            Err(e) => info!(target: "logpipe.test", id = %event.id(), error = %e, "test event"),
        }
    }
}

/// Keeps test events in memory, for tests and the CLI.
#[derive(Debug, Default)]
pub struct MemoryTestSink {
    records: Mutex<Vec<Value>>,
}

impl MemoryTestSink {
    /// Empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshots of the recorded events, oldest first.
    pub fn events(&self) -> Vec<Value> {
        self.records
            .lock()
            .expect("test sink lock poisoned")
            .clone()
    }

    /// Number of recorded events.
    pub fn len(&self) -> usize {
        self.records.lock().expect("test sink lock poisoned").len()
    }

    /// `true` if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TestSink for MemoryTestSink {
    fn record(&self, event: &Event) {
        let value = serde_json::to_value(event.record()).unwrap_or(Value::Null);
        self.records
            .lock()
            .expect("test sink lock poisoned")
            .push(value);
    }
}
