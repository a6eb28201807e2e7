// SPDX-License-Identifier: MIT OR Apache-2.0
//! The event container and its traversal state.
//!
//! An [`Event`] is owned by exactly one party at a time: a queue, the worker
//! currently processing it, or the events repository while it is paused.
//! Terminal actions ([`Event::end`], [`Event::discard`]) and handoffs
//! ([`Event::offer`], [`Event::inject`]) take `self` by value, so an event
//! cannot be finalized twice.

use crate::error::EventError;
use crate::pipeline::Pipeline;
use crate::processor::Processor;
use chrono::{DateTime, Utc};
use crossbeam_channel::Sender;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::trace;
use uuid::Uuid;

/// A unit of data flowing through pipelines.
#[derive(Debug)]
pub struct Event {
    id: Uuid,
    timestamp: DateTime<Utc>,
    data: Map<String, Value>,
    /// Active views, innermost last. Each entry is an absolute field path.
    scopes: Vec<Vec<String>>,
    current_pipeline: Option<String>,
    next_pipeline: Option<String>,
    /// Pending processors; the last element runs next.
    pending: Vec<Arc<Processor>>,
    steps: u32,
    test: bool,
    metrics: bool,
}

/// Serialisable snapshot of an event, used by sinks and the CLI.
#[derive(Debug, Serialize)]
pub struct EventRecord<'a> {
    /// Event id.
    pub id: Uuid,
    /// Creation timestamp.
    pub timestamp: DateTime<Utc>,
    /// Pipeline the event was last processed in.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<&'a str>,
    /// All fields, ignoring any active view.
    pub fields: &'a Map<String, Value>,
}

impl Event {
    /// Create an event holding `data`, with metrics enabled.
    #[must_use]
    pub fn new(data: Map<String, Value>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            data,
            scopes: Vec::new(),
            current_pipeline: None,
            next_pipeline: None,
            pending: Vec::new(),
            steps: 0,
            test: false,
            metrics: true,
        }
    }

    /// Create an event with no fields.
    #[must_use]
    pub fn empty() -> Self {
        Self::new(Map::new())
    }

    /// Build an event from a JSON value, which must be an object.
    pub fn from_json(value: Value) -> Result<Self, EventError> {
        match value {
            Value::Object(data) => Ok(Self::new(data)),
            _ => Err(EventError::NotAnObject { path: ".".into() }),
        }
    }

    /// Mark this event as a dry-run event (builder style).
    #[must_use]
    pub fn into_test(mut self) -> Self {
        self.test = true;
        self
    }

    // -- identity ------------------------------------------------------------

    /// Unique event id.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Creation timestamp.
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Whether this is a dry-run event.
    #[must_use]
    pub fn is_test(&self) -> bool {
        self.test
    }

    /// Set or clear the dry-run flag.
    pub fn set_test(&mut self, test: bool) {
        self.test = test;
    }

    /// Whether per-event metrics are recorded for this event.
    #[must_use]
    pub fn metrics_enabled(&self) -> bool {
        self.metrics
    }

    /// Enable or disable per-event metrics.
    pub fn set_metrics(&mut self, enabled: bool) {
        self.metrics = enabled;
    }

    // -- fields --------------------------------------------------------------

    /// Read a field in the current view.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.scope()?.get(key)
    }

    /// `true` if the current view holds `key`.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.scope().is_some_and(|map| map.contains_key(key))
    }

    /// Write a field in the current view, returning the previous value.
    pub fn put(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.scope_mut().insert(key.into(), value.into())
    }

    /// Remove a field from the current view.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.scope_mut().remove(key)
    }

    /// Fields of the current view, or `None` if the viewed path does not
    /// exist yet.
    #[must_use]
    pub fn fields(&self) -> Option<&Map<String, Value>> {
        self.scope()
    }

    /// All fields, ignoring any active view.
    #[must_use]
    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    /// Consume the event and return its fields.
    #[must_use]
    pub fn into_data(self) -> Map<String, Value> {
        self.data
    }

    /// Snapshot suitable for serialisation.
    #[must_use]
    pub fn record(&self) -> EventRecord<'_> {
        EventRecord {
            id: self.id,
            timestamp: self.timestamp,
            pipeline: self.current_pipeline.as_deref(),
            fields: &self.data,
        }
    }

    // -- views ---------------------------------------------------------------

    /// Narrow the field view to `path`, relative to the current view.
    ///
    /// The view shares storage with the event: writes through it are visible
    /// once [`unwrap`](Self::unwrap) restores the parent view. Missing path
    /// segments are created on first write.
    pub fn wrap<I, S>(&mut self, path: I) -> Result<(), EventError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut absolute = self.scopes.last().cloned().unwrap_or_default();
        absolute.extend(path.into_iter().map(Into::into));

        let mut map = &self.data;
        for (depth, key) in absolute.iter().enumerate() {
            match map.get(key) {
                Some(Value::Object(inner)) => map = inner,
                Some(_) => {
                    return Err(EventError::NotAnObject {
                        path: absolute[..=depth].join("."),
                    });
                }
                None => break,
            }
        }
        self.scopes.push(absolute);
        Ok(())
    }

    /// Restore the parent view. Returns `false` if no view was active.
    pub fn unwrap(&mut self) -> bool {
        self.scopes.pop().is_some()
    }

    /// Absolute path of the current view, if any.
    #[must_use]
    pub fn scope_path(&self) -> Option<&[String]> {
        self.scopes.last().map(Vec::as_slice)
    }

    fn scope(&self) -> Option<&Map<String, Value>> {
        let mut map = &self.data;
        if let Some(path) = self.scopes.last() {
            for key in path {
                map = map.get(key)?.as_object()?;
            }
        }
        Some(map)
    }

    fn scope_mut(&mut self) -> &mut Map<String, Value> {
        let mut map = &mut self.data;
        if let Some(path) = self.scopes.last() {
            for key in path {
                let slot = map
                    .entry(key.clone())
                    .or_insert_with(|| Value::Object(Map::new()));
                if !slot.is_object() {
                    *slot = Value::Object(Map::new());
                }
                map = slot.as_object_mut().expect("scope slot is an object");
            }
        }
        map
    }

    // -- traversal -----------------------------------------------------------

    /// Pipeline the event is currently traversing.
    #[must_use]
    pub fn current_pipeline(&self) -> Option<&str> {
        self.current_pipeline.as_deref()
    }

    /// Pipeline the event moves to once its chain completes.
    #[must_use]
    pub fn next_pipeline(&self) -> Option<&str> {
        self.next_pipeline.as_deref()
    }

    /// Override the successor pipeline.
    pub fn set_next_pipeline(&mut self, next: Option<String>) {
        self.next_pipeline = next;
    }

    /// Switch the event into `pipeline` and load the pipeline's processors
    /// ahead of anything already pending.
    pub fn enter_pipeline(&mut self, pipeline: &Pipeline) {
        self.current_pipeline = Some(pipeline.name().to_string());
        self.next_pipeline = pipeline.next().map(str::to_string);
        let processors = pipeline.processors_for(self);
        self.pending.extend(processors.into_iter().rev());
    }

    /// Pop the next pending processor.
    pub fn next_processor(&mut self) -> Option<Arc<Processor>> {
        self.pending.pop()
    }

    /// Push a processor so that it runs next.
    pub fn insert_processor(&mut self, processor: Arc<Processor>) {
        self.pending.push(processor);
    }

    /// Number of pending processors.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Number of processor steps executed so far.
    #[must_use]
    pub fn steps(&self) -> u32 {
        self.steps
    }

    /// Count one more executed step and return the new total.
    pub fn increment_steps(&mut self) -> u32 {
        self.steps = self.steps.saturating_add(1);
        self.steps
    }

    /// Independent copy: same fields and flags, fresh id, traversal state and
    /// step count.
    #[must_use]
    pub fn fork(&self) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: self.timestamp,
            data: self.data.clone(),
            scopes: Vec::new(),
            current_pipeline: None,
            next_pipeline: None,
            pending: Vec::new(),
            steps: 0,
            test: self.test,
            metrics: self.metrics,
        }
    }

    // -- handoff and terminal actions ----------------------------------------

    /// Non-blocking handoff into `queue`. The event comes back on failure.
    pub fn offer(self, queue: &Sender<Event>) -> Result<(), Event> {
        queue.try_send(self).map_err(|e| e.into_inner())
    }

    /// Enter `pipeline` and hand the event to `queue` without blocking.
    pub fn inject(mut self, pipeline: &Pipeline, queue: &Sender<Event>) -> Result<(), Event> {
        self.enter_pipeline(pipeline);
        self.offer(queue)
    }

    /// Finalize the event after processing ended.
    pub fn end(self) {
        trace!(target: "logpipe.event", id = %self.id, steps = self.steps, "event ended");
    }

    /// Finalize the event after it was dropped.
    pub fn discard(self) {
        trace!(target: "logpipe.event", id = %self.id, steps = self.steps, "event discarded");
    }
}

impl Default for Event {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(value: Value) -> Event {
        Event::from_json(value).unwrap()
    }

    #[test]
    fn wrap_writes_land_in_parent() {
        let mut ev = event(json!({"a": {"b": 1}}));
        ev.wrap(["a"]).unwrap();
        assert_eq!(ev.get("b"), Some(&json!(1)));
        ev.put("c", 2);
        assert!(ev.unwrap());
        assert_eq!(ev.get("a"), Some(&json!({"b": 1, "c": 2})));
    }

    #[test]
    fn nested_wrap_is_relative() {
        let mut ev = event(json!({"a": {"b": {"c": true}}}));
        ev.wrap(["a"]).unwrap();
        ev.wrap(["b"]).unwrap();
        assert_eq!(ev.scope_path(), Some(&["a".to_string(), "b".to_string()][..]));
        assert_eq!(ev.get("c"), Some(&json!(true)));
        ev.unwrap();
        assert!(ev.contains_key("b"));
    }

    #[test]
    fn wrap_missing_path_creates_on_write() {
        let mut ev = Event::empty();
        ev.wrap(["x", "y"]).unwrap();
        assert!(ev.fields().is_none());
        ev.put("z", "v");
        ev.unwrap();
        assert_eq!(ev.data().get("x"), Some(&json!({"y": {"z": "v"}})));
    }

    #[test]
    fn wrap_through_scalar_fails() {
        let mut ev = event(json!({"a": 3}));
        let err = ev.wrap(["a", "b"]).unwrap_err();
        assert_eq!(err, EventError::NotAnObject { path: "a".into() });
        assert!(ev.scope_path().is_none());
    }

    #[test]
    fn unwrap_without_view_is_false() {
        let mut ev = Event::empty();
        assert!(!ev.unwrap());
    }

    #[test]
    fn fork_has_fresh_traversal_state() {
        let mut ev = event(json!({"k": 1})).into_test();
        ev.increment_steps();
        ev.insert_processor(Arc::new(Processor::drop_event("d")));
        let copy = ev.fork();
        assert_ne!(copy.id(), ev.id());
        assert_eq!(copy.steps(), 0);
        assert_eq!(copy.pending_len(), 0);
        assert!(copy.is_test());
        assert_eq!(copy.data(), ev.data());
    }

    #[test]
    fn offer_hands_event_back_when_full() {
        let (tx, _rx) = crossbeam_channel::bounded(1);
        Event::empty().offer(&tx).unwrap();
        let back = Event::empty().offer(&tx).unwrap_err();
        assert_eq!(back.steps(), 0);
    }

    #[test]
    fn from_json_rejects_non_objects() {
        assert!(Event::from_json(json!([1, 2])).is_err());
    }
}
