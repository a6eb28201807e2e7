// SPDX-License-Identifier: MIT OR Apache-2.0
//! Registry of events suspended by asynchronous processors.
//!
//! Every token lives in one [`DashMap`] slot. A completion and the timeout
//! sweep both consume a paused event through an atomic removal on that map,
//! so exactly one of them resumes it; the loser sees an empty slot and does
//! nothing.
//!
//! A completion may arrive before the worker has parked the event (the
//! processor can hand its completer to a fast external party). The slot then
//! records the outcome and the event resumes as soon as it is parked.

use crate::lifecycle::Lifecycle;
use crate::resume::Resume;
use crossbeam_channel::Sender;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use logpipe_core::{
    AsyncTransform, Completion, CompletionError, CompletionToken, Completions, Event, Processor,
};
use logpipe_telemetry::{Metrics, names};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, error, trace};

/// Deadline used when `now + timeout` does not fit in an [`Instant`].
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

// ---------------------------------------------------------------------------
// PausedEvent
// ---------------------------------------------------------------------------

/// An event parked until its completion token resolves or its deadline
/// passes.
pub struct PausedEvent {
    event: Event,
    token: CompletionToken,
    deadline: Instant,
    name: String,
    transform: Arc<dyn AsyncTransform>,
    success: Option<Arc<Processor>>,
    failure: Option<Arc<Processor>>,
    exception: Option<Arc<Processor>>,
    scoped: bool,
}

impl PausedEvent {
    /// Park `event`, suspended by `processor`, until `token` resolves or
    /// `timeout` elapses.
    ///
    /// `scoped` records that the event was wrapped at suspension time; the
    /// view is released after the outcome is applied.
    pub fn new(
        event: Event,
        token: CompletionToken,
        timeout: Duration,
        processor: &Processor,
        transform: Arc<dyn AsyncTransform>,
        scoped: bool,
    ) -> Self {
        Self {
            event,
            token,
            deadline: deadline_after(timeout),
            name: processor.name().to_string(),
            transform,
            success: processor.success().cloned(),
            failure: processor.failure().cloned(),
            exception: processor.exception().cloned(),
            scoped,
        }
    }

    /// Token the event waits on.
    pub fn token(&self) -> CompletionToken {
        self.token
    }

    /// Instant after which the event resumes with a timeout.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// The parked event.
    pub fn event(&self) -> &Event {
        &self.event
    }

    /// Rebuild the event's chain so the next step applies `outcome`.
    fn into_resumed(self, outcome: Completion) -> Event {
        let Self {
            mut event,
            name,
            transform,
            success,
            failure,
            exception,
            scoped,
            ..
        } = self;
        let step = Processor::transform(
            format!("{name}:resume"),
            Resume::new(name.clone(), transform, outcome, scoped),
        )
        .with_continuations(success, failure, exception);
        event.insert_processor(Arc::new(step));
        event
    }
}

impl fmt::Debug for PausedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PausedEvent")
            .field("token", &self.token)
            .field("processor", &self.name)
            .field("event", &self.event.id())
            .field("scoped", &self.scoped)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Slots
// ---------------------------------------------------------------------------

enum Slot {
    /// Token handed out, event not parked yet.
    Issued { deadline: Instant },
    /// Event parked.
    Paused(Box<PausedEvent>),
    /// Completion arrived before the event was parked.
    Completed {
        outcome: Completion,
        deadline: Instant,
    },
}

impl Slot {
    fn deadline(&self) -> Instant {
        match self {
            Self::Issued { deadline } | Self::Completed { deadline, .. } => *deadline,
            Self::Paused(paused) => paused.deadline,
        }
    }
}

// ---------------------------------------------------------------------------
// EventsRepository
// ---------------------------------------------------------------------------

/// Process-wide registry of paused events.
///
/// Resumed events are re-enqueued on the shared input queue without
/// blocking. If the queue is full the event is ended and
/// `Pipeline.<name>.blocked.in` is marked.
pub struct EventsRepository {
    slots: DashMap<CompletionToken, Slot>,
    expiry: Mutex<BTreeSet<(Instant, CompletionToken)>>,
    input: Sender<Event>,
    metrics: Arc<Metrics>,
    lifecycle: Arc<Lifecycle>,
}

impl EventsRepository {
    /// Repository resuming events onto `input`.
    pub fn new(input: Sender<Event>, metrics: Arc<Metrics>, lifecycle: Arc<Lifecycle>) -> Self {
        Self {
            slots: DashMap::new(),
            expiry: Mutex::new(BTreeSet::new()),
            input,
            metrics,
            lifecycle,
        }
    }

    /// Create a token whose slot goes stale after `timeout` if nothing parks
    /// an event on it.
    pub fn issue(&self, timeout: Duration) -> CompletionToken {
        let token = CompletionToken::new();
        let deadline = deadline_after(timeout);
        self.slots.insert(token, Slot::Issued { deadline });
        self.index(deadline, token);
        trace!(target: "logpipe.repository", %token, "token issued");
        token
    }

    /// Park an event. If its completion already arrived it resumes at once.
    pub fn pause(&self, paused: PausedEvent) {
        let token = paused.token;
        let deadline = paused.deadline;
        let resume_now = match self.slots.entry(token) {
            Entry::Occupied(entry) if matches!(entry.get(), Slot::Completed { .. }) => {
                match entry.remove() {
                    Slot::Completed { outcome, .. } => Some((paused, outcome)),
                    _ => unreachable!("slot checked above"),
                }
            }
            Entry::Occupied(entry) if matches!(entry.get(), Slot::Paused(_)) => {
                drop(entry);
                error!(target: "logpipe.repository", %token, "token already has a paused event");
                paused.event.end();
                self.lifecycle.finish();
                return;
            }
            Entry::Occupied(mut entry) => {
                entry.insert(Slot::Paused(Box::new(paused)));
                None
            }
            Entry::Vacant(entry) => {
                entry.insert(Slot::Paused(Box::new(paused)));
                None
            }
        };
        match resume_now {
            Some((paused, outcome)) => {
                trace!(target: "logpipe.repository", %token, "completion arrived before pause");
                self.resume(paused, outcome);
            }
            None => {
                self.index(deadline, token);
                trace!(target: "logpipe.repository", %token, "event paused");
            }
        }
    }

    /// Resolve `token`. Returns `true` if this call resumed a paused event or
    /// recorded the outcome for an event about to be parked; `false` if the
    /// token is unknown, timed out or already completed.
    pub fn complete(&self, token: CompletionToken, outcome: Completion) -> bool {
        let paused = match self.slots.entry(token) {
            Entry::Occupied(mut entry) => match entry.get() {
                Slot::Paused(_) => match entry.remove() {
                    Slot::Paused(paused) => paused,
                    _ => unreachable!("slot checked above"),
                },
                Slot::Issued { deadline } => {
                    let deadline = *deadline;
                    entry.insert(Slot::Completed { outcome, deadline });
                    return true;
                }
                Slot::Completed { .. } => {
                    debug!(target: "logpipe.repository", %token, "duplicate completion ignored");
                    return false;
                }
            },
            Entry::Vacant(_) => {
                debug!(target: "logpipe.repository", %token, "completion for unknown token ignored");
                return false;
            }
        };
        self.resume(*paused, outcome);
        true
    }

    /// Remove `token` without resuming. A paused event is ended. Idempotent;
    /// returns `true` if something was removed.
    pub fn cancel(&self, token: CompletionToken) -> bool {
        match self.slots.remove(&token) {
            Some((_, Slot::Paused(paused))) => {
                debug!(target: "logpipe.repository", %token, "paused event cancelled");
                paused.event.end();
                self.lifecycle.finish();
                true
            }
            Some(_) => true,
            None => false,
        }
    }

    /// Expire every entry whose deadline is at or before `now`. Paused
    /// events resume with [`CompletionError::TimedOut`]; stale issued or
    /// completed slots are dropped. Returns the number of timed-out events.
    pub fn sweep(&self, now: Instant) -> usize {
        let due: Vec<CompletionToken> = {
            let mut expiry = self.expiry.lock().expect("expiry index lock poisoned");
            let mut due = Vec::new();
            while let Some(&(deadline, token)) = expiry.first() {
                if deadline > now {
                    break;
                }
                expiry.pop_first();
                due.push(token);
            }
            due
        };

        let mut timed_out = 0;
        for token in due {
            match self.slots.remove_if(&token, |_, slot| slot.deadline() <= now) {
                Some((_, Slot::Paused(paused))) => {
                    debug!(target: "logpipe.repository", %token, processor = %paused.name, "paused event timed out");
                    self.resume(*paused, Err(CompletionError::TimedOut));
                    timed_out += 1;
                }
                Some(_) => {
                    trace!(target: "logpipe.repository", %token, "stale token dropped");
                }
                None => {}
            }
        }
        timed_out
    }

    /// Number of tokens currently tracked, in any state.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// `true` if no token is tracked.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of parked events.
    pub fn paused(&self) -> usize {
        self.slots
            .iter()
            .filter(|entry| matches!(entry.value(), Slot::Paused(_)))
            .count()
    }

    fn index(&self, deadline: Instant, token: CompletionToken) {
        self.expiry
            .lock()
            .expect("expiry index lock poisoned")
            .insert((deadline, token));
    }

    fn resume(&self, paused: PausedEvent, outcome: Completion) {
        let token = paused.token;
        let event = paused.into_resumed(outcome);
        let pipeline = event.current_pipeline().unwrap_or_default().to_string();
        match event.offer(&self.input) {
            Ok(()) => {
                trace!(target: "logpipe.repository", %token, pipeline = %pipeline, "event resumed");
            }
            Err(event) => {
                debug!(target: "logpipe.repository", %token, pipeline = %pipeline, "input queue full, resumed event lost");
                self.metrics.meter(&names::blocked_in(&pipeline)).mark();
                event.end();
                self.lifecycle.finish();
            }
        }
    }
}

impl Completions for EventsRepository {
    fn issue(&self, timeout: Duration) -> CompletionToken {
        EventsRepository::issue(self, timeout)
    }

    fn complete(&self, token: CompletionToken, outcome: Completion) -> bool {
        EventsRepository::complete(self, token, outcome)
    }
}

impl fmt::Debug for EventsRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventsRepository")
            .field("tokens", &self.slots.len())
            .finish_non_exhaustive()
    }
}
