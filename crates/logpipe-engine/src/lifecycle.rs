// SPDX-License-Identifier: MIT OR Apache-2.0
//! Live-event accounting used to wait for the engine to drain.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Counts events that have entered the engine but not yet reached a terminal
/// state or an output queue. Paused events stay live.
#[derive(Debug, Default)]
pub struct Lifecycle {
    live: AtomicUsize,
    lock: Mutex<()>,
    idle: Condvar,
}

impl Lifecycle {
    /// An event entered the engine.
    pub fn begin(&self) {
        self.live.fetch_add(1, Ordering::SeqCst);
    }

    /// An event left the engine.
    pub fn finish(&self) {
        if self.live.fetch_sub(1, Ordering::SeqCst) == 1 {
            let _guard = self.lock.lock().expect("lifecycle lock poisoned");
            self.idle.notify_all();
        }
    }

    /// Number of live events.
    #[must_use]
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Block until no event is live or `timeout` elapses. Returns `true` when
    /// the engine drained.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.lock.lock().expect("lifecycle lock poisoned");
        loop {
            if self.live() == 0 {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            guard = self
                .idle
                .wait_timeout(guard, deadline - now)
                .expect("lifecycle lock poisoned")
                .0;
        }
    }
}
