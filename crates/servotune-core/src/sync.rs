//! Completion-event primitive
//!
//! A small resettable event used to signal the end of an estimation or
//! validation stage to callers blocked in `wait_until_done`.

use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// Resettable one-to-many completion event.
///
/// `signal` wakes every waiter and leaves the event set until the next
/// `reset`. Waiting on an already-set event returns immediately.
#[derive(Debug, Default)]
pub struct Event {
    set: Mutex<bool>,
    cond: Condvar,
}

impl Event {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear the event. Subsequent waits block until the next `signal`.
    pub fn reset(&self) {
        *self.set.lock().unwrap() = false;
    }

    /// Set the event and wake all current waiters.
    pub fn signal(&self) {
        let mut set = self.set.lock().unwrap();
        *set = true;
        self.cond.notify_all();
    }

    /// Whether the event is currently set.
    pub fn is_set(&self) -> bool {
        *self.set.lock().unwrap()
    }

    /// Block until the event is set.
    pub fn wait(&self) {
        let mut set = self.set.lock().unwrap();
        while !*set {
            set = self.cond.wait(set).unwrap();
        }
    }

    /// Block until the event is set or `timeout` elapses.
    /// Returns true if the event was set.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        let mut set = self.set.lock().unwrap();
        while !*set {
            let now = std::time::Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, res) = self.cond.wait_timeout(set, deadline - now).unwrap();
            set = guard;
            if res.timed_out() && !*set {
                return false;
            }
        }
        true
    }
}
