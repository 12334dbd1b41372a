//! Per-worker in-flight gate.
//!
//! A counting semaphore bounding the number of outstanding async
//! submissions. The worker acquires a slot before submitting; the
//! completion handler releases it from a driver I/O thread.

use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// Counting semaphore with capacity `queue_depth`.
pub struct InFlightGate {
    capacity: usize,
    in_flight: Mutex<usize>,
    changed: Condvar,
}

impl InFlightGate {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            in_flight: Mutex::new(0),
            changed: Condvar::new(),
        }
    }

    /// Blocks until a slot is free, then takes it.
    pub fn acquire(&self) {
        let mut in_flight = self.in_flight.lock();
        while *in_flight >= self.capacity {
            self.changed.wait(&mut in_flight);
        }
        *in_flight += 1;
    }

    /// Releases one slot. Called from completion handlers.
    pub fn release(&self) {
        let mut in_flight = self.in_flight.lock();
        debug_assert!(*in_flight > 0, "release without acquire");
        *in_flight = in_flight.saturating_sub(1);
        self.changed.notify_all();
    }

    /// Blocks until no submissions are outstanding.
    pub fn await_idle(&self) {
        let mut in_flight = self.in_flight.lock();
        while *in_flight > 0 {
            self.changed.wait(&mut in_flight);
        }
    }

    /// Like `await_idle` with a deadline; returns false on timeout.
    pub fn await_idle_timeout(&self, timeout: Duration) -> bool {
        let mut in_flight = self.in_flight.lock();
        while *in_flight > 0 {
            if self.changed.wait_for(&mut in_flight, timeout).timed_out() {
                return *in_flight == 0;
            }
        }
        true
    }

    /// Currently outstanding submissions.
    pub fn in_flight(&self) -> usize {
        *self.in_flight.lock()
    }
}
