//! Termination coordination.
//!
//! A single-writer state machine over {Running, Draining, Stopped}. The
//! first terminal condition to fire wins; later signals are ignored.
//! Workers poll the cancellation flag and never write state.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Condvar, Mutex};

/// Why the run left the Running state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// Configured operation count reached across all workers.
    CountReached,
    /// Configured wall-clock duration elapsed.
    DurationElapsed,
    /// The shared key iterator ran dry.
    KeysExhausted,
    /// A latency sample exceeded a configured SLO.
    SloBreach(String),
    /// Stop requested from outside (signal or control server).
    ExternalStop,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::CountReached => write!(f, "operation count reached"),
            StopReason::DurationElapsed => write!(f, "duration elapsed"),
            StopReason::KeysExhausted => write!(f, "key stream exhausted"),
            StopReason::SloBreach(detail) => write!(f, "latency SLO breach: {}", detail),
            StopReason::ExternalStop => write!(f, "external stop"),
        }
    }
}

/// Coordinator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    Draining,
    Stopped,
}

struct Inner {
    state: RunState,
    reason: Option<StopReason>,
}

/// Unifies count, duration, SLO and external termination into one
/// cancellation flag plus an awaitable final state.
pub struct TerminationCoordinator {
    cancelled: AtomicBool,
    inner: Mutex<Inner>,
    transitioned: Condvar,
}

impl Default for TerminationCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl TerminationCoordinator {
    pub fn new() -> Self {
        Self {
            cancelled: AtomicBool::new(false),
            inner: Mutex::new(Inner {
                state: RunState::Running,
                reason: None,
            }),
            transitioned: Condvar::new(),
        }
    }

    /// Fast cancellation poll for worker loops.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub fn state(&self) -> RunState {
        self.inner.lock().state
    }

    /// Requests termination. Idempotent; only the first reason is kept.
    pub fn signal(&self, reason: StopReason) {
        let mut inner = self.inner.lock();
        if inner.state != RunState::Running {
            return;
        }
        inner.state = RunState::Draining;
        inner.reason = Some(reason);
        self.cancelled.store(true, Ordering::Relaxed);
        self.transitioned.notify_all();
    }

    /// Marks the run fully stopped. Called by the controller once every
    /// worker has joined with an empty in-flight gate.
    pub fn mark_stopped(&self) {
        let mut inner = self.inner.lock();
        if inner.reason.is_none() {
            // All workers completed their share without a trigger firing.
            inner.reason = Some(StopReason::CountReached);
        }
        inner.state = RunState::Stopped;
        self.cancelled.store(true, Ordering::Relaxed);
        self.transitioned.notify_all();
    }

    /// Blocks until the run reaches Stopped and returns the reason.
    pub fn await_stopped(&self) -> StopReason {
        let mut inner = self.inner.lock();
        while inner.state != RunState::Stopped {
            self.transitioned.wait(&mut inner);
        }
        inner
            .reason
            .clone()
            .unwrap_or(StopReason::CountReached)
    }

    /// Reason observed so far, if any terminal condition fired.
    pub fn reason(&self) -> Option<StopReason> {
        self.inner.lock().reason.clone()
    }
}
