//! Per-thread dispatch loop.
//!
//! Each worker owns a runner and an in-flight gate, pulls keys from the
//! shared generator, and submits rate-gated operations. Completion
//! handlers run on driver I/O threads and must only touch lock-free
//! counters, the completion sequencer and the gate.
//!
//! Driver I/O threads may finish operations in any order. Every
//! submission carries a per-worker sequence number; the sequencer
//! buffers completions that land early and delivers them to the
//! collector chain strictly in submission order, releasing the in-flight
//! slot as each one is delivered.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use rand::Rng;

use crate::collector::{Collector, OpEvent, OpOutcome};
use crate::driver::CompletionHandler;
use crate::generator::{PartitionKey, PartitionKeyGenerator};
use crate::metrics::OpKind;
use crate::workload::StressRunner;

use super::coordinator::StopReason;
use super::gate::InFlightGate;
use super::{Phase, StressContext};

/// One finished operation, held until its turn in submission order.
struct CompletedOp {
    kind: OpKind,
    key_text: String,
    start_nanos: u64,
    end_nanos: u64,
    outcome: OpOutcome,
}

struct SequencerState {
    /// Sequence number of the next completion to deliver.
    next: u64,
    /// Completions that arrived ahead of their turn.
    pending: BTreeMap<u64, CompletedOp>,
}

/// Restores per-worker submission order on the completion path.
///
/// Collector invocation order per worker equals submission order even
/// though the driver's completion order does not.
struct CompletionSequencer {
    ctx: Arc<StressContext>,
    gate: Arc<InFlightGate>,
    worker: usize,
    state: Mutex<SequencerState>,
}

impl CompletionSequencer {
    fn new(ctx: Arc<StressContext>, gate: Arc<InFlightGate>, worker: usize) -> Self {
        Self {
            ctx,
            gate,
            worker,
            state: Mutex::new(SequencerState {
                next: 0,
                pending: BTreeMap::new(),
            }),
        }
    }

    /// Registers a completion and delivers every operation that is now
    /// in order. The state lock serializes delivery, so collectors see a
    /// strict per-worker sequence.
    fn complete(&self, sequence: u64, op: CompletedOp) {
        let mut state = self.state.lock();
        state.pending.insert(sequence, op);
        loop {
            let next = state.next;
            let Some(op) = state.pending.remove(&next) else {
                break;
            };
            state.next += 1;
            self.deliver(&op);
        }
    }

    fn deliver(&self, op: &CompletedOp) {
        let event = OpEvent {
            kind: op.kind,
            partition_key: &op.key_text,
            worker: self.worker,
            start_nanos: op.start_nanos,
            end_nanos: op.end_nanos,
            outcome: &op.outcome,
        };
        self.ctx.collectors.collect(&event);

        if op.outcome.is_success() {
            let latency = op.end_nanos.saturating_sub(op.start_nanos);
            let limit = match op.kind {
                OpKind::Select => self.ctx.max_read_latency_nanos,
                OpKind::Mutation => self.ctx.max_write_latency_nanos,
                _ => None,
            };
            if let Some(limit) = limit
                && latency > limit
            {
                self.ctx.coordinator.signal(StopReason::SloBreach(format!(
                    "{} took {}us, limit {}us",
                    op.kind,
                    latency / 1_000,
                    limit / 1_000
                )));
            }
        }

        self.gate.release();
    }
}

pub(super) struct Worker {
    ctx: Arc<StressContext>,
    keys: Arc<PartitionKeyGenerator>,
    runner: Box<dyn StressRunner>,
    phase: Phase,
    /// This worker's share of the configured iteration count.
    quota: Option<u64>,
    gate: Arc<InFlightGate>,
    sequencer: Arc<CompletionSequencer>,
}

impl Worker {
    pub(super) fn new(
        index: usize,
        ctx: Arc<StressContext>,
        keys: Arc<PartitionKeyGenerator>,
        runner: Box<dyn StressRunner>,
        phase: Phase,
        quota: Option<u64>,
    ) -> Self {
        let gate = Arc::new(InFlightGate::new(ctx.config.queue_depth));
        let sequencer = Arc::new(CompletionSequencer::new(
            Arc::clone(&ctx),
            Arc::clone(&gate),
            index,
        ));
        Self {
            ctx,
            keys,
            runner,
            phase,
            quota,
            gate,
            sequencer,
        }
    }

    /// Runs the dispatch loop to completion, then drains in-flight work.
    pub(super) fn run(mut self) {
        let mut submitted: u64 = 0;

        loop {
            if self.ctx.coordinator.is_cancelled() {
                break;
            }
            if let Some(quota) = self.quota
                && submitted >= quota
            {
                break;
            }

            let Some(key) = self.keys.next() else {
                self.ctx.coordinator.signal(StopReason::KeysExhausted);
                break;
            };

            let (kind, statement) = self.next_operation(&key);

            self.ctx.rate_limiter.acquire();
            if self.ctx.coordinator.is_cancelled() {
                break;
            }

            self.gate.acquire();
            if self.ctx.coordinator.is_cancelled() {
                self.gate.release();
                break;
            }

            let start_nanos = self.ctx.epoch.elapsed().as_nanos() as u64;
            let handler = completion_handler(
                Arc::clone(&self.sequencer),
                submitted,
                kind,
                key.text(),
                start_nanos,
            );
            self.ctx.session.execute(statement, handler);
            submitted += 1;
        }

        // Let outstanding async work complete before exiting.
        self.gate.await_idle();
    }

    fn next_operation(&mut self, key: &PartitionKey) -> (OpKind, crate::driver::BoundStatement) {
        let u: f64 = rand::thread_rng().r#gen();
        match self.phase {
            Phase::Populate { deletes } => {
                if deletes && u < self.ctx.delete_rate {
                    (OpKind::Populate, self.runner.next_delete(key))
                } else {
                    (OpKind::Populate, self.runner.next_populate(key))
                }
            }
            Phase::Measured => {
                if u < self.ctx.read_rate {
                    (OpKind::Select, self.runner.next_read(key))
                } else if u < self.ctx.read_rate + self.ctx.delete_rate {
                    (OpKind::Delete, self.runner.next_delete(key))
                } else {
                    (OpKind::Mutation, self.runner.next_mutation(key))
                }
            }
        }
    }
}

/// Builds the completion handler for one submitted operation.
fn completion_handler(
    sequencer: Arc<CompletionSequencer>,
    sequence: u64,
    kind: OpKind,
    key_text: String,
    start_nanos: u64,
) -> CompletionHandler {
    Box::new(move |result| {
        let end_nanos = sequencer.ctx.epoch.elapsed().as_nanos() as u64;
        let outcome = match result {
            Ok(()) => OpOutcome::Success,
            Err(e) => OpOutcome::Failure { class: e.class },
        };
        sequencer.complete(
            sequence,
            CompletedOp {
                kind,
                key_text,
                start_nanos,
                end_nanos,
                outcome,
            },
        );
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::CompositeCollector;
    use crate::config::RunConfig;
    use crate::driver::mock::{MockConfig, MockSession};
    use crate::engine::{RateLimiter, TerminationCoordinator};
    use crate::metrics::MetricsBundle;
    use std::time::Instant;

    struct Recording {
        keys: Arc<Mutex<Vec<String>>>,
    }

    impl Collector for Recording {
        fn collect(&self, event: &OpEvent) {
            self.keys.lock().push(event.partition_key.to_string());
        }
    }

    fn sequencer_with_recorder() -> (Arc<CompletionSequencer>, Arc<Mutex<Vec<String>>>) {
        let keys = Arc::new(Mutex::new(Vec::new()));
        let mut collectors = CompositeCollector::new();
        collectors.push(Box::new(Recording {
            keys: Arc::clone(&keys),
        }));

        let ctx = Arc::new(StressContext {
            config: RunConfig::default(),
            session: Arc::new(MockSession::connect(MockConfig::default())),
            metrics: Arc::new(MetricsBundle::new(1)),
            collectors: Arc::new(collectors),
            rate_limiter: Arc::new(RateLimiter::new(0)),
            coordinator: Arc::new(TerminationCoordinator::new()),
            epoch: Instant::now(),
            read_rate: 0.5,
            delete_rate: 0.0,
            max_read_latency_nanos: None,
            max_write_latency_nanos: None,
        });
        let gate = Arc::new(InFlightGate::new(8));
        let sequencer = Arc::new(CompletionSequencer::new(ctx, Arc::clone(&gate), 0));
        (sequencer, keys)
    }

    fn completed(key: &str) -> CompletedOp {
        CompletedOp {
            kind: OpKind::Select,
            key_text: key.to_string(),
            start_nanos: 0,
            end_nanos: 1,
            outcome: OpOutcome::Success,
        }
    }

    #[test]
    fn test_out_of_order_completions_are_delivered_in_sequence() {
        let (sequencer, keys) = sequencer_with_recorder();
        for _ in 0..3 {
            sequencer.gate.acquire();
        }

        sequencer.complete(2, completed("k2"));
        assert!(keys.lock().is_empty(), "k2 must wait for k0 and k1");

        sequencer.complete(0, completed("k0"));
        assert_eq!(*keys.lock(), vec!["k0".to_string()]);

        sequencer.complete(1, completed("k1"));
        assert_eq!(
            *keys.lock(),
            vec!["k0".to_string(), "k1".to_string(), "k2".to_string()]
        );
        assert_eq!(sequencer.gate.in_flight(), 0);
    }

    #[test]
    fn test_in_order_completions_deliver_immediately() {
        let (sequencer, keys) = sequencer_with_recorder();
        for sequence in 0..5 {
            sequencer.gate.acquire();
            sequencer.complete(sequence, completed(&format!("k{}", sequence)));
            assert_eq!(keys.lock().len() as u64, sequence + 1);
        }
        assert_eq!(sequencer.gate.in_flight(), 0);
    }

    #[test]
    fn test_slot_release_follows_delivery() {
        let (sequencer, _keys) = sequencer_with_recorder();
        sequencer.gate.acquire();
        sequencer.gate.acquire();

        // The later completion stays buffered, so its slot stays taken.
        sequencer.complete(1, completed("k1"));
        assert_eq!(sequencer.gate.in_flight(), 2);

        sequencer.complete(0, completed("k0"));
        assert_eq!(sequencer.gate.in_flight(), 0);
    }
}
