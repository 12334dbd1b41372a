//! Operation outcome collectors.
//!
//! A `Collector` is invoked on the async completion path for every
//! finished operation. Collectors must not block: anything expensive
//! (file I/O, rendering) belongs on a collector-internal thread.
//!
//! `CompositeCollector` fans out to an ordered list. The engine's
//! per-worker completion sequencer re-orders driver completions before
//! they get here, so each worker's events arrive in submission order.

mod progress;
mod rawlog;

pub use progress::ProgressCollector;
pub use rawlog::{RawEvent, RawLogCollector, RawLogError, read_raw_log};

use std::sync::Arc;

use crate::metrics::{MetricsBundle, OpKind};

/// Result of one completed operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpOutcome {
    Success,
    Failure {
        /// Driver exception family name.
        class: String,
    },
}

impl OpOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, OpOutcome::Success)
    }
}

/// One completed operation as seen by the collector chain.
///
/// Timestamps are nanoseconds since the run epoch.
#[derive(Debug)]
pub struct OpEvent<'a> {
    pub kind: OpKind,
    pub partition_key: &'a str,
    /// Index of the worker that submitted the operation.
    pub worker: usize,
    pub start_nanos: u64,
    pub end_nanos: u64,
    pub outcome: &'a OpOutcome,
}

impl OpEvent<'_> {
    pub fn latency_nanos(&self) -> u64 {
        self.end_nanos.saturating_sub(self.start_nanos)
    }
}

/// Sink invoked on every operation completion.
pub trait Collector: Send + Sync {
    fn collect(&self, event: &OpEvent);

    /// Called once at teardown, after all workers have joined.
    fn flush(&self) {}
}

/// Forwards each event to an ordered list of collectors.
#[derive(Default)]
pub struct CompositeCollector {
    collectors: Vec<Box<dyn Collector>>,
}

impl CompositeCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, collector: Box<dyn Collector>) {
        self.collectors.push(collector);
    }

    pub fn is_empty(&self) -> bool {
        self.collectors.is_empty()
    }
}

impl Collector for CompositeCollector {
    fn collect(&self, event: &OpEvent) {
        for collector in &self.collectors {
            collector.collect(event);
        }
    }

    fn flush(&self) {
        for collector in &self.collectors {
            collector.flush();
        }
    }
}

/// Feeds the metrics bundle: successful samples go to the kind's timer,
/// failures to the error meter only.
pub struct MetricsCollector {
    metrics: Arc<MetricsBundle>,
}

impl MetricsCollector {
    pub fn new(metrics: Arc<MetricsBundle>) -> Self {
        Self { metrics }
    }
}

impl Collector for MetricsCollector {
    fn collect(&self, event: &OpEvent) {
        match event.outcome {
            OpOutcome::Success => {
                self.metrics
                    .timer(event.kind)
                    .record(event.worker, event.latency_nanos());
            }
            OpOutcome::Failure { .. } => {
                self.metrics.errors().mark();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event<'a>(kind: OpKind, outcome: &'a OpOutcome) -> OpEvent<'a> {
        OpEvent {
            kind,
            partition_key: "key1",
            worker: 0,
            start_nanos: 1_000,
            end_nanos: 3_000,
            outcome,
        }
    }

    #[test]
    fn test_metrics_collector_records_success() {
        let metrics = Arc::new(MetricsBundle::new(1));
        let collector = MetricsCollector::new(Arc::clone(&metrics));

        collector.collect(&event(OpKind::Select, &OpOutcome::Success));

        assert_eq!(metrics.timer(OpKind::Select).count(), 1);
        assert_eq!(metrics.errors().count(), 0);
    }

    #[test]
    fn test_metrics_collector_excludes_failed_samples() {
        let metrics = Arc::new(MetricsBundle::new(1));
        let collector = MetricsCollector::new(Arc::clone(&metrics));

        let outcome = OpOutcome::Failure {
            class: "WriteTimeout".to_string(),
        };
        collector.collect(&event(OpKind::Mutation, &outcome));

        assert_eq!(metrics.timer(OpKind::Mutation).count(), 0);
        assert_eq!(metrics.errors().count(), 1);
    }

    #[test]
    fn test_composite_forwards_in_order() {
        struct Recording {
            id: usize,
            log: Arc<parking_lot::Mutex<Vec<usize>>>,
        }
        impl Collector for Recording {
            fn collect(&self, _event: &OpEvent) {
                self.log.lock().push(self.id);
            }
        }

        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut composite = CompositeCollector::new();
        composite.push(Box::new(Recording {
            id: 1,
            log: Arc::clone(&log),
        }));
        composite.push(Box::new(Recording {
            id: 2,
            log: Arc::clone(&log),
        }));

        composite.collect(&event(OpKind::Delete, &OpOutcome::Success));
        assert_eq!(*log.lock(), vec![1, 2]);
    }

    #[test]
    fn test_latency_saturates() {
        let outcome = OpOutcome::Success;
        let event = OpEvent {
            kind: OpKind::Select,
            partition_key: "k",
            worker: 0,
            start_nanos: 5_000,
            end_nanos: 4_000,
            outcome: &outcome,
        };
        assert_eq!(event.latency_nanos(), 0);
    }
}
