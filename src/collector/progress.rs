//! Interval progress reporting.
//!
//! Logs throughput and latency once per interval from a dedicated ticker
//! thread, keeping the completion path down to two atomic increments.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::info;

use crate::metrics::{MetricsBundle, OpKind};

use super::{Collector, OpEvent, OpOutcome};

/// Collector that reports run progress via `tracing`.
pub struct ProgressCollector {
    completed: Arc<AtomicU64>,
    failed: Arc<AtomicU64>,
    stop: Arc<AtomicBool>,
    ticker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl ProgressCollector {
    /// Starts the ticker thread reporting every `interval`.
    pub fn start(metrics: Arc<MetricsBundle>, interval: Duration) -> Self {
        let completed = Arc::new(AtomicU64::new(0));
        let failed = Arc::new(AtomicU64::new(0));
        let stop = Arc::new(AtomicBool::new(false));

        let ticker = {
            let completed = Arc::clone(&completed);
            let failed = Arc::clone(&failed);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                let mut last_completed = 0u64;
                while !stop.load(Ordering::Relaxed) {
                    thread::sleep(interval);
                    if stop.load(Ordering::Relaxed) {
                        break;
                    }
                    let total = completed.load(Ordering::Relaxed);
                    let errors = failed.load(Ordering::Relaxed);
                    let per_interval = total - last_completed;
                    last_completed = total;

                    let reads = metrics.timer(OpKind::Select).snapshot();
                    let writes = metrics.timer(OpKind::Mutation).snapshot();
                    info!(
                        "progress: {} ops ({:.0} ops/s), errors={}, read p99={:.0}us, write p99={:.0}us",
                        total,
                        per_interval as f64 / interval.as_secs_f64(),
                        errors,
                        reads.latency.p99_us,
                        writes.latency.p99_us,
                    );
                }
            })
        };

        Self {
            completed,
            failed,
            stop,
            ticker: Mutex::new(Some(ticker)),
        }
    }
}

impl Collector for ProgressCollector {
    fn collect(&self, event: &OpEvent) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        if let OpOutcome::Failure { .. } = event.outcome {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn flush(&self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(ticker) = self.ticker.lock().take() {
            let _ = ticker.join();
        }
    }
}

impl Drop for ProgressCollector {
    fn drop(&mut self) {
        self.flush();
    }
}
