//! In-process mock driver.
//!
//! Simulates a cluster client: submitted statements are handed to a small
//! pool of I/O threads which sleep through a configurable latency model
//! and then invoke the completion handler. Used by tests and by runs
//! without a live cluster.

use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;
use rand::Rng;

use super::{BoundStatement, CompletionHandler, DriverError, OpError, PreparedId, Session};

/// Number of result pages a paginated read walks through.
const SIMULATED_PAGES: u32 = 3;

/// Latency model for simulated operations: `base + U[0, jitter]`.
#[derive(Debug, Clone, Copy)]
pub struct LatencyModel {
    pub base: Duration,
    pub jitter: Duration,
}

impl LatencyModel {
    fn sample(&self) -> Duration {
        if self.jitter.is_zero() {
            return self.base;
        }
        let extra = rand::thread_rng().gen_range(0..=self.jitter.as_nanos() as u64);
        self.base + Duration::from_nanos(extra)
    }
}

/// Mock driver configuration.
#[derive(Debug, Clone)]
pub struct MockConfig {
    pub latency: LatencyModel,
    /// Fraction of operations that fail, in [0, 1].
    pub failure_rate: f64,
    pub io_threads: usize,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            latency: LatencyModel {
                base: Duration::from_micros(200),
                jitter: Duration::from_micros(300),
            },
            failure_rate: 0.0,
            io_threads: 4,
        }
    }
}

struct Job {
    statement: BoundStatement,
    handler: CompletionHandler,
}

/// Mock session backed by an I/O thread pool.
pub struct MockSession {
    sender: Mutex<Option<Sender<Job>>>,
    io_handles: Mutex<Vec<thread::JoinHandle<()>>>,
    prepared: Mutex<Vec<String>>,
    schema: Mutex<Vec<String>>,
}

impl MockSession {
    /// Builds a connected mock session.
    pub fn connect(config: MockConfig) -> Self {
        let (sender, receiver) = unbounded::<Job>();

        let mut io_handles = Vec::with_capacity(config.io_threads.max(1));
        for _ in 0..config.io_threads.max(1) {
            let receiver: Receiver<Job> = receiver.clone();
            let config = config.clone();
            io_handles.push(thread::spawn(move || io_loop(receiver, config)));
        }

        Self {
            sender: Mutex::new(Some(sender)),
            io_handles: Mutex::new(io_handles),
            prepared: Mutex::new(Vec::new()),
            schema: Mutex::new(Vec::new()),
        }
    }

    /// DDL statements applied so far.
    pub fn applied_schema(&self) -> Vec<String> {
        self.schema.lock().clone()
    }

    /// CQL text of all prepared statements.
    pub fn prepared_statements(&self) -> Vec<String> {
        self.prepared.lock().clone()
    }
}

fn io_loop(receiver: Receiver<Job>, config: MockConfig) {
    for job in receiver.iter() {
        let mut latency = config.latency.sample();
        if job.statement.paginate {
            latency *= SIMULATED_PAGES;
        }
        if !latency.is_zero() {
            thread::sleep(latency);
        }

        let outcome = if config.failure_rate > 0.0
            && rand::thread_rng().gen_bool(config.failure_rate.clamp(0.0, 1.0))
        {
            Err(OpError {
                class: "SimulatedFailure".to_string(),
                message: "injected by mock driver".to_string(),
            })
        } else {
            Ok(())
        };

        (job.handler)(outcome);
    }
}

impl Session for MockSession {
    fn apply_schema(&self, ddl: &str) -> Result<(), DriverError> {
        self.schema.lock().push(ddl.to_string());
        Ok(())
    }

    fn prepare(&self, cql: &str) -> Result<PreparedId, DriverError> {
        let mut prepared = self.prepared.lock();
        prepared.push(cql.to_string());
        Ok(PreparedId(prepared.len() - 1))
    }

    fn execute(&self, statement: BoundStatement, handler: CompletionHandler) {
        let sender = self.sender.lock();
        match sender.as_ref() {
            Some(sender) => {
                // The channel is unbounded; back-pressure comes from the
                // engine's in-flight gate, so this never blocks.
                let _ = sender.send(Job { statement, handler });
            }
            None => handler(Err(OpError {
                class: "SessionClosed".to_string(),
                message: "execute after close".to_string(),
            })),
        }
    }

    fn close(&self) {
        self.sender.lock().take();
        let handles: Vec<_> = self.io_handles.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Instant;

    fn fast_config() -> MockConfig {
        MockConfig {
            latency: LatencyModel {
                base: Duration::from_micros(10),
                jitter: Duration::ZERO,
            },
            failure_rate: 0.0,
            io_threads: 2,
        }
    }

    fn statement(session: &MockSession) -> BoundStatement {
        let id = session.prepare("SELECT * FROM t WHERE key = ?").unwrap();
        BoundStatement::new(id, Vec::new())
    }

    #[test]
    fn test_completion_fires_once_per_submission() {
        let session = MockSession::connect(fast_config());
        let stmt = statement(&session);
        let completions = Arc::new(AtomicU64::new(0));

        for _ in 0..100 {
            let completions = Arc::clone(&completions);
            session.execute(stmt.clone(), Box::new(move |_| {
                completions.fetch_add(1, Ordering::SeqCst);
            }));
        }

        session.close();
        assert_eq!(completions.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn test_failure_rate_injects_errors() {
        let mut config = fast_config();
        config.failure_rate = 1.0;
        let session = MockSession::connect(config);
        let stmt = statement(&session);

        let failures = Arc::new(AtomicU64::new(0));
        let failures_in_handler = Arc::clone(&failures);
        session.execute(stmt, Box::new(move |outcome| {
            if outcome.is_err() {
                failures_in_handler.fetch_add(1, Ordering::SeqCst);
            }
        }));

        session.close();
        assert_eq!(failures.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_paginated_read_takes_longer() {
        let mut config = fast_config();
        config.latency.base = Duration::from_millis(2);
        let session = MockSession::connect(config);

        let mut paged = statement(&session);
        paged.paginate = true;

        let start = Instant::now();
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        session.execute(paged, Box::new(move |_| {
            let _ = done_tx.send(());
        }));
        done_rx.recv().unwrap();
        assert!(start.elapsed() >= Duration::from_millis(2) * SIMULATED_PAGES);

        session.close();
    }

    #[test]
    fn test_schema_and_prepare_are_recorded() {
        let session = MockSession::connect(fast_config());
        session.apply_schema("CREATE TABLE t (k text PRIMARY KEY)").unwrap();
        let id = session.prepare("INSERT INTO t (k) VALUES (?)").unwrap();

        assert_eq!(session.applied_schema().len(), 1);
        assert_eq!(session.prepared_statements()[id.0], "INSERT INTO t (k) VALUES (?)");
        session.close();
    }
}
