//! Single-run stress test management.
//!
//! Enforces one active run per process via compare-and-set on an atomic
//! running flag. Runs execute on a background thread; the manager keeps
//! the coordinator handle for `stop` and the metrics handle for `status`,
//! and retains terminal-state metadata until the next `run`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::config::RunConfig;
use crate::driver::{DriverError, Session};
use crate::engine::{
    EngineOptions, FinalStatus, StopReason, TerminationCoordinator, prepare_run,
};
use crate::metrics::{MetricsBundle, MetricsSnapshot};

/// Builds a session for a run request.
pub type SessionFactory =
    Arc<dyn Fn(&RunConfig) -> Result<Arc<dyn Session>, DriverError> + Send + Sync>;

/// Error type for control commands.
#[derive(Debug)]
pub enum ManagerError {
    /// A run is already active.
    AlreadyRunning,
    /// `stop` with nothing to stop.
    NotRunning,
    /// The run could not be started.
    Start(String),
}

impl std::fmt::Display for ManagerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ManagerError::AlreadyRunning => write!(f, "a stress run is already in progress"),
            ManagerError::NotRunning => write!(f, "no stress run is in progress"),
            ManagerError::Start(msg) => write!(f, "failed to start run: {}", msg),
        }
    }
}

impl std::error::Error for ManagerError {}

#[derive(Debug, Clone, PartialEq, Eq)]
enum RunStatus {
    Idle,
    Running,
    Completed,
    Stopped,
    Failed(String),
}

impl RunStatus {
    fn label(&self) -> String {
        match self {
            RunStatus::Idle => "idle".to_string(),
            RunStatus::Running => "running".to_string(),
            RunStatus::Completed => "completed".to_string(),
            RunStatus::Stopped => "stopped".to_string(),
            RunStatus::Failed(msg) => format!("failed: {}", msg),
        }
    }
}

struct ManagerState {
    status: RunStatus,
    job_id: Option<String>,
    config: Option<RunConfig>,
    last_run_time: Option<DateTime<Utc>>,
    coordinator: Option<Arc<TerminationCoordinator>>,
    metrics: Option<Arc<MetricsBundle>>,
}

struct Shared {
    running: AtomicBool,
    job_counter: AtomicU64,
    state: Mutex<ManagerState>,
}

/// What `status` reports.
#[derive(Debug)]
pub enum StatusReport {
    Running {
        job_id: String,
        config: RunConfig,
        metrics: MetricsSnapshot,
    },
    Idle {
        status: String,
        last_run_time: Option<DateTime<Utc>>,
    },
}

/// Manages at most one concurrent stress run.
pub struct StressTestManager {
    shared: Arc<Shared>,
    session_factory: SessionFactory,
    engine_options: EngineOptions,
}

impl StressTestManager {
    pub fn new(session_factory: SessionFactory, engine_options: EngineOptions) -> Self {
        Self {
            shared: Arc::new(Shared {
                running: AtomicBool::new(false),
                job_counter: AtomicU64::new(0),
                state: Mutex::new(ManagerState {
                    status: RunStatus::Idle,
                    job_id: None,
                    config: None,
                    last_run_time: None,
                    coordinator: None,
                    metrics: None,
                }),
            }),
            session_factory,
            engine_options,
        }
    }

    /// Acquires the running lock and spawns background execution.
    /// Returns the zero-padded job id.
    pub fn start_run(&self, config: RunConfig) -> Result<String, ManagerError> {
        if self
            .shared
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ManagerError::AlreadyRunning);
        }

        let prepared = (self.session_factory)(&config)
            .map_err(|e| ManagerError::Start(e.to_string()))
            .and_then(|session| {
                prepare_run(config.clone(), session, self.engine_options.clone())
                    .map_err(|e| ManagerError::Start(e.to_string()))
            });

        let run = match prepared {
            Ok(run) => run,
            Err(e) => {
                self.shared.running.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        let job_id = format!("{:03}", self.shared.job_counter.fetch_add(1, Ordering::SeqCst) + 1);
        {
            let mut state = self.shared.state.lock();
            state.status = RunStatus::Running;
            state.job_id = Some(job_id.clone());
            state.config = Some(config);
            state.coordinator = Some(run.coordinator());
            state.metrics = Some(run.metrics());
        }

        let shared = Arc::clone(&self.shared);
        thread::spawn(move || {
            let status = match run.execute() {
                Ok(outcome) => match outcome.status {
                    FinalStatus::Completed => RunStatus::Completed,
                    FinalStatus::Stopped => RunStatus::Stopped,
                    FinalStatus::Failed(msg) => RunStatus::Failed(msg),
                },
                Err(e) => RunStatus::Failed(e.to_string()),
            };
            let mut state = shared.state.lock();
            state.status = status;
            state.last_run_time = Some(Utc::now());
            state.coordinator = None;
            state.metrics = None;
            shared.running.store(false, Ordering::SeqCst);
        });

        Ok(job_id)
    }

    /// Signals the active run to terminate.
    pub fn stop(&self) -> Result<(), ManagerError> {
        let state = self.shared.state.lock();
        match &state.coordinator {
            Some(coordinator) => {
                coordinator.signal(StopReason::ExternalStop);
                Ok(())
            }
            None => Err(ManagerError::NotRunning),
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Live configuration echo + metrics when running, otherwise the last
    /// terminal status.
    pub fn status(&self) -> StatusReport {
        let state = self.shared.state.lock();
        if let (RunStatus::Running, Some(job_id), Some(config), Some(metrics)) = (
            &state.status,
            &state.job_id,
            &state.config,
            &state.metrics,
        ) {
            return StatusReport::Running {
                job_id: job_id.clone(),
                config: config.clone(),
                metrics: metrics.snapshot(),
            };
        }
        StatusReport::Idle {
            status: state.status.label(),
            last_run_time: state.last_run_time,
        }
    }

    /// Blocks until the active run (if any) finishes. Test helper.
    pub fn wait_idle(&self) {
        while self.is_running() {
            thread::sleep(std::time::Duration::from_millis(10));
        }
    }
}
