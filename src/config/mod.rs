//! Run configuration for the stress engine.
//!
//! `RunConfig` is the fully resolved set of options handed to the engine.
//! It is built either from CLI flags or from a JSON object received by the
//! control server, and it serializes back to JSON unchanged so `status`
//! can echo the active configuration.

mod compaction;
mod duration;

pub use compaction::{CompactionOption, CompactionParseError};
pub use duration::{DurationParseError, parse_duration};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::driver::Consistency;
use crate::generator::KeyDistribution;

/// Error type for configuration failures.
///
/// All configuration errors are reported before any worker thread starts.
#[derive(Debug, Clone)]
pub enum ConfigError {
    /// A single option failed to parse.
    Parse { option: String, message: String },
    /// Options are individually valid but mutually inconsistent.
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Parse { option, message } => {
                write!(f, "Invalid value for '{}': {}", option, message)
            }
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Populate policy for the pre-measurement phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PopulateOption {
    /// Use the workload's own populate policy.
    Standard,
    /// Skip the populate phase entirely.
    None,
    /// Populate a fixed number of rows.
    Custom { rows: u64, deletes: bool },
}

impl PopulateOption {
    /// Parses `standard`, `none`, or `<rows>[,<deletes>]` where rows
    /// takes `k`/`m`/`b` suffixes and deletes is `true`/`false`
    /// (default true). E.g. `--populate 500k,false`.
    pub fn parse(input: &str) -> Result<Self, ConfigError> {
        let parse_error = |message: String| ConfigError::Parse {
            option: "populate".to_string(),
            message,
        };
        match input.trim() {
            "standard" => Ok(PopulateOption::Standard),
            "none" => Ok(PopulateOption::None),
            other => {
                let (rows_text, deletes) = match other.split_once(',') {
                    Some((rows, flag)) => {
                        let deletes = match flag.trim() {
                            "true" | "deletes" => true,
                            "false" => false,
                            unknown => {
                                return Err(parse_error(format!(
                                    "expected true or false after ',', got '{}'",
                                    unknown
                                )));
                            }
                        };
                        (rows, deletes)
                    }
                    None => (other, true),
                };
                let rows = parse_count(rows_text.trim()).map_err(parse_error)?;
                Ok(PopulateOption::Custom { rows, deletes })
            }
        }
    }
}

/// Parses an integer with optional `k`/`m`/`b` multiplier suffix.
///
/// Used for `--iterations` and `--populate` row counts.
pub fn parse_count(input: &str) -> Result<u64, String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err("empty value".to_string());
    }

    let (digits, multiplier) = match trimmed.chars().last() {
        Some('k') | Some('K') => (&trimmed[..trimmed.len() - 1], 1_000),
        Some('m') | Some('M') => (&trimmed[..trimmed.len() - 1], 1_000_000),
        Some('b') | Some('B') => (&trimmed[..trimmed.len() - 1], 1_000_000_000),
        _ => (trimmed, 1),
    };

    digits
        .parse::<u64>()
        .map_err(|e| format!("invalid number '{}': {}", trimmed, e))?
        .checked_mul(multiplier)
        .ok_or_else(|| format!("value '{}' overflows", trimmed))
}

fn default_threads() -> usize {
    4
}

fn default_queue_depth() -> usize {
    128
}

fn default_partition_count() -> u64 {
    1_000_000
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_cql_port() -> u16 {
    9042
}

/// Fully resolved run parameters handed to the engine.
///
/// Exactly one of `iterations` / `duration_secs` is authoritative; when
/// neither is supplied, `DEFAULT_ITERATIONS` applies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Name selecting the workload profile.
    pub workload: String,
    /// Terminal bound by operation count.
    pub iterations: Option<u64>,
    /// Terminal bound by wall-clock seconds.
    pub duration_secs: Option<u64>,
    /// Global ops/second token-bucket capacity. 0 disables the limiter.
    pub rate: u64,
    /// Number of worker threads.
    #[serde(default = "default_threads")]
    pub threads: usize,
    /// Maximum key id (key space size).
    #[serde(default = "default_partition_count")]
    pub partition_count: u64,
    /// Partition key distribution.
    pub partition_key_generator: KeyDistribution,
    /// Fraction of reads in [0,1]. Absent means the workload default.
    pub read_rate: Option<f64>,
    /// Fraction of deletes in [0,1].
    pub delete_rate: f64,
    /// Per-thread in-flight cap.
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
    /// Populate policy.
    pub populate: PopulateOption,
    pub consistency_level: Consistency,
    pub serial_consistency_level: Consistency,
    /// Read latency SLO in milliseconds. Exceeding it terminates the run.
    pub max_read_latency_ms: Option<f64>,
    /// Write latency SLO in milliseconds. Exceeding it terminates the run.
    pub max_write_latency_ms: Option<f64>,
    /// Page size for reads.
    pub paging: Option<u32>,
    /// Walk every result page of a read before completing it.
    pub paginate: bool,
    /// Pin all requests to one endpoint.
    pub coordinator_only_mode: bool,
    /// DDL-only: row TTL in seconds.
    pub ttl: Option<u64>,
    /// DDL-only: compaction shortcut or raw map literal.
    pub compaction: Option<String>,
    /// DDL-only: compression map literal.
    pub compression: Option<String>,
    /// DDL-only: replication map literal.
    pub replication: Option<String>,
    /// Field generator overrides: `<table>.<column>` -> `<fn>(args)`.
    pub fields: BTreeMap<String, String>,
    /// Dynamic workload parameters: name -> unparsed value.
    pub workload_parameters: BTreeMap<String, String>,
    /// Contact point.
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_cql_port")]
    pub cql_port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Raw event log target: a file path or a directory.
    pub raw_log: Option<String>,
    /// Prometheus exporter port. 0 disables.
    pub prometheus_port: u16,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            workload: String::new(),
            iterations: None,
            duration_secs: None,
            rate: 0,
            threads: default_threads(),
            partition_count: default_partition_count(),
            partition_key_generator: KeyDistribution::Random,
            read_rate: None,
            delete_rate: 0.0,
            queue_depth: default_queue_depth(),
            populate: PopulateOption::Standard,
            consistency_level: Consistency::LocalQuorum,
            serial_consistency_level: Consistency::LocalSerial,
            max_read_latency_ms: None,
            max_write_latency_ms: None,
            paging: None,
            paginate: false,
            coordinator_only_mode: false,
            ttl: None,
            compaction: None,
            compression: None,
            replication: None,
            fields: BTreeMap::new(),
            workload_parameters: BTreeMap::new(),
            host: default_host(),
            cql_port: default_cql_port(),
            username: None,
            password: None,
            raw_log: None,
            prometheus_port: 0,
        }
    }
}

impl RunConfig {
    /// Default operation count when neither `iterations` nor a duration is
    /// supplied.
    pub const DEFAULT_ITERATIONS: u64 = 1_000_000;

    /// Checks cross-option consistency. Called before the engine starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workload.is_empty() {
            return Err(ConfigError::Invalid("no workload selected".to_string()));
        }
        if self.iterations.is_some() && self.duration_secs.is_some() {
            return Err(ConfigError::Invalid(
                "iterations and duration are mutually exclusive".to_string(),
            ));
        }
        if self.threads == 0 {
            return Err(ConfigError::Invalid("threads must be at least 1".to_string()));
        }
        if self.queue_depth == 0 {
            return Err(ConfigError::Invalid(
                "queue depth must be at least 1".to_string(),
            ));
        }
        if self.partition_count == 0 {
            return Err(ConfigError::Invalid(
                "partition count must be at least 1".to_string(),
            ));
        }

        let read = self.read_rate.unwrap_or(0.0);
        if let Some(rate) = self.read_rate
            && !(0.0..=1.0).contains(&rate)
        {
            return Err(ConfigError::Invalid(format!(
                "read rate {} is outside [0, 1]",
                rate
            )));
        }
        if !(0.0..=1.0).contains(&self.delete_rate) {
            return Err(ConfigError::Invalid(format!(
                "delete rate {} is outside [0, 1]",
                self.delete_rate
            )));
        }
        if read + self.delete_rate > 1.0 {
            return Err(ConfigError::Invalid(format!(
                "read rate {} + delete rate {} exceeds 1",
                read, self.delete_rate
            )));
        }

        if let Some(ref compaction) = self.compaction {
            CompactionOption::parse(compaction).map_err(|e| ConfigError::Parse {
                option: "compaction".to_string(),
                message: e.message,
            })?;
        }

        Ok(())
    }

    /// Terminal operation count for a count-bounded run.
    pub fn effective_iterations(&self) -> Option<u64> {
        match (self.iterations, self.duration_secs) {
            (Some(n), _) => Some(n),
            (None, Some(_)) => None,
            (None, None) => Some(Self::DEFAULT_ITERATIONS),
        }
    }
}
