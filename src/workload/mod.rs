//! Workload profiles.
//!
//! A workload bundles DDL, prepared statements and an operation pattern
//! under a name. Profiles are registered in a static table; each entry
//! carries reflective metadata for its tunable parameters so that
//! `--workload.<name>=<value>` flags can be bound before any thread
//! starts.

mod key_value;
mod random_access;
mod time_series;

pub use key_value::KeyValue;
pub use random_access::RandomPartitionAccess;
pub use time_series::BasicTimeSeries;

use std::collections::BTreeMap;

use crate::config::ConfigError;
use crate::driver::{BoundStatement, Consistency, DriverError, Session};
use crate::generator::{Field, FieldRegistry, GeneratorSpec, KeyDistribution, PartitionKey};

/// Declared type of a tunable workload parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterKind {
    I64,
    F64,
    Bool,
    Str,
    Enum(&'static [&'static str]),
}

/// Reflective description of one tunable parameter.
#[derive(Debug, Clone, Copy)]
pub struct ParameterDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub kind: ParameterKind,
}

/// A parsed parameter value, matching its descriptor's kind.
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterValue {
    I64(i64),
    F64(f64),
    Bool(bool),
    Str(String),
    Enum(String),
}

impl ParameterKind {
    /// Parses a user-supplied string per the declared kind.
    pub fn parse(&self, name: &str, raw: &str) -> Result<ParameterValue, ConfigError> {
        let parse_error = |message: String| ConfigError::Parse {
            option: format!("workload.{}", name),
            message,
        };
        match self {
            ParameterKind::I64 => raw
                .parse::<i64>()
                .map(ParameterValue::I64)
                .map_err(|e| parse_error(format!("expected integer: {}", e))),
            ParameterKind::F64 => raw
                .parse::<f64>()
                .map(ParameterValue::F64)
                .map_err(|e| parse_error(format!("expected number: {}", e))),
            ParameterKind::Bool => raw
                .parse::<bool>()
                .map(ParameterValue::Bool)
                .map_err(|_| parse_error("expected true or false".to_string())),
            ParameterKind::Str => Ok(ParameterValue::Str(raw.to_string())),
            ParameterKind::Enum(variants) => {
                if variants.contains(&raw) {
                    Ok(ParameterValue::Enum(raw.to_string()))
                } else {
                    Err(parse_error(format!(
                        "expected one of: {}",
                        variants.join(", ")
                    )))
                }
            }
        }
    }
}

/// Populate policy declared by a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopulatePolicy {
    /// Populate with the same mutations as the measured phase.
    Standard,
    /// Populate a fixed number of rows.
    Custom {
        rows: u64,
        deletes_during_populate: bool,
    },
}

/// Statement options stamped onto every bound statement by a runner.
#[derive(Debug, Clone, Copy)]
pub struct StatementOptions {
    pub consistency: Consistency,
    pub serial_consistency: Consistency,
    pub page_size: Option<u32>,
    pub paginate: bool,
}

impl StatementOptions {
    /// Applies the options to a statement. Paging only affects reads.
    pub fn apply(&self, mut statement: BoundStatement, is_read: bool) -> BoundStatement {
        statement.consistency = self.consistency;
        statement.serial_consistency = self.serial_consistency;
        if is_read {
            statement.page_size = self.page_size;
            statement.paginate = self.paginate;
        }
        statement
    }
}

/// Per-thread adapter turning a partition key into a bound operation.
///
/// One runner per worker thread; runners own their field generators and
/// are never shared.
pub trait StressRunner: Send {
    fn next_read(&mut self, key: &PartitionKey) -> BoundStatement;
    fn next_mutation(&mut self, key: &PartitionKey) -> BoundStatement;
    fn next_delete(&mut self, key: &PartitionKey) -> BoundStatement;

    /// Populate-phase mutation. Defaults to the measured mutation.
    fn next_populate(&mut self, key: &PartitionKey) -> BoundStatement {
        self.next_mutation(key)
    }
}

/// A named DDL + prepared-statement + operation-pattern bundle.
pub trait StressWorkload: Send + Sync {
    /// DDL statements creating this profile's tables.
    fn schema(&self) -> Vec<String>;

    /// Suggested read fraction when the user supplies none.
    fn default_read_rate(&self) -> f64;

    fn populate_policy(&self) -> PopulatePolicy {
        PopulatePolicy::Standard
    }

    /// Dedicated populate key distribution, when the profile wants one.
    fn populate_distribution(&self) -> Option<KeyDistribution> {
        None
    }

    /// Default field generators, overridable via `--field`.
    fn field_defaults(&self) -> Vec<(Field, GeneratorSpec)> {
        Vec::new()
    }

    fn parameters(&self) -> Vec<ParameterDescriptor> {
        Vec::new()
    }

    /// Assigns a bound parameter value. `value` matches the descriptor's
    /// declared kind.
    fn set_parameter(&mut self, name: &str, value: ParameterValue) -> Result<(), ConfigError> {
        let _ = value;
        Err(ConfigError::Parse {
            option: format!("workload.{}", name),
            message: "this workload has no such parameter".to_string(),
        })
    }

    /// Prepares this profile's statements on the session.
    fn prepare(&mut self, session: &dyn Session) -> Result<(), DriverError>;

    /// Builds a per-thread runner. `prepare` must have been called.
    fn runner(
        &self,
        fields: &FieldRegistry,
        options: StatementOptions,
    ) -> Result<Box<dyn StressRunner>, ConfigError>;
}

impl std::fmt::Debug for dyn StressWorkload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("dyn StressWorkload").finish_non_exhaustive()
    }
}

/// Capability annotations captured for test-time gating. Filtering is an
/// external concern; the registry only exposes them.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkloadGates {
    pub minimum_version: Option<&'static str>,
    pub require_accord: bool,
    pub require_dse: bool,
}

/// One registry entry.
pub struct WorkloadEntry {
    pub name: &'static str,
    pub description: &'static str,
    pub type_name: &'static str,
    pub gates: WorkloadGates,
    factory: fn() -> Box<dyn StressWorkload>,
}

impl WorkloadEntry {
    pub fn instantiate(&self) -> Box<dyn StressWorkload> {
        (self.factory)()
    }
}

static REGISTRY: &[WorkloadEntry] = &[
    WorkloadEntry {
        name: "KeyValue",
        description: "simple key-value reads, writes and deletes",
        type_name: "colstress::workload::KeyValue",
        gates: WorkloadGates {
            minimum_version: None,
            require_accord: false,
            require_dse: false,
        },
        factory: || Box::new(KeyValue::new()),
    },
    WorkloadEntry {
        name: "BasicTimeSeries",
        description: "time-series appends with limited reverse scans",
        type_name: "colstress::workload::BasicTimeSeries",
        gates: WorkloadGates {
            minimum_version: None,
            require_accord: false,
            require_dse: false,
        },
        factory: || Box::new(BasicTimeSeries::new()),
    },
    WorkloadEntry {
        name: "RandomPartitionAccess",
        description: "random row or whole-partition access within wide partitions",
        type_name: "colstress::workload::RandomPartitionAccess",
        gates: WorkloadGates {
            minimum_version: Some("3.0"),
            require_accord: false,
            require_dse: false,
        },
        factory: || Box::new(RandomPartitionAccess::new()),
    },
];

/// Enumerates all registered workloads.
pub fn list() -> &'static [WorkloadEntry] {
    REGISTRY
}

/// Looks up a registry entry by name.
pub fn find(name: &str) -> Option<&'static WorkloadEntry> {
    REGISTRY.iter().find(|entry| entry.name == name)
}

/// Instantiates a workload by name.
pub fn get(name: &str) -> Result<Box<dyn StressWorkload>, ConfigError> {
    find(name)
        .map(WorkloadEntry::instantiate)
        .ok_or_else(|| {
            let known: Vec<&str> = REGISTRY.iter().map(|e| e.name).collect();
            ConfigError::Invalid(format!(
                "unknown workload '{}' (available: {})",
                name,
                known.join(", ")
            ))
        })
}

/// Binds user-supplied parameter strings onto a workload instance.
///
/// Unknown names and unparseable values fail here, before the engine
/// starts.
pub fn bind_parameters(
    workload: &mut dyn StressWorkload,
    parameters: &BTreeMap<String, String>,
) -> Result<(), ConfigError> {
    let descriptors = workload.parameters();
    for (name, raw) in parameters {
        let descriptor = descriptors
            .iter()
            .find(|d| d.name == name)
            .ok_or_else(|| ConfigError::Parse {
                option: format!("workload.{}", name),
                message: format!(
                    "unknown parameter (available: {})",
                    descriptors
                        .iter()
                        .map(|d| d.name)
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            })?;
        let value = descriptor.kind.parse(name, raw)?;
        workload.set_parameter(name, value)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lists_all_profiles() {
        let names: Vec<&str> = list().iter().map(|e| e.name).collect();
        assert_eq!(
            names,
            vec!["KeyValue", "BasicTimeSeries", "RandomPartitionAccess"]
        );
    }

    #[test]
    fn test_get_unknown_workload() {
        let err = get("NoSuchProfile").unwrap_err();
        assert!(err.to_string().contains("NoSuchProfile"));
    }

    #[test]
    fn test_parameter_kind_parsing() {
        assert_eq!(
            ParameterKind::I64.parse("p", "42").unwrap(),
            ParameterValue::I64(42)
        );
        assert_eq!(
            ParameterKind::F64.parse("p", "0.5").unwrap(),
            ParameterValue::F64(0.5)
        );
        assert_eq!(
            ParameterKind::Bool.parse("p", "true").unwrap(),
            ParameterValue::Bool(true)
        );
        assert_eq!(
            ParameterKind::Str.parse("p", "abc").unwrap(),
            ParameterValue::Str("abc".to_string())
        );
        assert_eq!(
            ParameterKind::Enum(&["row", "partition"])
                .parse("p", "row")
                .unwrap(),
            ParameterValue::Enum("row".to_string())
        );

        assert!(ParameterKind::I64.parse("p", "4.2").is_err());
        assert!(ParameterKind::Bool.parse("p", "yes").is_err());
        assert!(
            ParameterKind::Enum(&["row", "partition"])
                .parse("p", "table")
                .is_err()
        );
    }

    #[test]
    fn test_bind_rejects_unknown_parameter() {
        let mut workload = get("BasicTimeSeries").unwrap();
        let mut parameters = BTreeMap::new();
        parameters.insert("nonsense".to_string(), "1".to_string());
        let err = bind_parameters(workload.as_mut(), &parameters).unwrap_err();
        assert!(err.to_string().contains("nonsense"));
    }

    #[test]
    fn test_bind_assigns_known_parameter() {
        let mut workload = get("BasicTimeSeries").unwrap();
        let mut parameters = BTreeMap::new();
        parameters.insert("limit".to_string(), "250".to_string());
        bind_parameters(workload.as_mut(), &parameters).unwrap();
    }

    #[test]
    fn test_gates_are_exposed() {
        let entry = find("RandomPartitionAccess").unwrap();
        assert_eq!(entry.gates.minimum_version, Some("3.0"));
        assert!(!entry.gates.require_accord);
    }
}
