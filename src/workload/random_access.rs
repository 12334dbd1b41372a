//! Wide-partition profile: random access to rows inside partitions.

use rand::Rng;

use crate::config::ConfigError;
use crate::driver::{BoundStatement, DriverError, PreparedId, Session, Value};
use crate::generator::{Field, FieldGenerator, FieldRegistry, GeneratorSpec, PartitionKey};

use super::{
    ParameterDescriptor, ParameterKind, ParameterValue, StatementOptions, StressRunner,
    StressWorkload,
};

const TABLE: &str = "random_access";
const DEFAULT_ROWS: i64 = 100;

/// What a read (and delete) addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AccessMode {
    Row,
    Partition,
}

struct Prepared {
    select_row: PreparedId,
    select_partition: PreparedId,
    insert: PreparedId,
    delete_row: PreparedId,
    delete_partition: PreparedId,
}

/// Wide partitions of `rows` rows each; reads and deletes address either
/// a single row or the whole partition, selected by the `access` enum
/// parameter.
pub struct RandomPartitionAccess {
    rows: i64,
    access: AccessMode,
    prepared: Option<Prepared>,
}

impl Default for RandomPartitionAccess {
    fn default() -> Self {
        Self::new()
    }
}

impl RandomPartitionAccess {
    pub fn new() -> Self {
        Self {
            rows: DEFAULT_ROWS,
            access: AccessMode::Row,
            prepared: None,
        }
    }
}

impl StressWorkload for RandomPartitionAccess {
    fn schema(&self) -> Vec<String> {
        vec![format!(
            "CREATE TABLE IF NOT EXISTS {} (partition_id text, row_id bigint, value text, \
             PRIMARY KEY (partition_id, row_id))",
            TABLE
        )]
    }

    fn default_read_rate(&self) -> f64 {
        0.5
    }

    fn field_defaults(&self) -> Vec<(Field, GeneratorSpec)> {
        vec![(
            Field::new(TABLE, "value"),
            GeneratorSpec::with_args("book", &[5, 10]),
        )]
    }

    fn parameters(&self) -> Vec<ParameterDescriptor> {
        vec![
            ParameterDescriptor {
                name: "rows",
                description: "rows per partition",
                kind: ParameterKind::I64,
            },
            ParameterDescriptor {
                name: "access",
                description: "whether reads and deletes address a row or a whole partition",
                kind: ParameterKind::Enum(&["row", "partition"]),
            },
        ]
    }

    fn set_parameter(&mut self, name: &str, value: ParameterValue) -> Result<(), ConfigError> {
        match (name, value) {
            ("rows", ParameterValue::I64(rows)) if rows > 0 => {
                self.rows = rows;
                Ok(())
            }
            ("rows", _) => Err(ConfigError::Parse {
                option: "workload.rows".to_string(),
                message: "rows must be a positive integer".to_string(),
            }),
            ("access", ParameterValue::Enum(mode)) => {
                self.access = if mode == "partition" {
                    AccessMode::Partition
                } else {
                    AccessMode::Row
                };
                Ok(())
            }
            (other, _) => Err(ConfigError::Parse {
                option: format!("workload.{}", other),
                message: "this workload has no such parameter".to_string(),
            }),
        }
    }

    fn prepare(&mut self, session: &dyn Session) -> Result<(), DriverError> {
        self.prepared = Some(Prepared {
            select_row: session.prepare(&format!(
                "SELECT * FROM {} WHERE partition_id = ? AND row_id = ?",
                TABLE
            ))?,
            select_partition: session
                .prepare(&format!("SELECT * FROM {} WHERE partition_id = ?", TABLE))?,
            insert: session.prepare(&format!(
                "INSERT INTO {} (partition_id, row_id, value) VALUES (?, ?, ?)",
                TABLE
            ))?,
            delete_row: session.prepare(&format!(
                "DELETE FROM {} WHERE partition_id = ? AND row_id = ?",
                TABLE
            ))?,
            delete_partition: session
                .prepare(&format!("DELETE FROM {} WHERE partition_id = ?", TABLE))?,
        });
        Ok(())
    }

    fn runner(
        &self,
        fields: &FieldRegistry,
        options: StatementOptions,
    ) -> Result<Box<dyn StressRunner>, ConfigError> {
        let prepared = self.prepared.as_ref().ok_or_else(|| {
            ConfigError::Invalid(
                "RandomPartitionAccess runner requested before prepare".to_string(),
            )
        })?;
        let value = fields
            .resolve(&Field::new(TABLE, "value"))
            .map_err(ConfigError::Invalid)?;
        Ok(Box::new(Runner {
            select_row: prepared.select_row,
            select_partition: prepared.select_partition,
            insert: prepared.insert,
            delete_row: prepared.delete_row,
            delete_partition: prepared.delete_partition,
            rows: self.rows,
            access: self.access,
            value,
            options,
        }))
    }
}

struct Runner {
    select_row: PreparedId,
    select_partition: PreparedId,
    insert: PreparedId,
    delete_row: PreparedId,
    delete_partition: PreparedId,
    rows: i64,
    access: AccessMode,
    value: Box<dyn FieldGenerator>,
    options: StatementOptions,
}

impl Runner {
    fn random_row(&self) -> i64 {
        rand::thread_rng().gen_range(0..self.rows)
    }
}

impl StressRunner for Runner {
    fn next_read(&mut self, key: &PartitionKey) -> BoundStatement {
        let statement = match self.access {
            AccessMode::Row => BoundStatement::new(
                self.select_row,
                vec![Value::Text(key.text()), Value::BigInt(self.random_row())],
            ),
            AccessMode::Partition => {
                BoundStatement::new(self.select_partition, vec![Value::Text(key.text())])
            }
        };
        self.options.apply(statement, true)
    }

    fn next_mutation(&mut self, key: &PartitionKey) -> BoundStatement {
        let statement = BoundStatement::new(
            self.insert,
            vec![
                Value::Text(key.text()),
                Value::BigInt(self.random_row()),
                self.value.generate(),
            ],
        );
        self.options.apply(statement, false)
    }

    fn next_delete(&mut self, key: &PartitionKey) -> BoundStatement {
        let statement = match self.access {
            AccessMode::Row => BoundStatement::new(
                self.delete_row,
                vec![Value::Text(key.text()), Value::BigInt(self.random_row())],
            ),
            AccessMode::Partition => {
                BoundStatement::new(self.delete_partition, vec![Value::Text(key.text())])
            }
        };
        self.options.apply(statement, false)
    }
}
