//! Time-series profile: append-heavy writes, limited reverse scans.

use chrono::Utc;

use crate::config::ConfigError;
use crate::driver::{BoundStatement, DriverError, PreparedId, Session, Value};
use crate::generator::{Field, FieldGenerator, FieldRegistry, GeneratorSpec, PartitionKey};

use super::{
    ParameterDescriptor, ParameterKind, ParameterValue, StatementOptions, StressRunner,
    StressWorkload,
};

const TABLE: &str = "sensor_data";
const DEFAULT_LIMIT: i64 = 500;

struct Prepared {
    select: PreparedId,
    insert: PreparedId,
    delete: PreparedId,
}

/// Sensor-style time series: one partition per sensor, rows clustered by
/// timestamp descending. Reads scan the newest `limit` rows; deletes drop
/// the whole partition.
pub struct BasicTimeSeries {
    limit: i64,
    prepared: Option<Prepared>,
}

impl Default for BasicTimeSeries {
    fn default() -> Self {
        Self::new()
    }
}

impl BasicTimeSeries {
    pub fn new() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            prepared: None,
        }
    }
}

impl StressWorkload for BasicTimeSeries {
    fn schema(&self) -> Vec<String> {
        vec![format!(
            "CREATE TABLE IF NOT EXISTS {} (sensor_id text, created_at timestamp, data text, \
             PRIMARY KEY (sensor_id, created_at)) \
             WITH CLUSTERING ORDER BY (created_at DESC)",
            TABLE
        )]
    }

    fn default_read_rate(&self) -> f64 {
        0.01
    }

    fn field_defaults(&self) -> Vec<(Field, GeneratorSpec)> {
        vec![(
            Field::new(TABLE, "data"),
            GeneratorSpec::with_args("random", &[100, 200]),
        )]
    }

    fn parameters(&self) -> Vec<ParameterDescriptor> {
        vec![ParameterDescriptor {
            name: "limit",
            description: "rows fetched per read (SELECT ... LIMIT)",
            kind: ParameterKind::I64,
        }]
    }

    fn set_parameter(&mut self, name: &str, value: ParameterValue) -> Result<(), ConfigError> {
        match (name, value) {
            ("limit", ParameterValue::I64(limit)) if limit > 0 => {
                self.limit = limit;
                Ok(())
            }
            ("limit", _) => Err(ConfigError::Parse {
                option: "workload.limit".to_string(),
                message: "limit must be a positive integer".to_string(),
            }),
            (other, _) => Err(ConfigError::Parse {
                option: format!("workload.{}", other),
                message: "this workload has no such parameter".to_string(),
            }),
        }
    }

    fn prepare(&mut self, session: &dyn Session) -> Result<(), DriverError> {
        self.prepared = Some(Prepared {
            select: session.prepare(&format!(
                "SELECT * FROM {} WHERE sensor_id = ? LIMIT {}",
                TABLE, self.limit
            ))?,
            insert: session.prepare(&format!(
                "INSERT INTO {} (sensor_id, created_at, data) VALUES (?, ?, ?)",
                TABLE
            ))?,
            delete: session.prepare(&format!("DELETE FROM {} WHERE sensor_id = ?", TABLE))?,
        });
        Ok(())
    }

    fn runner(
        &self,
        fields: &FieldRegistry,
        options: StatementOptions,
    ) -> Result<Box<dyn StressRunner>, ConfigError> {
        let prepared = self.prepared.as_ref().ok_or_else(|| {
            ConfigError::Invalid("BasicTimeSeries runner requested before prepare".to_string())
        })?;
        let data = fields
            .resolve(&Field::new(TABLE, "data"))
            .map_err(ConfigError::Invalid)?;
        Ok(Box::new(Runner {
            select: prepared.select,
            insert: prepared.insert,
            delete: prepared.delete,
            data,
            options,
        }))
    }
}

struct Runner {
    select: PreparedId,
    insert: PreparedId,
    delete: PreparedId,
    data: Box<dyn FieldGenerator>,
    options: StatementOptions,
}

impl StressRunner for Runner {
    fn next_read(&mut self, key: &PartitionKey) -> BoundStatement {
        let statement = BoundStatement::new(self.select, vec![Value::Text(key.text())]);
        self.options.apply(statement, true)
    }

    fn next_mutation(&mut self, key: &PartitionKey) -> BoundStatement {
        let statement = BoundStatement::new(
            self.insert,
            vec![
                Value::Text(key.text()),
                Value::Timestamp(Utc::now().timestamp_millis()),
                self.data.generate(),
            ],
        );
        self.options.apply(statement, false)
    }

    fn next_delete(&mut self, key: &PartitionKey) -> BoundStatement {
        let statement = BoundStatement::new(self.delete, vec![Value::Text(key.text())]);
        self.options.apply(statement, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::Consistency;
    use crate::driver::mock::{MockConfig, MockSession};
    use std::sync::Arc;

    fn options() -> StatementOptions {
        StatementOptions {
            consistency: Consistency::LocalQuorum,
            serial_consistency: Consistency::LocalSerial,
            page_size: None,
            paginate: false,
        }
    }

    #[test]
    fn test_limit_parameter_shapes_select() {
        let session = MockSession::connect(MockConfig::default());
        let mut workload = BasicTimeSeries::new();
        workload
            .set_parameter("limit", ParameterValue::I64(250))
            .unwrap();
        workload.prepare(&session).unwrap();

        let prepared = session.prepared_statements();
        assert!(prepared[0].contains("LIMIT 250"));
        session.close();
    }

    #[test]
    fn test_rejects_non_positive_limit() {
        let mut workload = BasicTimeSeries::new();
        assert!(
            workload
                .set_parameter("limit", ParameterValue::I64(0))
                .is_err()
        );
    }

    #[test]
    fn test_mutation_carries_timestamp() {
        let session = MockSession::connect(MockConfig::default());
        let mut workload = BasicTimeSeries::new();
        workload.prepare(&session).unwrap();

        let mut fields = FieldRegistry::new();
        for (field, spec) in workload.field_defaults() {
            fields.set_default(field, spec);
        }
        let mut runner = workload.runner(&fields, options()).unwrap();

        let key = PartitionKey::new(Arc::from("sensor"), 3);
        let write = runner.next_mutation(&key);
        assert_eq!(write.values.len(), 3);
        assert!(matches!(write.values[1], Value::Timestamp(_)));
        session.close();
    }
}
