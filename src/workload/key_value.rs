//! Simple key-value profile.

use crate::config::ConfigError;
use crate::driver::{BoundStatement, DriverError, PreparedId, Session, Value};
use crate::generator::{Field, FieldGenerator, FieldRegistry, GeneratorSpec, PartitionKey};

use super::{StatementOptions, StressRunner, StressWorkload};

const TABLE: &str = "key_value";

struct Prepared {
    select: PreparedId,
    insert: PreparedId,
    delete: PreparedId,
}

/// Key-value reads, writes and deletes against a single table.
pub struct KeyValue {
    prepared: Option<Prepared>,
}

impl Default for KeyValue {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyValue {
    pub fn new() -> Self {
        Self { prepared: None }
    }
}

impl StressWorkload for KeyValue {
    fn schema(&self) -> Vec<String> {
        vec![format!(
            "CREATE TABLE IF NOT EXISTS {} (key text PRIMARY KEY, value text)",
            TABLE
        )]
    }

    fn default_read_rate(&self) -> f64 {
        0.5
    }

    fn field_defaults(&self) -> Vec<(Field, GeneratorSpec)> {
        vec![(
            Field::new(TABLE, "value"),
            GeneratorSpec::with_args("random", &[64, 128]),
        )]
    }

    fn prepare(&mut self, session: &dyn Session) -> Result<(), DriverError> {
        self.prepared = Some(Prepared {
            select: session.prepare(&format!("SELECT * FROM {} WHERE key = ?", TABLE))?,
            insert: session.prepare(&format!(
                "INSERT INTO {} (key, value) VALUES (?, ?)",
                TABLE
            ))?,
            delete: session.prepare(&format!("DELETE FROM {} WHERE key = ?", TABLE))?,
        });
        Ok(())
    }

    fn runner(
        &self,
        fields: &FieldRegistry,
        options: StatementOptions,
    ) -> Result<Box<dyn StressRunner>, ConfigError> {
        let prepared = self.prepared.as_ref().ok_or_else(|| {
            ConfigError::Invalid("KeyValue runner requested before prepare".to_string())
        })?;
        let value = fields
            .resolve(&Field::new(TABLE, "value"))
            .map_err(ConfigError::Invalid)?;
        Ok(Box::new(Runner {
            select: prepared.select,
            insert: prepared.insert,
            delete: prepared.delete,
            value,
            options,
        }))
    }
}

struct Runner {
    select: PreparedId,
    insert: PreparedId,
    delete: PreparedId,
    value: Box<dyn FieldGenerator>,
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
            vec![Value::Text(key.text()), self.value.generate()],
        );
        self.options.apply(statement, false)
    }

    fn next_delete(&mut self, key: &PartitionKey) -> BoundStatement {
        let statement = BoundStatement::new(self.delete, vec![Value::Text(key.text())]);
        self.options.apply(statement, false)
    }
}
