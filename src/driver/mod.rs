//! Database driver seam.
//!
//! The underlying client library is an external collaborator: the engine
//! only sees the `Session` trait. A session prepares statements, applies
//! DDL synchronously, and executes bound statements asynchronously,
//! invoking a completion handler exactly once on one of its own I/O
//! threads. Completion handlers must be non-blocking.
//!
//! `mock` provides an in-process implementation with a configurable
//! latency model, used by tests and by runs without a live cluster.

pub mod mock;

use serde::{Deserialize, Serialize};

/// Consistency level attached to statement bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Consistency {
    Any,
    One,
    Two,
    Three,
    Quorum,
    All,
    LocalQuorum,
    EachQuorum,
    LocalOne,
    Serial,
    LocalSerial,
}

impl std::str::FromStr for Consistency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "ANY" => Ok(Consistency::Any),
            "ONE" => Ok(Consistency::One),
            "TWO" => Ok(Consistency::Two),
            "THREE" => Ok(Consistency::Three),
            "QUORUM" => Ok(Consistency::Quorum),
            "ALL" => Ok(Consistency::All),
            "LOCAL_QUORUM" => Ok(Consistency::LocalQuorum),
            "EACH_QUORUM" => Ok(Consistency::EachQuorum),
            "LOCAL_ONE" => Ok(Consistency::LocalOne),
            "SERIAL" => Ok(Consistency::Serial),
            "LOCAL_SERIAL" => Ok(Consistency::LocalSerial),
            other => Err(format!("unknown consistency level '{}'", other)),
        }
    }
}

impl std::fmt::Display for Consistency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Consistency::Any => "ANY",
            Consistency::One => "ONE",
            Consistency::Two => "TWO",
            Consistency::Three => "THREE",
            Consistency::Quorum => "QUORUM",
            Consistency::All => "ALL",
            Consistency::LocalQuorum => "LOCAL_QUORUM",
            Consistency::EachQuorum => "EACH_QUORUM",
            Consistency::LocalOne => "LOCAL_ONE",
            Consistency::Serial => "SERIAL",
            Consistency::LocalSerial => "LOCAL_SERIAL",
        };
        write!(f, "{}", name)
    }
}

/// A value bound into a prepared statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(String),
    BigInt(i64),
    Double(f64),
    /// Milliseconds since the Unix epoch.
    Timestamp(i64),
}

/// Handle to a statement previously prepared on a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreparedId(pub usize);

/// A prepared statement with its parameters filled in for submission.
#[derive(Debug, Clone)]
pub struct BoundStatement {
    pub prepared: PreparedId,
    pub values: Vec<Value>,
    pub consistency: Consistency,
    pub serial_consistency: Consistency,
    pub page_size: Option<u32>,
    /// Walk all result pages before completing.
    pub paginate: bool,
}

impl BoundStatement {
    pub fn new(prepared: PreparedId, values: Vec<Value>) -> Self {
        Self {
            prepared,
            values,
            consistency: Consistency::LocalQuorum,
            serial_consistency: Consistency::LocalSerial,
            page_size: None,
            paginate: false,
        }
    }
}

/// An asynchronous operation failure, as classified by the driver.
#[derive(Debug, Clone)]
pub struct OpError {
    /// Driver exception family name, e.g. `WriteTimeout`.
    pub class: String,
    pub message: String,
}

impl std::fmt::Display for OpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.class, self.message)
    }
}

impl std::error::Error for OpError {}

/// Startup-path driver failures. These abort the run before any worker
/// starts.
#[derive(Debug, Clone)]
pub enum DriverError {
    Connect(String),
    Schema(String),
    Prepare(String),
}

impl std::fmt::Display for DriverError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DriverError::Connect(msg) => write!(f, "connect failed: {}", msg),
            DriverError::Schema(msg) => write!(f, "schema apply failed: {}", msg),
            DriverError::Prepare(msg) => write!(f, "prepare failed: {}", msg),
        }
    }
}

impl std::error::Error for DriverError {}

/// Invoked exactly once per submitted statement, on a driver I/O thread,
/// after the operation (including any page walk) finishes.
pub type CompletionHandler = Box<dyn FnOnce(Result<(), OpError>) + Send>;

/// A connected session against the target cluster.
///
/// Implementations must tolerate concurrent `execute` calls from all
/// worker threads. `execute` itself only hands the statement to the
/// driver's I/O pool and returns immediately.
pub trait Session: Send + Sync {
    /// Applies a DDL statement synchronously.
    fn apply_schema(&self, ddl: &str) -> Result<(), DriverError>;

    /// Prepares a statement and returns its handle.
    fn prepare(&self, cql: &str) -> Result<PreparedId, DriverError>;

    /// Submits a bound statement. The handler fires once on an I/O thread.
    fn execute(&self, statement: BoundStatement, handler: CompletionHandler);

    /// Closes the session. Outstanding handlers fire before close returns.
    fn close(&self);
}
