//! Connection and connection-provider traits.
//!
//! Defines [`Connection`], one raw database session, and
//! [`ConnectionProvider`], the pool that hands connections out and takes
//! them back. The transaction layer only ever talks to these traits.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use unitscope_core::Value;

use crate::error::ResourceError;

/// A table row: column name -> value. Inserted rows get an `id` column.
pub type Row = BTreeMap<String, Value>;

/// Column holding the backend-assigned row identifier.
pub const ID_COLUMN: &str = "id";

/// Identifier of a physical connection, unique per provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Equality filter on one column.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: String,
    pub value: Value,
}

impl Filter {
    #[must_use]
    pub fn eq(column: &str, value: impl Into<Value>) -> Self {
        Self {
            column: column.to_string(),
            value: value.into(),
        }
    }

    /// Returns `true` if `row` satisfies the filter.
    #[must_use]
    pub fn matches(&self, row: &Row) -> bool {
        row.get(&self.column) == Some(&self.value)
    }
}

/// A single statement sent over a connection.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// Insert a row; the backend assigns its `id`.
    Insert { table: String, row: Row },
    /// Select rows, optionally filtered.
    Select {
        table: String,
        filter: Option<Filter>,
    },
    /// Count rows in a table.
    Count { table: String },
    /// Delete rows matching the filter.
    Delete { table: String, filter: Filter },
}

/// Result of executing a [`Statement`].
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutput {
    Inserted { id: i64 },
    Rows(Vec<Row>),
    Count(usize),
    Deleted(usize),
}

/// One raw database session.
///
/// Outside a transaction each statement commits on its own (autocommit).
/// Between `begin` and `commit`/`rollback` writes are visible only through
/// this connection. A connection runs one statement at a time; overlapping
/// calls fail with [`ResourceError::Busy`] instead of queueing.
///
/// Used as `Arc<dyn Connection>`.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Provider-assigned identifier.
    fn id(&self) -> ConnectionId;

    /// Start a transaction.
    async fn begin(&self) -> Result<(), ResourceError>;

    /// Make every write since `begin` visible to other connections atomically.
    async fn commit(&self) -> Result<(), ResourceError>;

    /// Discard every write since `begin`.
    async fn rollback(&self) -> Result<(), ResourceError>;

    /// Run a single statement.
    async fn execute(&self, statement: Statement) -> Result<QueryOutput, ResourceError>;
}

/// Pool of raw connections.
///
/// Used as `Arc<dyn ConnectionProvider>`.
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    /// Check a connection out of the pool.
    async fn acquire(&self) -> Result<Arc<dyn Connection>, ResourceError>;

    /// Return a connection. Returning one twice is logged and ignored.
    async fn release(&self, connection: Arc<dyn Connection>);
}
