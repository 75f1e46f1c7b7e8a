//! In-memory transactional backend.
//!
//! [`MemoryDatabase`] holds committed tables, [`MemoryConnection`] is one
//! session over it, and [`MemoryPool`] is a semaphore-bounded
//! [`ConnectionProvider`]. Used by tests and by embedders that need real
//! commit/rollback semantics without an external database.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};
use unitscope_core::Value;

use crate::config::PoolConfig;
use crate::error::ResourceError;
use crate::storage::connection::{
    Connection, ConnectionId, ConnectionProvider, Filter, QueryOutput, Row, Statement, ID_COLUMN,
};

// ---------------------------------------------------------------------------
// MemoryDatabase
// ---------------------------------------------------------------------------

/// Committed table state shared by every connection of a pool.
#[derive(Debug, Default)]
pub struct MemoryDatabase {
    tables: RwLock<HashMap<String, Vec<Row>>>,
    next_row_id: AtomicI64,
}

/// A buffered write inside an open transaction.
#[derive(Debug, Clone)]
enum Write {
    Insert { table: String, row: Row },
    Delete { table: String, filter: Filter },
}

impl Write {
    fn table(&self) -> &str {
        match self {
            Write::Insert { table, .. } | Write::Delete { table, .. } => table,
        }
    }

    /// Applies the write to a row set, returning the number of affected rows.
    fn apply_to(&self, rows: &mut Vec<Row>) -> usize {
        match self {
            Write::Insert { row, .. } => {
                rows.push(row.clone());
                1
            }
            Write::Delete { filter, .. } => {
                let before = rows.len();
                rows.retain(|row| !filter.matches(row));
                before - rows.len()
            }
        }
    }
}

impl MemoryDatabase {
    /// Creates an empty database.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed rows in `table`.
    #[must_use]
    pub fn count(&self, table: &str) -> usize {
        self.tables.read().get(table).map_or(0, Vec::len)
    }

    /// Snapshot of committed rows in `table`.
    #[must_use]
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.tables.read().get(table).cloned().unwrap_or_default()
    }

    fn next_id(&self) -> i64 {
        self.next_row_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Applies writes atomically with respect to readers.
    fn apply(&self, writes: &[Write]) -> usize {
        let mut tables = self.tables.write();
        writes
            .iter()
            .map(|w| w.apply_to(tables.entry(w.table().to_string()).or_default()))
            .sum()
    }
}

// ---------------------------------------------------------------------------
// MemoryConnection
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct SessionState {
    in_transaction: bool,
    pending: Vec<Write>,
}

/// Clears the busy flag when a statement finishes or its future is dropped.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// One session over a [`MemoryDatabase`].
#[derive(Debug)]
pub struct MemoryConnection {
    id: ConnectionId,
    db: Arc<MemoryDatabase>,
    latency: Duration,
    state: Mutex<SessionState>,
    busy: AtomicBool,
    released: AtomicBool,
}

impl MemoryConnection {
    fn new(id: ConnectionId, db: Arc<MemoryDatabase>, latency: Duration) -> Self {
        Self {
            id,
            db,
            latency,
            state: Mutex::new(SessionState::default()),
            busy: AtomicBool::new(false),
            released: AtomicBool::new(false),
        }
    }

    /// Returns `true` if the connection was handed back to its pool.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Marks the connection released and drops uncommitted work.
    /// Returns `false` if it was already released.
    fn mark_released(&self) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            return false;
        }
        let mut state = self.state.lock();
        state.in_transaction = false;
        state.pending.clear();
        true
    }

    fn ensure_live(&self) -> Result<(), ResourceError> {
        if self.is_released() {
            Err(ResourceError::Released {
                connection: self.id,
            })
        } else {
            Ok(())
        }
    }

    fn claim(&self) -> Result<BusyGuard<'_>, ResourceError> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| BusyGuard(&self.busy))
            .map_err(|_| ResourceError::Busy {
                connection: self.id,
            })
    }

    async fn round_trip(&self) {
        if self.latency.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.latency).await;
        }
    }

    /// Rows of `table` as seen by this session: committed rows plus its own
    /// pending writes.
    fn visible_rows(&self, state: &SessionState, table: &str) -> Vec<Row> {
        let mut rows = self.db.rows(table);
        if state.in_transaction {
            for write in state.pending.iter().filter(|w| w.table() == table) {
                write.apply_to(&mut rows);
            }
        }
        rows
    }

    fn run(&self, statement: Statement) -> QueryOutput {
        let mut state = self.state.lock();
        match statement {
            Statement::Insert { table, mut row } => {
                let id = self.db.next_id();
                row.insert(ID_COLUMN.to_string(), Value::Int(id));
                let write = Write::Insert { table, row };
                if state.in_transaction {
                    state.pending.push(write);
                } else {
                    self.db.apply(&[write]);
                }
                QueryOutput::Inserted { id }
            }
            Statement::Select { table, filter } => {
                let rows = self
                    .visible_rows(&state, &table)
                    .into_iter()
                    .filter(|row| filter.as_ref().map_or(true, |f| f.matches(row)))
                    .collect();
                QueryOutput::Rows(rows)
            }
            Statement::Count { table } => QueryOutput::Count(self.visible_rows(&state, &table).len()),
            Statement::Delete { table, filter } => {
                let write = Write::Delete { table, filter };
                if state.in_transaction {
                    let mut rows = self.visible_rows(&state, write.table());
                    let affected = write.apply_to(&mut rows);
                    state.pending.push(write);
                    QueryOutput::Deleted(affected)
                } else {
                    QueryOutput::Deleted(self.db.apply(&[write]))
                }
            }
        }
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    async fn begin(&self) -> Result<(), ResourceError> {
        self.ensure_live()?;
        let _busy = self.claim()?;
        self.round_trip().await;
        self.ensure_live()?;
        let mut state = self.state.lock();
        if state.in_transaction {
            return Err(ResourceError::Driver(
                "transaction already in progress".to_string(),
            ));
        }
        state.in_transaction = true;
        Ok(())
    }

    async fn commit(&self) -> Result<(), ResourceError> {
        self.ensure_live()?;
        let _busy = self.claim()?;
        self.round_trip().await;
        self.ensure_live()?;
        let mut state = self.state.lock();
        if !state.in_transaction {
            return Err(ResourceError::Driver("no transaction in progress".to_string()));
        }
        let pending = std::mem::take(&mut state.pending);
        state.in_transaction = false;
        self.db.apply(&pending);
        Ok(())
    }

    async fn rollback(&self) -> Result<(), ResourceError> {
        self.ensure_live()?;
        let _busy = self.claim()?;
        self.round_trip().await;
        let mut state = self.state.lock();
        state.pending.clear();
        state.in_transaction = false;
        Ok(())
    }

    async fn execute(&self, statement: Statement) -> Result<QueryOutput, ResourceError> {
        self.ensure_live()?;
        let _busy = self.claim()?;
        self.round_trip().await;
        // The pool may have taken the connection back while we were suspended.
        self.ensure_live()?;
        Ok(self.run(statement))
    }
}

// ---------------------------------------------------------------------------
// MemoryPool
// ---------------------------------------------------------------------------

/// Semaphore-bounded pool of [`MemoryConnection`]s over one database.
///
/// Every `acquire` opens a fresh session; `release` retires it and frees its
/// permit. A released connection rejects further statements.
pub struct MemoryPool {
    db: Arc<MemoryDatabase>,
    semaphore: Arc<Semaphore>,
    checked_out: DashMap<ConnectionId, (Arc<MemoryConnection>, OwnedSemaphorePermit)>,
    next_id: AtomicU64,
    acquired: AtomicU64,
    released: AtomicU64,
    acquire_timeout: Duration,
    statement_latency: Duration,
}

impl MemoryPool {
    /// Creates a pool over `db` sized by `config`.
    #[must_use]
    pub fn new(db: Arc<MemoryDatabase>, config: &PoolConfig) -> Self {
        Self {
            db,
            semaphore: Arc::new(Semaphore::new(config.max_connections as usize)),
            checked_out: DashMap::new(),
            next_id: AtomicU64::new(1),
            acquired: AtomicU64::new(0),
            released: AtomicU64::new(0),
            acquire_timeout: Duration::from_millis(config.acquire_timeout_ms),
            statement_latency: Duration::from_millis(config.statement_latency_ms),
        }
    }

    /// The database this pool serves.
    #[must_use]
    pub fn database(&self) -> Arc<MemoryDatabase> {
        Arc::clone(&self.db)
    }

    /// Number of connections currently checked out.
    #[must_use]
    pub fn checked_out(&self) -> usize {
        self.checked_out.len()
    }

    /// Total successful acquisitions since creation.
    #[must_use]
    pub fn acquired_total(&self) -> u64 {
        self.acquired.load(Ordering::Relaxed)
    }

    /// Total releases since creation.
    #[must_use]
    pub fn released_total(&self) -> u64 {
        self.released.load(Ordering::Relaxed)
    }

    /// Stops handing out connections. Pending and future `acquire` calls fail.
    pub fn close(&self) {
        self.semaphore.close();
    }
}

#[async_trait]
impl ConnectionProvider for MemoryPool {
    async fn acquire(&self) -> Result<Arc<dyn Connection>, ResourceError> {
        let permit = match tokio::time::timeout(
            self.acquire_timeout,
            Arc::clone(&self.semaphore).acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_closed)) => return Err(ResourceError::PoolClosed),
            Err(_elapsed) => {
                #[allow(clippy::cast_possible_truncation)]
                let timeout_ms = self.acquire_timeout.as_millis() as u64;
                return Err(ResourceError::PoolTimeout { timeout_ms });
            }
        };

        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let connection = Arc::new(MemoryConnection::new(
            id,
            Arc::clone(&self.db),
            self.statement_latency,
        ));
        self.checked_out
            .insert(id, (Arc::clone(&connection), permit));
        self.acquired.fetch_add(1, Ordering::Relaxed);
        debug!(connection = %id, "connection acquired");
        Ok(connection)
    }

    async fn release(&self, connection: Arc<dyn Connection>) {
        let id = connection.id();
        let Some((_, (session, permit))) = self.checked_out.remove(&id) else {
            warn!(connection = %id, "ignoring release of a connection that is not checked out");
            return;
        };
        session.mark_released();
        drop(permit);
        self.released.fetch_add(1, Ordering::Relaxed);
        debug!(connection = %id, "connection released");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
