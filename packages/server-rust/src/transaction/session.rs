//! Database handle exposed to domain code.

use std::fmt;
use std::sync::Arc;

use unitscope_core::TransactionToken;

use super::handle::TransactionHandle;
use crate::error::ResourceError;
use crate::storage::{ConnectionProvider, Filter, QueryOutput, Row, Statement};

#[derive(Clone)]
enum Session {
    Transactional(Arc<TransactionHandle>),
    Autocommit(Arc<dyn ConnectionProvider>),
}

/// What domain code runs statements against.
///
/// Either the open transaction for the caller's token, or an autocommit
/// session that checks a connection out per statement. Obtained from
/// [`ScopeManager::handle`](super::ScopeManager::handle).
#[derive(Clone)]
pub struct DbHandle {
    session: Session,
}

impl fmt::Debug for DbHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.session {
            Session::Transactional(handle) => f
                .debug_tuple("DbHandle::Transactional")
                .field(handle)
                .finish(),
            Session::Autocommit(_) => f.write_str("DbHandle::Autocommit"),
        }
    }
}

impl DbHandle {
    pub(crate) fn transactional(handle: Arc<TransactionHandle>) -> Self {
        Self {
            session: Session::Transactional(handle),
        }
    }

    pub(crate) fn autocommit(provider: Arc<dyn ConnectionProvider>) -> Self {
        Self {
            session: Session::Autocommit(provider),
        }
    }

    /// Returns `true` if statements run inside an open transaction.
    #[must_use]
    pub fn is_transactional(&self) -> bool {
        matches!(self.session, Session::Transactional(_))
    }

    /// Token of the transaction, if any.
    #[must_use]
    pub fn token(&self) -> Option<TransactionToken> {
        match &self.session {
            Session::Transactional(handle) => Some(handle.token()),
            Session::Autocommit(_) => None,
        }
    }

    /// Runs one statement.
    ///
    /// # Errors
    ///
    /// Transactional: [`ResourceError::HandleClosed`] if the scope has been
    /// resolved since the handle was obtained, or the connection's error.
    /// Autocommit: the provider's acquire error or the connection's error.
    pub async fn execute(&self, statement: Statement) -> Result<QueryOutput, ResourceError> {
        match &self.session {
            Session::Transactional(handle) => handle.execute(statement).await,
            Session::Autocommit(provider) => {
                let connection = provider.acquire().await?;
                let result = connection.execute(statement).await;
                provider.release(connection).await;
                result
            }
        }
    }

    /// Inserts a row and returns its assigned id.
    ///
    /// # Errors
    ///
    /// See [`execute`](Self::execute).
    pub async fn insert(&self, table: &str, row: Row) -> Result<i64, ResourceError> {
        let statement = Statement::Insert {
            table: table.to_string(),
            row,
        };
        match self.execute(statement).await? {
            QueryOutput::Inserted { id } => Ok(id),
            other => Err(unexpected("insert", &other)),
        }
    }

    /// Selects rows, optionally filtered.
    ///
    /// # Errors
    ///
    /// See [`execute`](Self::execute).
    pub async fn select(
        &self,
        table: &str,
        filter: Option<Filter>,
    ) -> Result<Vec<Row>, ResourceError> {
        let statement = Statement::Select {
            table: table.to_string(),
            filter,
        };
        match self.execute(statement).await? {
            QueryOutput::Rows(rows) => Ok(rows),
            other => Err(unexpected("select", &other)),
        }
    }

    /// Counts rows visible to this handle.
    ///
    /// # Errors
    ///
    /// See [`execute`](Self::execute).
    pub async fn count(&self, table: &str) -> Result<usize, ResourceError> {
        let statement = Statement::Count {
            table: table.to_string(),
        };
        match self.execute(statement).await? {
            QueryOutput::Count(n) => Ok(n),
            other => Err(unexpected("count", &other)),
        }
    }

    /// Deletes matching rows and returns how many were removed.
    ///
    /// # Errors
    ///
    /// See [`execute`](Self::execute).
    pub async fn delete(&self, table: &str, filter: Filter) -> Result<usize, ResourceError> {
        let statement = Statement::Delete {
            table: table.to_string(),
            filter,
        };
        match self.execute(statement).await? {
            QueryOutput::Deleted(n) => Ok(n),
            other => Err(unexpected("delete", &other)),
        }
    }
}

fn unexpected(statement: &str, output: &QueryOutput) -> ResourceError {
    ResourceError::Driver(format!("unexpected output for {statement}: {output:?}"))
}
