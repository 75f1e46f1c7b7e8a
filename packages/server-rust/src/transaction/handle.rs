//! Transaction handle and its lifecycle state machine.
//!
//! ```text
//! Open --commit--> Committed --release--> Released
//! Open --rollback--> RolledBack --release--> Released
//! ```
//!
//! No transition skips release, and release happens at most once.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;
use unitscope_core::TransactionToken;

use crate::error::ResourceError;
use crate::storage::{Connection, ConnectionId, ConnectionProvider, QueryOutput, Statement};

/// Lifecycle state of a [`TransactionHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    /// Transaction begun; statements allowed.
    Open,
    /// Commit succeeded; waiting for release.
    Committed,
    /// Rollback issued; waiting for release.
    RolledBack,
    /// Connection returned to the provider. Terminal.
    Released,
}

impl HandleState {
    /// Returns the lowercase state name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            HandleState::Open => "open",
            HandleState::Committed => "committed",
            HandleState::RolledBack => "rolled back",
            HandleState::Released => "released",
        }
    }
}

impl fmt::Display for HandleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An acquired connection with an open transaction on it.
///
/// Owned by exactly one registry entry. Domain code reaches it through
/// [`DbHandle`](super::DbHandle) and only ever runs statements; commit,
/// rollback and release belong to the scope manager.
pub struct TransactionHandle {
    token: TransactionToken,
    connection: Arc<dyn Connection>,
    state: Mutex<HandleState>,
}

impl fmt::Debug for TransactionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionHandle")
            .field("token", &self.token)
            .field("connection", &self.connection.id())
            .field("state", &self.state())
            .finish()
    }
}

impl TransactionHandle {
    /// Begins a transaction on `connection` and wraps it.
    ///
    /// On failure the connection is handed back to the caller for release.
    pub(crate) async fn open(
        token: TransactionToken,
        connection: Arc<dyn Connection>,
    ) -> Result<Self, (ResourceError, Arc<dyn Connection>)> {
        match connection.begin().await {
            Ok(()) => Ok(Self {
                token,
                connection,
                state: Mutex::new(HandleState::Open),
            }),
            Err(e) => Err((e, connection)),
        }
    }

    /// The token this handle belongs to.
    #[must_use]
    pub fn token(&self) -> TransactionToken {
        self.token
    }

    /// Identifier of the underlying connection.
    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        self.connection.id()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> HandleState {
        *self.state.lock()
    }

    /// Runs a statement inside the transaction.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError::HandleClosed`] once the transaction has been
    /// resolved, and whatever the connection reports otherwise (including
    /// [`ResourceError::Busy`] for overlapping statements).
    pub async fn execute(&self, statement: Statement) -> Result<QueryOutput, ResourceError> {
        let state = self.state();
        if state != HandleState::Open {
            return Err(ResourceError::HandleClosed {
                token: self.token,
                state,
            });
        }
        self.connection.execute(statement).await
    }

    /// `Open -> Committed`. On a driver error the handle stays `Open` so the
    /// caller can still roll back.
    pub(crate) async fn commit(&self) -> Result<(), ResourceError> {
        self.expect_open("commit")?;
        self.connection.commit().await?;
        *self.state.lock() = HandleState::Committed;
        Ok(())
    }

    /// `Open -> RolledBack`. The state moves even when the driver reports an
    /// error; uncommitted work is discarded when the connection is released.
    pub(crate) async fn rollback(&self) -> Result<(), ResourceError> {
        self.expect_open("rollback")?;
        let result = self.connection.rollback().await;
        *self.state.lock() = HandleState::RolledBack;
        result
    }

    /// `Open -> RolledBack` without a driver call, for a connection that can
    /// no longer run statements. A no-op in any other state.
    pub(crate) fn discard(&self) {
        let mut state = self.state.lock();
        if *state == HandleState::Open {
            *state = HandleState::RolledBack;
        }
    }

    /// `{Committed, RolledBack} -> Released`, returning the connection to
    /// `provider`. Returns `Ok(false)` if the handle was already released.
    pub(crate) async fn release(
        &self,
        provider: &dyn ConnectionProvider,
    ) -> Result<bool, ResourceError> {
        {
            let mut state = self.state.lock();
            match *state {
                HandleState::Released => return Ok(false),
                HandleState::Open => {
                    return Err(ResourceError::IllegalTransition {
                        from: HandleState::Open,
                        action: "release",
                    })
                }
                HandleState::Committed | HandleState::RolledBack => {
                    *state = HandleState::Released;
                }
            }
        }
        provider.release(Arc::clone(&self.connection)).await;
        Ok(true)
    }

    fn expect_open(&self, action: &'static str) -> Result<(), ResourceError> {
        let state = self.state();
        if state == HandleState::Open {
            Ok(())
        } else {
            Err(ResourceError::IllegalTransition {
                from: state,
                action,
            })
        }
    }
}

impl Drop for TransactionHandle {
    fn drop(&mut self) {
        let state = *self.state.get_mut();
        if state != HandleState::Released {
            warn!(
                token = %self.token,
                connection = %self.connection.id(),
                state = %state,
                "transaction handle dropped without release"
            );
        }
    }
}
