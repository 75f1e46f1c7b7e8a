//! Resource-level error taxonomy.
//!
//! Business-rule failures are the caller's own error type and pass through the
//! transaction machinery unchanged. Everything here concerns connections and
//! transaction handles.

use unitscope_core::TransactionToken;

use crate::storage::ConnectionId;
use crate::transaction::HandleState;

/// Errors raised by connections, the pool, and transaction handles.
///
/// When one of these surfaces inside a unit of work it is treated as a
/// failure: the owning scope is poisoned and rolled back if the handle is
/// still usable. Callers must not retry against the same handle.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResourceError {
    #[error("connection pool exhausted: no connection within {timeout_ms}ms")]
    PoolTimeout { timeout_ms: u64 },
    #[error("connection pool is closed")]
    PoolClosed,
    #[error("connection {connection} already in use by another statement")]
    Busy { connection: ConnectionId },
    #[error("connection {connection} already released")]
    Released { connection: ConnectionId },
    #[error("transaction handle {token} is {state}")]
    HandleClosed {
        token: TransactionToken,
        state: HandleState,
    },
    #[error("illegal transaction handle transition: cannot {action} from {from}")]
    IllegalTransition {
        from: HandleState,
        action: &'static str,
    },
    #[error("driver error: {0}")]
    Driver(String),
}

impl ResourceError {
    /// Returns `true` if the error means the underlying handle can no longer
    /// run statements, so rolling back through it is pointless.
    #[must_use]
    pub fn is_handle_unusable(&self) -> bool {
        matches!(
            self,
            ResourceError::Released { .. } | ResourceError::HandleClosed { .. }
        )
    }
}
