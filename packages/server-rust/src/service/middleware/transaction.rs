//! Transaction middleware for operations.
//!
//! Runs the inner service under [`ScopeManager::with_transaction`] using the
//! operation's own context and mode. `Ok` commits, `Err` (including a
//! timeout from an inner layer) rolls back.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tower::{Layer, Service};

use crate::service::operation::{Operation, OperationError};
use crate::transaction::ScopeManager;

// ---------------------------------------------------------------------------
// TransactionLayer
// ---------------------------------------------------------------------------

/// Tower layer that gives each operation a transaction scope.
#[derive(Clone)]
pub struct TransactionLayer {
    manager: Arc<ScopeManager>,
}

impl TransactionLayer {
    #[must_use]
    pub fn new(manager: Arc<ScopeManager>) -> Self {
        Self { manager }
    }
}

impl<S> Layer<S> for TransactionLayer {
    type Service = TransactionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TransactionService {
            inner,
            manager: Arc::clone(&self.manager),
        }
    }
}

// ---------------------------------------------------------------------------
// TransactionService
// ---------------------------------------------------------------------------

/// Service wrapper that enters a scope before the handler runs and exits it
/// with the handler's outcome.
#[derive(Clone)]
pub struct TransactionService<S> {
    inner: S,
    manager: Arc<ScopeManager>,
}

impl<S, P, R> Service<Operation<P>> for TransactionService<S>
where
    S: Service<Operation<P>, Response = R, Error = OperationError> + Clone + Send + 'static,
    S::Future: Send + 'static,
    P: Send + 'static,
    R: Send + 'static,
{
    type Response = R;
    type Error = OperationError;
    type Future = Pin<Box<dyn Future<Output = Result<R, OperationError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, op: Operation<P>) -> Self::Future {
        // Take the service that was polled ready; leave a fresh clone behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let manager = Arc::clone(&self.manager);

        Box::pin(async move {
            let ctx = op.ctx.clone();
            let mode = op.mode;
            manager
                .with_transaction(&ctx, mode, move |_ctx| inner.call(op))
                .await
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
