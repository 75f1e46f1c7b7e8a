//! Deadline middleware for operations.
//!
//! Each operation runs under its own `timeout_ms` override, or the layer's
//! configured default when it carries none. An elapsed deadline drops the
//! inner future and surfaces as `OperationError::Timeout`; any transaction
//! level the dropped future had entered is abandoned as a failure.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tower::{Layer, Service};

use crate::config::ScopeConfig;
use crate::service::operation::{Operation, OperationError};

// ---------------------------------------------------------------------------
// TimeoutLayer
// ---------------------------------------------------------------------------

/// Tower layer enforcing a deadline on every operation.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutLayer {
    default_timeout_ms: u64,
}

impl TimeoutLayer {
    /// Applies `default_timeout_ms` to operations without an override.
    #[must_use]
    pub fn new(default_timeout_ms: u64) -> Self {
        Self { default_timeout_ms }
    }

    #[must_use]
    pub fn from_config(config: &ScopeConfig) -> Self {
        Self::new(config.default_operation_timeout_ms)
    }
}

impl<S> Layer<S> for TimeoutLayer {
    type Service = TimeoutService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TimeoutService {
            inner,
            default_timeout_ms: self.default_timeout_ms,
        }
    }
}

// ---------------------------------------------------------------------------
// TimeoutService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TimeoutService<S> {
    inner: S,
    default_timeout_ms: u64,
}

impl<S, P, R> Service<Operation<P>> for TimeoutService<S>
where
    S: Service<Operation<P>, Response = R, Error = OperationError> + Send,
    S::Future: Send + 'static,
{
    type Response = R;
    type Error = OperationError;
    type Future = Pin<Box<dyn Future<Output = Result<R, OperationError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, op: Operation<P>) -> Self::Future {
        let timeout_ms = op.timeout_ms.unwrap_or(self.default_timeout_ms);
        let fut = self.inner.call(op);
        Box::pin(async move {
            tokio::time::timeout(Duration::from_millis(timeout_ms), fut)
                .await
                .unwrap_or(Err(OperationError::Timeout { timeout_ms }))
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
