//! Metrics middleware for operations.
//!
//! Wraps each operation in a `tracing` span carrying its duration and
//! outcome, and counts completions through the `metrics` facade.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use tower::{Layer, Service};
use tracing::{info_span, Instrument};

use crate::service::operation::{Operation, OperationError};

// ---------------------------------------------------------------------------
// MetricsLayer
// ---------------------------------------------------------------------------

/// Tower layer that instruments operations with timing and counting.
#[derive(Debug, Clone)]
pub struct MetricsLayer;

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService { inner }
    }
}

// ---------------------------------------------------------------------------
// MetricsService
// ---------------------------------------------------------------------------

/// Service wrapper that records operation duration and outcome.
#[derive(Debug, Clone)]
pub struct MetricsService<S> {
    inner: S,
}

impl<S, P, R> Service<Operation<P>> for MetricsService<S>
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
        let name = op.name;
        let mode = op.mode.as_str();
        let tenant = op.ctx.identity().tenant_id.clone().unwrap_or_default();

        let span = info_span!(
            "operation",
            operation = name,
            mode = mode,
            tenant = %tenant,
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        let fut = self.inner.call(op);

        Box::pin(
            async move {
                let start = Instant::now();
                let result = fut.await;

                let outcome = match &result {
                    Ok(_) => "ok",
                    Err(OperationError::Timeout { .. }) => "timeout",
                    Err(_) => "error",
                };

                #[allow(clippy::cast_possible_truncation)]
                let duration_ms = start.elapsed().as_millis() as u64;
                tracing::Span::current().record("duration_ms", duration_ms);
                tracing::Span::current().record("outcome", outcome);

                metrics::counter!(
                    "unitscope_operations_total",
                    "operation" => name,
                    "outcome" => outcome
                )
                .increment(1);
                metrics::histogram!("unitscope_operation_duration_seconds", "operation" => name)
                    .record(start.elapsed().as_secs_f64());

                tracing::info!(
                    operation = name,
                    duration_ms = duration_ms,
                    outcome = outcome,
                    "operation complete"
                );

                result
            }
            .instrument(span),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
