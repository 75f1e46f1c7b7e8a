//! Pipeline composition: combines all middleware layers into a single service stack.

use std::sync::Arc;

use tower::{Service, ServiceBuilder};

use super::metrics::MetricsLayer;
use super::timeout::TimeoutLayer;
use super::transaction::TransactionLayer;
use crate::config::ScopeConfig;
use crate::service::operation::{Operation, OperationError};
use crate::transaction::ScopeManager;

/// Build the operation pipeline by wrapping a handler service with middleware layers.
///
/// Layer order (outermost to innermost):
/// 1. `MetricsLayer` -- record timing and outcome, including commit failures
/// 2. `TransactionLayer` -- open the scope, commit on `Ok`, roll back on `Err`
/// 3. `TimeoutLayer` -- turn an elapsed deadline into an error inside the scope
///
/// Operations without their own `timeout_ms` get
/// `config.default_operation_timeout_ms`.
#[must_use]
pub fn build_operation_pipeline<S, P, R>(
    handler: S,
    manager: Arc<ScopeManager>,
    config: &ScopeConfig,
) -> impl Service<Operation<P>, Response = R, Error = OperationError> + Clone
where
    S: Service<Operation<P>, Response = R, Error = OperationError> + Clone + Send + 'static,
    S::Future: Send + 'static,
    P: Send + 'static,
    R: Send + 'static,
{
    ServiceBuilder::new()
        .layer(MetricsLayer)
        .layer(TransactionLayer::new(manager))
        .layer(TimeoutLayer::from_config(config))
        .service(handler)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
