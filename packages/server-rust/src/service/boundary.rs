//! Operation boundary: the point where an operation is considered done.
//!
//! The handler's return is not the end of the operation. Consumers of its
//! result (field resolution, response shaping) can still run statements under
//! the same context afterwards. [`drive_operation`] runs both and only then
//! completes the operation guard, which closes any scope still open.

use std::future::Future;
use std::sync::Arc;

use tower::{Service, ServiceExt};
use tracing::warn;
use unitscope_core::RequestContext;

use crate::service::operation::{Operation, OperationError};
use crate::transaction::{Outcome, ScopeManager};

/// Runs `op` through `service`, then `finish` on its response, then
/// completes the operation guard exactly once.
///
/// # Errors
///
/// Returns the first error from the service or `finish`. If both succeeded
/// but the guard's forced commit failed, returns that commit error.
pub async fn drive_operation<S, P, R, F, Fut, O>(
    service: S,
    manager: &Arc<ScopeManager>,
    op: Operation<P>,
    finish: F,
) -> Result<O, OperationError>
where
    S: Service<Operation<P>, Response = R, Error = OperationError>,
    F: FnOnce(RequestContext, R) -> Fut,
    Fut: Future<Output = Result<O, OperationError>>,
{
    let ctx = op.ctx.clone();
    let guard = manager.operation_guard(&ctx);

    let result = match service.oneshot(op).await {
        Ok(response) => finish(ctx.clone(), response).await,
        Err(e) => Err(e),
    };

    let outcome = if result.is_ok() {
        Outcome::Success
    } else {
        Outcome::Failure
    };
    match (result, guard.complete(outcome).await) {
        (Ok(value), Ok(_)) => Ok(value),
        (Ok(_), Err(commit)) => Err(commit.into()),
        (Err(e), Ok(_)) => Err(e),
        (Err(e), Err(cleanup)) => {
            warn!(error = %cleanup, "operation cleanup failed after an earlier error");
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::pin::Pin;
    use std::task::{Context, Poll};

    use unitscope_core::Identity;

    use super::*;
    use crate::config::{PoolConfig, ScopeConfig};
    use crate::service::build_operation_pipeline;
    use crate::storage::{ConnectionProvider, Filter, MemoryDatabase, MemoryPool, Row};
    use crate::transaction::ScopeMode;

    /// Manual-mode handler that begins a transaction and returns the new
    /// order id without committing.
    #[derive(Clone)]
    struct PlaceOrder {
        manager: Arc<ScopeManager>,
    }

    impl Service<Operation<()>> for PlaceOrder {
        type Response = i64;
        type Error = OperationError;
        type Future = Pin<Box<dyn Future<Output = Result<i64, OperationError>> + Send>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, op: Operation<()>) -> Self::Future {
            let manager = Arc::clone(&self.manager);
            Box::pin(async move {
                manager.begin(&op.ctx).await?;
                let id = manager
                    .handle(&op.ctx)
                    .await
                    .insert("orders", Row::new())
                    .await?;
                Ok(id)
            })
        }
    }

    fn setup() -> (Arc<MemoryPool>, Arc<ScopeManager>) {
        let pool = Arc::new(MemoryPool::new(
            Arc::new(MemoryDatabase::new()),
            &PoolConfig::default(),
        ));
        let manager = Arc::new(ScopeManager::new(
            Arc::clone(&pool) as Arc<dyn ConnectionProvider>
        ));
        (pool, manager)
    }

    fn op() -> Operation<()> {
        Operation::new(RequestContext::new(Identity::default()), "place_order", ())
            .with_mode(ScopeMode::Manual)
    }

    #[tokio::test]
    async fn late_field_resolution_runs_inside_the_scope_then_commits() {
        let (pool, manager) = setup();
        let svc = build_operation_pipeline(
            PlaceOrder {
                manager: Arc::clone(&manager),
            },
            Arc::clone(&manager),
            &ScopeConfig::default(),
        );

        let resolver = Arc::clone(&manager);
        let visible = drive_operation(svc, &manager, op(), |ctx, id| async move {
            let db = resolver.handle(&ctx).await;
            assert!(db.is_transactional());
            let rows = db.select("orders", Some(Filter::eq("id", id))).await?;
            Ok::<_, OperationError>(rows.len())
        })
        .await
        .unwrap();

        assert_eq!(visible, 1);
        assert_eq!(pool.database().count("orders"), 1);
        assert_eq!(pool.released_total(), 1);
        assert_eq!(manager.active_scopes(), 0);
    }

    #[tokio::test]
    async fn failing_resolution_rolls_back_the_leftover_scope() {
        let (pool, manager) = setup();
        let svc = build_operation_pipeline(
            PlaceOrder {
                manager: Arc::clone(&manager),
            },
            Arc::clone(&manager),
            &ScopeConfig::default(),
        );

        let err = drive_operation(svc, &manager, op(), |_ctx, _id| async {
            Err::<(), _>(OperationError::Domain(anyhow::anyhow!("resolver failed")))
        })
        .await
        .unwrap_err();

        assert_eq!(err.to_string(), "resolver failed");
        assert_eq!(pool.database().count("orders"), 0);
        assert_eq!(manager.active_scopes(), 0);
    }
}
