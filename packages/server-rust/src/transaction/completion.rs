//! Operation-complete hook.
//!
//! Whatever drives a unit of work (RPC handler, job runner) takes an
//! [`OperationGuard`] before running it and completes the guard right
//! before the operation is considered done, after deferred consumers of the
//! context have run. Completion closes any scope the wrappers left open.
//! A guard dropped without completion rolls the scope back.

use std::sync::Arc;

use tracing::warn;
use unitscope_core::RequestContext;

use super::manager::{spawn_cleanup, ExitStatus, Outcome, ScopeManager};
use crate::error::ResourceError;

/// Completion obligation for one operation.
#[must_use = "an operation guard must be completed when the operation ends"]
pub struct OperationGuard {
    manager: Arc<ScopeManager>,
    ctx: RequestContext,
    completed: bool,
}

impl ScopeManager {
    /// Takes the completion obligation for the operation running under `ctx`.
    pub fn operation_guard(self: &Arc<Self>, ctx: &RequestContext) -> OperationGuard {
        OperationGuard {
            manager: Arc::clone(self),
            ctx: ctx.clone(),
            completed: false,
        }
    }
}

impl OperationGuard {
    /// The context the guard watches.
    #[must_use]
    pub fn context(&self) -> &RequestContext {
        &self.ctx
    }

    /// Marks the operation complete.
    ///
    /// If the token still has an open scope, commits it (unless it is
    /// poisoned or `outcome` is `Failure`) and releases it. Otherwise a
    /// no-op returning [`ExitStatus::NoScope`].
    ///
    /// # Errors
    ///
    /// Returns the commit error if the forced commit failed.
    pub async fn complete(mut self, outcome: Outcome) -> Result<ExitStatus, ResourceError> {
        self.completed = true;
        self.manager.force_release(&self.ctx, outcome).await
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        let Some(token) = self.ctx.token() else {
            return;
        };
        if !self.manager.registry().is_open(token) {
            return;
        }

        warn!(%token, "operation guard dropped without completion, rolling back");
        let manager = Arc::clone(&self.manager);
        let ctx = self.ctx.clone();
        spawn_cleanup(token, async move {
            manager.force_release(&ctx, Outcome::Failure).await
        });
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use unitscope_core::Identity;

    use super::*;
    use crate::config::PoolConfig;
    use crate::storage::{ConnectionProvider, MemoryDatabase, MemoryPool, Row};
    use crate::transaction::ScopeMode;

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

    fn row(name: &str) -> Row {
        let mut row = Row::new();
        row.insert("name".to_string(), name.into());
        row
    }

    #[tokio::test]
    async fn complete_after_normal_exit_is_a_no_op() {
        let (pool, manager) = setup();
        let ctx = RequestContext::new(Identity::default());
        let guard = manager.operation_guard(&ctx);

        manager.enter(&ctx, ScopeMode::Auto).await.unwrap();
        manager.exit(&ctx, Outcome::Success).await.unwrap();

        assert_eq!(
            guard.complete(Outcome::Success).await.unwrap(),
            ExitStatus::NoScope
        );
        assert_eq!(pool.released_total(), 1);
    }

    #[tokio::test]
    async fn complete_commits_a_scope_left_open() {
        let (pool, manager) = setup();
        let ctx = RequestContext::new(Identity::default());
        let guard = manager.operation_guard(&ctx);

        manager.begin(&ctx).await.unwrap();
        manager.handle(&ctx).await.insert("users", row("ann")).await.unwrap();

        assert_eq!(
            guard.complete(Outcome::Success).await.unwrap(),
            ExitStatus::Committed
        );
        assert_eq!(pool.database().count("users"), 1);
        assert_eq!(manager.active_scopes(), 0);
    }

    #[tokio::test]
    async fn complete_with_failure_rolls_back() {
        let (pool, manager) = setup();
        let ctx = RequestContext::new(Identity::default());
        let guard = manager.operation_guard(&ctx);

        manager.begin(&ctx).await.unwrap();
        manager.handle(&ctx).await.insert("users", row("ann")).await.unwrap();

        assert_eq!(
            guard.complete(Outcome::Failure).await.unwrap(),
            ExitStatus::RolledBack
        );
        assert_eq!(pool.database().count("users"), 0);
    }

    #[tokio::test]
    async fn dropped_guard_rolls_back_leftover_scope() {
        let (pool, manager) = setup();
        let ctx = RequestContext::new(Identity::default());

        {
            let _guard = manager.operation_guard(&ctx);
            manager.begin(&ctx).await.unwrap();
            manager.handle(&ctx).await.insert("users", row("ann")).await.unwrap();
        }

        for _ in 0..100 {
            if manager.active_scopes() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(manager.active_scopes(), 0);
        assert_eq!(pool.database().count("users"), 0);
        assert_eq!(pool.released_total(), 1);
    }

    #[tokio::test]
    async fn dropped_guard_without_scope_does_nothing() {
        let (pool, manager) = setup();
        let ctx = RequestContext::new(Identity::default());
        drop(manager.operation_guard(&ctx));
        assert_eq!(pool.acquired_total(), 0);
    }
}
