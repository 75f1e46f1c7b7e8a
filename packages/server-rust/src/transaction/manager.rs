//! Transaction scope manager.
//!
//! Opens, joins and closes transaction scopes against the
//! [`TransactionRegistry`]. Nested entries under one token share a single
//! handle and only bump its depth; a failure at any depth poisons the scope;
//! the physical commit or rollback plus the release happen once, when the
//! depth returns to zero.
//!
//! Concurrent statements issued under one token are not serialized here.
//! They share one connection, and an overlap surfaces as
//! [`ResourceError::Busy`], which the owning unit of work treats as a
//! failure like any other.

use std::future::Future;
use std::sync::Arc;

use metrics::counter;
use tracing::{debug, error, info, warn};
use unitscope_core::{RequestContext, TransactionToken};

use super::handle::TransactionHandle;
use super::registry::{ActiveScope, ScopeMode, SlotAttempt, SlotGuard, TransactionRegistry};
use super::session::DbHandle;
use crate::error::ResourceError;
use crate::storage::ConnectionProvider;

/// How a unit of work (or one nested part of it) ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

/// What an exit did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Nothing was registered for the context's token.
    NoScope,
    /// The scope is still open at the given depth.
    Nested { depth: usize },
    /// Depth reached zero and the transaction committed.
    Committed,
    /// Depth reached zero and the transaction rolled back.
    RolledBack,
}

impl ExitStatus {
    /// Returns `true` if the exit physically closed the transaction.
    #[must_use]
    pub fn is_final(self) -> bool {
        matches!(self, ExitStatus::Committed | ExitStatus::RolledBack)
    }

    fn as_str(self) -> &'static str {
        match self {
            ExitStatus::NoScope => "no_scope",
            ExitStatus::Nested { .. } => "nested",
            ExitStatus::Committed => "commit",
            ExitStatus::RolledBack => "rollback",
        }
    }
}

/// Owns the registry and the connection provider.
///
/// Shared as `Arc<ScopeManager>` by everything that drives units of work.
pub struct ScopeManager {
    registry: TransactionRegistry,
    provider: Arc<dyn ConnectionProvider>,
}

impl ScopeManager {
    /// Creates a manager drawing connections from `provider`.
    #[must_use]
    pub fn new(provider: Arc<dyn ConnectionProvider>) -> Self {
        Self {
            registry: TransactionRegistry::new(),
            provider,
        }
    }

    /// The registry of open scopes.
    #[must_use]
    pub fn registry(&self) -> &TransactionRegistry {
        &self.registry
    }

    /// Number of tokens currently holding a registry slot.
    #[must_use]
    pub fn active_scopes(&self) -> usize {
        self.registry.len()
    }

    /// Returns `true` if the context's token has an open scope.
    #[must_use]
    pub fn in_transaction(&self, ctx: &RequestContext) -> bool {
        ctx.token().is_some_and(|t| self.registry.is_open(t))
    }

    /// Enters a scope for the context's token.
    ///
    /// Joins the open scope if there is one (depth + 1, same handle).
    /// Otherwise acquires a connection, begins a transaction and registers
    /// it at depth 1.
    ///
    /// # Errors
    ///
    /// Returns the provider's or driver's error if a new transaction could
    /// not be started. Nothing stays registered in that case.
    pub async fn enter(
        &self,
        ctx: &RequestContext,
        mode: ScopeMode,
    ) -> Result<Arc<TransactionHandle>, ResourceError> {
        let token = ctx.ensure_token();
        let mut guard = self.registry.lock_or_create(token).await;

        if let Some(scope) = guard.scope_mut() {
            scope.depth += 1;
            debug!(%token, depth = scope.depth, %mode, "joined open transaction scope");
            return Ok(Arc::clone(&scope.handle));
        }

        let connection = match self.provider.acquire().await {
            Ok(connection) => connection,
            Err(e) => {
                self.registry.retire(guard);
                return Err(e);
            }
        };
        let handle = match TransactionHandle::open(token, connection).await {
            Ok(handle) => Arc::new(handle),
            Err((e, connection)) => {
                self.provider.release(connection).await;
                self.registry.retire(guard);
                return Err(e);
            }
        };

        guard.install(ActiveScope {
            handle: Arc::clone(&handle),
            depth: 1,
            poisoned: false,
            mode,
        });
        counter!("unitscope_scopes_opened_total", "mode" => mode.as_str()).increment(1);
        debug!(%token, connection = %handle.connection_id(), %mode, "transaction scope opened");
        Ok(handle)
    }

    /// Exits one level of the context's scope.
    ///
    /// A `Failure` poisons the scope immediately, whatever the depth. At
    /// depth zero the transaction commits (or rolls back if poisoned), the
    /// connection is released and the registry entry removed. Without a
    /// registered scope this is a no-op.
    ///
    /// # Errors
    ///
    /// Returns the commit error if the final commit failed. The transaction
    /// has been rolled back and released by then. Cleanup errors after a
    /// rollback was decided are logged, not returned.
    pub async fn exit(
        &self,
        ctx: &RequestContext,
        outcome: Outcome,
    ) -> Result<ExitStatus, ResourceError> {
        let Some(mut guard) = self.lock_scope(ctx).await else {
            debug!(?outcome, "exit without an open transaction scope");
            return Ok(ExitStatus::NoScope);
        };
        let Some(scope) = guard.scope_mut() else {
            self.registry.retire(guard);
            return Ok(ExitStatus::NoScope);
        };

        scope.depth = scope.depth.saturating_sub(1);
        if outcome == Outcome::Failure && !scope.poisoned {
            scope.poisoned = true;
            debug!(token = %guard.token(), "transaction scope poisoned");
        }

        let Some(scope) = guard.scope() else {
            return Ok(ExitStatus::NoScope);
        };
        if scope.depth > 0 {
            return Ok(ExitStatus::Nested { depth: scope.depth });
        }
        self.finalize(guard).await
    }

    /// Marks the context's scope for rollback without changing its depth.
    /// Returns `false` if no scope is open.
    pub async fn poison(&self, ctx: &RequestContext) -> bool {
        let Some(mut guard) = self.lock_scope(ctx).await else {
            return false;
        };
        match guard.scope_mut() {
            Some(scope) => {
                scope.poisoned = true;
                true
            }
            None => false,
        }
    }

    /// Closes the context's scope regardless of depth.
    ///
    /// Commits unless the scope is poisoned or `outcome` is `Failure`.
    /// State-checked: a no-op when nothing is registered.
    ///
    /// # Errors
    ///
    /// Same as [`exit`](Self::exit).
    pub async fn force_release(
        &self,
        ctx: &RequestContext,
        outcome: Outcome,
    ) -> Result<ExitStatus, ResourceError> {
        let Some(mut guard) = self.lock_scope(ctx).await else {
            return Ok(ExitStatus::NoScope);
        };
        let token = guard.token();
        let Some(scope) = guard.scope_mut() else {
            self.registry.retire(guard);
            return Ok(ExitStatus::NoScope);
        };
        if outcome == Outcome::Failure {
            scope.poisoned = true;
        }
        info!(
            %token,
            depth = scope.depth,
            mode = %scope.mode,
            poisoned = scope.poisoned,
            "closing transaction scope left open at operation end"
        );
        counter!("unitscope_forced_releases_total").increment(1);
        self.finalize(guard).await
    }

    /// Resolves the handle domain code should use for the context.
    ///
    /// Returns the open transaction if the token has one, and a
    /// non-transactional autocommit handle otherwise. Resolve per call; the
    /// scope may close between calls.
    pub async fn handle(&self, ctx: &RequestContext) -> DbHandle {
        if let Some(guard) = self.lock_scope(ctx).await {
            if let Some(scope) = guard.scope() {
                return DbHandle::transactional(Arc::clone(&scope.handle));
            }
        }
        DbHandle::autocommit(Arc::clone(&self.provider))
    }

    /// Gives up one level of the context's scope without waiting, for a
    /// unit of work whose future was dropped before it could exit.
    ///
    /// Poisons the scope and takes one level off its depth on the spot. If
    /// that was the last level, the rollback and release run on a spawned
    /// task that keeps the slot locked. If another task holds the slot, a
    /// failing [`exit`](Self::exit) is spawned instead.
    pub(crate) fn abandon_level(self: &Arc<Self>, ctx: &RequestContext) {
        let Some(token) = ctx.token() else {
            return;
        };
        let mut guard = match self.registry.try_lock_existing(token) {
            SlotAttempt::Vacant => return,
            SlotAttempt::Locked(guard) => guard,
            SlotAttempt::Contended => {
                warn!(%token, "unit of work dropped while its scope was busy, queueing rollback");
                let manager = Arc::clone(self);
                let ctx = ctx.clone();
                spawn_cleanup(token, async move { manager.exit(&ctx, Outcome::Failure).await });
                return;
            }
        };
        let Some(scope) = guard.scope_mut() else {
            self.registry.retire(guard);
            return;
        };

        scope.poisoned = true;
        scope.depth = scope.depth.saturating_sub(1);
        warn!(%token, depth = scope.depth, "unit of work dropped before exit, scope poisoned");
        if scope.depth > 0 {
            return;
        }
        let manager = Arc::clone(self);
        spawn_cleanup(token, async move { manager.finalize(guard).await });
    }

    async fn lock_scope(&self, ctx: &RequestContext) -> Option<SlotGuard> {
        let token = ctx.token()?;
        self.registry.lock_existing(token).await
    }

    /// Physically resolves the scope held by `guard`, releases its
    /// connection, and removes it from the registry. The slot stays locked
    /// throughout, so no second handle can open for the token meanwhile.
    async fn finalize(&self, guard: SlotGuard) -> Result<ExitStatus, ResourceError> {
        let token = guard.token();
        let Some((handle, poisoned)) = guard
            .scope()
            .map(|scope| (Arc::clone(&scope.handle), scope.poisoned))
        else {
            self.registry.retire(guard);
            return Ok(ExitStatus::NoScope);
        };

        let mut first_error = None;
        let status = if poisoned {
            self.rollback_logged(&handle).await;
            ExitStatus::RolledBack
        } else {
            match handle.commit().await {
                Ok(()) => ExitStatus::Committed,
                Err(e) => {
                    if e.is_handle_unusable() {
                        warn!(%token, error = %e, "commit failed on an unusable connection, discarding");
                        handle.discard();
                    } else {
                        warn!(%token, error = %e, "commit failed, rolling back");
                        self.rollback_logged(&handle).await;
                    }
                    first_error = Some(e);
                    ExitStatus::RolledBack
                }
            }
        };

        if let Err(e) = handle.release(self.provider.as_ref()).await {
            warn!(%token, error = %e, "failed to release transaction handle");
        }
        self.registry.retire(guard);

        counter!("unitscope_scopes_closed_total", "outcome" => status.as_str()).increment(1);
        debug!(%token, outcome = status.as_str(), "transaction scope closed");

        match first_error {
            Some(e) => Err(e),
            None => Ok(status),
        }
    }

    async fn rollback_logged(&self, handle: &TransactionHandle) {
        if let Err(e) = handle.rollback().await {
            warn!(
                token = %handle.token(),
                error = %e,
                "rollback reported an error; uncommitted work is discarded on release"
            );
        }
    }
}

/// Runs scope cleanup on the current runtime, logging its error.
pub(super) fn spawn_cleanup<F>(token: TransactionToken, cleanup: F)
where
    F: Future<Output = Result<ExitStatus, ResourceError>> + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(runtime) => {
            runtime.spawn(async move {
                if let Err(e) = cleanup.await {
                    warn!(%token, error = %e, "rollback of abandoned scope failed");
                }
            });
        }
        Err(_) => {
            error!(%token, "scope abandoned outside a runtime, left open");
        }
    }
}
