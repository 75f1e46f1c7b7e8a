//! Declarative wrapper: run a unit of work inside a transaction scope.
//!
//! [`ScopeManager::with_transaction`] is the direct form;
//! [`transactional`] turns a unit-of-work function into a wrapped,
//! cloneable closure that can be handed around like the original.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::warn;
use unitscope_core::RequestContext;

use super::manager::{Outcome, ScopeManager};
use super::registry::ScopeMode;
use crate::error::ResourceError;

/// Boxed `Send` future, as returned by [`transactional`] closures.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

impl ScopeManager {
    /// Runs `f` as a unit of work under the context's token.
    ///
    /// `Auto`: enters a scope (joining an open one), runs `f`, exits with
    /// `Success` on `Ok` and with `Failure` on `Err`. `Manual`: runs `f`
    /// without entering; `f` drives the manual API itself or works in
    /// autocommit.
    ///
    /// If the returned future is dropped between entry and exit (a timeout,
    /// `select!`, an aborted task), the level it entered is given up as a
    /// failure: the scope is poisoned and, if it was the outermost level,
    /// rolled back and released.
    ///
    /// # Errors
    ///
    /// Returns `f`'s error unchanged; the scope is poisoned and rolled back
    /// when it closes. On the success path, a failure to open the scope or
    /// to commit it is returned converted into `E`.
    pub async fn with_transaction<F, Fut, T, E>(
        self: &Arc<Self>,
        ctx: &RequestContext,
        mode: ScopeMode,
        f: F,
    ) -> Result<T, E>
    where
        F: FnOnce(RequestContext) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<ResourceError>,
    {
        if mode == ScopeMode::Manual {
            return f(ctx.clone()).await;
        }

        self.enter(ctx, ScopeMode::Auto).await?;
        let level = EnteredLevel {
            manager: Arc::clone(self),
            ctx: ctx.clone(),
            armed: true,
        };
        let result = f(ctx.clone()).await;
        level.disarm();

        match result {
            Ok(value) => {
                self.exit(ctx, Outcome::Success).await?;
                Ok(value)
            }
            Err(e) => {
                if let Err(cleanup) = self.exit(ctx, Outcome::Failure).await {
                    warn!(error = %cleanup, "cleanup after failed unit of work reported an error");
                }
                Err(e)
            }
        }
    }
}

/// One entered scope level that has not been exited yet.
///
/// Dropped while armed, it abandons the level as a failure.
struct EnteredLevel {
    manager: Arc<ScopeManager>,
    ctx: RequestContext,
    armed: bool,
}

impl EnteredLevel {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for EnteredLevel {
    fn drop(&mut self) {
        if self.armed {
            self.manager.abandon_level(&self.ctx);
        }
    }
}

/// Wraps a unit-of-work function so every call runs under
/// [`ScopeManager::with_transaction`].
///
/// The returned closure has the same call shape as `f` and can be cloned
/// into as many call sites as needed.
pub fn transactional<A, F, Fut, T, E>(
    manager: Arc<ScopeManager>,
    mode: ScopeMode,
    f: F,
) -> impl Fn(RequestContext, A) -> BoxFuture<'static, Result<T, E>> + Clone + Send + Sync
where
    A: Send + 'static,
    F: Fn(RequestContext, A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: From<ResourceError> + Send + 'static,
{
    let f = Arc::new(f);
    move |ctx: RequestContext, arg: A| {
        let manager = Arc::clone(&manager);
        let f = Arc::clone(&f);
        let fut: BoxFuture<'static, Result<T, E>> = Box::pin(async move {
            manager
                .with_transaction(&ctx, mode, move |ctx| f(ctx, arg))
                .await
        });
        fut
    }
}
