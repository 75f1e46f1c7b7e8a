//! Manual transaction API.

use std::sync::Arc;

use tracing::debug;
use unitscope_core::RequestContext;

use super::handle::TransactionHandle;
use super::manager::{ExitStatus, Outcome, ScopeManager};
use super::registry::ScopeMode;
use crate::error::ResourceError;

impl ScopeManager {
    /// Opens (or joins) a scope explicitly.
    ///
    /// # Errors
    ///
    /// Same as [`enter`](Self::enter).
    pub async fn begin(
        &self,
        ctx: &RequestContext,
    ) -> Result<Arc<TransactionHandle>, ResourceError> {
        self.enter(ctx, ScopeMode::Manual).await
    }

    /// Exits one level with `Success`. A no-op without a prior `begin`.
    ///
    /// # Errors
    ///
    /// Returns the commit error if this call closed the scope and the
    /// commit failed (the scope is rolled back by then).
    pub async fn commit(&self, ctx: &RequestContext) -> Result<ExitStatus, ResourceError> {
        let status = self.exit(ctx, Outcome::Success).await?;
        if status == ExitStatus::NoScope {
            debug!("commit without an open transaction ignored");
        }
        Ok(status)
    }

    /// Exits one level with `Failure`, poisoning the scope. A no-op without
    /// a prior `begin`.
    ///
    /// # Errors
    ///
    /// Never fails in practice; rollback errors are logged. Kept fallible to
    /// match [`commit`](Self::commit).
    pub async fn rollback(&self, ctx: &RequestContext) -> Result<ExitStatus, ResourceError> {
        let status = self.exit(ctx, Outcome::Failure).await?;
        if status == ExitStatus::NoScope {
            debug!("rollback without an open transaction ignored");
        }
        Ok(status)
    }
}
