//! Operation envelope and error type carried through the pipeline.

use unitscope_core::RequestContext;

use crate::error::ResourceError;
use crate::transaction::ScopeMode;

/// One unit of work submitted to the operation pipeline.
#[derive(Debug, Clone)]
pub struct Operation<P> {
    /// Request context; its token ties every nested call to one scope.
    pub ctx: RequestContext,
    /// Operation name, used for span and metric labels.
    pub name: &'static str,
    /// Whether the transaction layer opens a scope around the handler.
    pub mode: ScopeMode,
    /// Deadline override in milliseconds. `None` uses the pipeline's
    /// configured default.
    pub timeout_ms: Option<u64>,
    pub payload: P,
}

impl<P> Operation<P> {
    /// Creates an `Auto` operation that uses the pipeline's default timeout.
    #[must_use]
    pub fn new(ctx: RequestContext, name: &'static str, payload: P) -> Self {
        Self {
            ctx,
            name,
            mode: ScopeMode::Auto,
            timeout_ms: None,
            payload,
        }
    }

    #[must_use]
    pub fn with_mode(mut self, mode: ScopeMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    #[must_use]
    pub fn ctx(&self) -> &RequestContext {
        &self.ctx
    }
}

/// Errors returned by operation handlers and middleware.
#[derive(Debug, thiserror::Error)]
pub enum OperationError {
    #[error("operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error(transparent)]
    Domain(#[from] anyhow::Error),
}
