use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};

use crate::token::TransactionToken;
use crate::types::Principal;

/// Immutable identity of an inbound request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Tenant scope for multi-tenant isolation. `None` for single-tenant deployments.
    pub tenant_id: Option<String>,
    /// Sales/delivery channel the request arrived through, if any.
    pub channel: Option<String>,
    /// Authenticated principal, if the request is authenticated.
    pub principal: Option<Principal>,
    /// BCP-47 language tag used for localized reads.
    pub locale: String,
    /// Distributed trace identifier for observability.
    pub trace_id: String,
}

impl Default for Identity {
    fn default() -> Self {
        Self {
            tenant_id: None,
            channel: None,
            principal: None,
            locale: "en".to_string(),
            trace_id: String::new(),
        }
    }
}

/// Per-request context threaded through every call of a unit of work.
///
/// Clones share the transaction token slot, so code running anywhere under a
/// clone resolves the same transaction scope. The slot starts empty and is
/// filled once, on the first scope entry. Use [`RequestContext::detached`] to
/// start an independent unit of work with the same identity.
#[derive(Debug, Clone)]
pub struct RequestContext {
    identity: Arc<Identity>,
    token: Arc<OnceLock<TransactionToken>>,
}

impl RequestContext {
    /// Creates a context with an empty token slot.
    #[must_use]
    pub fn new(identity: Identity) -> Self {
        Self {
            identity: Arc::new(identity),
            token: Arc::new(OnceLock::new()),
        }
    }

    /// Returns the request identity.
    #[must_use]
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Returns the transaction token, if a scope was ever entered for this context.
    #[must_use]
    pub fn token(&self) -> Option<TransactionToken> {
        self.token.get().copied()
    }

    /// Returns the transaction token, assigning a fresh one on first use.
    ///
    /// Every clone observes the same token afterwards.
    pub fn ensure_token(&self) -> TransactionToken {
        *self.token.get_or_init(TransactionToken::new)
    }

    /// Same identity, fresh empty token slot.
    ///
    /// Work run under the returned context never joins this context's scope.
    #[must_use]
    pub fn detached(&self) -> Self {
        Self {
            identity: Arc::clone(&self.identity),
            token: Arc::new(OnceLock::new()),
        }
    }

    /// Same identity, a new slot pre-filled with `token`.
    ///
    /// Used to re-execute work in the background under an inherited token.
    #[must_use]
    pub fn with_token(&self, token: TransactionToken) -> Self {
        Self {
            identity: Arc::clone(&self.identity),
            token: Arc::new(OnceLock::from(token)),
        }
    }

    /// Returns `true` if both contexts share one token slot.
    #[must_use]
    pub fn shares_slot_with(&self, other: &RequestContext) -> bool {
        Arc::ptr_eq(&self.token, &other.token)
    }
}
