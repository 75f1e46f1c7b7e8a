//! Concurrent token -> scope registry.
//!
//! Each token maps to its own slot guarded by an async mutex, so work under
//! different tokens never contends and the slow parts of scope entry
//! (acquire, begin) happen under the owning token's lock only.
//!
//! A slot is retired when its scope closes. Retired slots are removed from
//! the map; a task that was waiting on a retired slot looks the token up
//! again and lands on a fresh one.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use unitscope_core::TransactionToken;

use super::handle::TransactionHandle;

/// How a scope was opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeMode {
    /// Entered and exited automatically by the declarative wrapper.
    Auto,
    /// Entered and exited by explicit `begin`/`commit`/`rollback` calls.
    Manual,
}

impl ScopeMode {
    /// Returns the lowercase mode name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ScopeMode::Auto => "auto",
            ScopeMode::Manual => "manual",
        }
    }
}

impl fmt::Display for ScopeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registry entry for a token with an open transaction.
#[derive(Debug)]
pub(crate) struct ActiveScope {
    pub(crate) handle: Arc<TransactionHandle>,
    pub(crate) depth: usize,
    pub(crate) poisoned: bool,
    pub(crate) mode: ScopeMode,
}

#[derive(Debug, Default)]
pub(crate) struct ScopeSlot {
    pub(crate) scope: Option<ActiveScope>,
    retired: bool,
}

/// Exclusive access to one token's slot.
pub(crate) struct SlotGuard {
    token: TransactionToken,
    slot: Arc<Mutex<ScopeSlot>>,
    guard: OwnedMutexGuard<ScopeSlot>,
}

impl SlotGuard {
    pub(crate) fn token(&self) -> TransactionToken {
        self.token
    }

    pub(crate) fn scope(&self) -> Option<&ActiveScope> {
        self.guard.scope.as_ref()
    }

    pub(crate) fn scope_mut(&mut self) -> Option<&mut ActiveScope> {
        self.guard.scope.as_mut()
    }

    pub(crate) fn install(&mut self, scope: ActiveScope) {
        debug_assert!(self.guard.scope.is_none());
        self.guard.scope = Some(scope);
    }
}

/// Result of a non-blocking slot lock.
pub(crate) enum SlotAttempt {
    /// No live slot for the token.
    Vacant,
    Locked(SlotGuard),
    /// Another task holds the slot.
    Contended,
}

/// Concurrent mapping from transaction token to its open scope.
#[derive(Debug, Default)]
pub struct TransactionRegistry {
    slots: DashMap<TransactionToken, Arc<Mutex<ScopeSlot>>>,
}

impl TransactionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks the slot for `token`, creating it if absent.
    pub(crate) async fn lock_or_create(&self, token: TransactionToken) -> SlotGuard {
        loop {
            let slot = Arc::clone(
                self.slots
                    .entry(token)
                    .or_insert_with(|| Arc::new(Mutex::new(ScopeSlot::default())))
                    .value(),
            );
            if let Some(guard) = Self::lock_live(token, slot).await {
                return guard;
            }
        }
    }

    /// Locks the slot for `token` if one exists.
    pub(crate) async fn lock_existing(&self, token: TransactionToken) -> Option<SlotGuard> {
        loop {
            let slot = Arc::clone(self.slots.get(&token)?.value());
            if let Some(guard) = Self::lock_live(token, slot).await {
                return Some(guard);
            }
        }
    }

    /// Locks the slot for `token` without waiting, for use from `Drop`.
    pub(crate) fn try_lock_existing(&self, token: TransactionToken) -> SlotAttempt {
        let Some(slot) = self.slots.get(&token).map(|s| Arc::clone(s.value())) else {
            return SlotAttempt::Vacant;
        };
        let attempt = Arc::clone(&slot).try_lock_owned();
        match attempt {
            Ok(guard) if guard.retired => SlotAttempt::Vacant,
            Ok(guard) => SlotAttempt::Locked(SlotGuard { token, slot, guard }),
            Err(_) => SlotAttempt::Contended,
        }
    }

    async fn lock_live(token: TransactionToken, slot: Arc<Mutex<ScopeSlot>>) -> Option<SlotGuard> {
        let guard = Arc::clone(&slot).lock_owned().await;
        if guard.retired {
            return None;
        }
        Some(SlotGuard { token, slot, guard })
    }

    /// Takes the scope out of the slot, retires the slot, and unmaps it.
    pub(crate) fn retire(&self, mut guard: SlotGuard) -> Option<ActiveScope> {
        let scope = guard.guard.scope.take();
        guard.guard.retired = true;
        let slot = Arc::clone(&guard.slot);
        self.slots
            .remove_if(&guard.token, |_, current| Arc::ptr_eq(current, &slot));
        scope
    }

    /// Returns `true` if `token` currently has an open scope.
    ///
    /// Non-blocking: a slot locked by an in-progress transition counts as open.
    #[must_use]
    pub fn is_open(&self, token: TransactionToken) -> bool {
        let Some(slot) = self.slots.get(&token).map(|s| Arc::clone(s.value())) else {
            return false;
        };
        let open = match slot.try_lock() {
            Ok(guard) => guard.scope.is_some(),
            Err(_) => true,
        };
        open
    }

    /// Number of tokens with a slot (open or mid-transition).
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns `true` if no token has a slot.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
