use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque identifier correlating a [`RequestContext`](crate::RequestContext)
/// with the transaction handle registered for it.
///
/// Tokens carry no meaning beyond identity. Two contexts holding equal tokens
/// belong to the same unit of work and share one transaction scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransactionToken(Uuid);

impl TransactionToken {
    /// Generates a fresh random token.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TransactionToken {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for TransactionToken {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl fmt::Display for TransactionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form keeps log lines readable; collisions in the prefix are harmless.
        let simple = self.0.simple().to_string();
        f.write_str(&simple[..12])
    }
}
