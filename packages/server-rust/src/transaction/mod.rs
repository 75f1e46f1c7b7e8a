//! Request-scoped transaction lifetime.
//!
//! - [`TransactionHandle`]: an acquired connection with an open transaction
//!   and its `Open -> Committed/RolledBack -> Released` state machine
//! - [`TransactionRegistry`]: concurrent token -> open scope map
//! - [`ScopeManager`]: enter/exit with shared nesting and poison-on-failure,
//!   plus the declarative wrapper, the manual API and handle resolution
//! - [`OperationGuard`]: the operation-complete hook that closes whatever
//!   scope the wrappers left open

pub mod completion;
pub mod declarative;
pub mod handle;
pub mod manager;
pub mod manual;
pub mod registry;
pub mod session;

pub use completion::OperationGuard;
pub use declarative::{transactional, BoxFuture};
pub use handle::{HandleState, TransactionHandle};
pub use manager::{ExitStatus, Outcome, ScopeManager};
pub use registry::{ScopeMode, TransactionRegistry};
pub use session::DbHandle;
