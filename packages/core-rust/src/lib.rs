//! `unitscope` core: request context, transaction tokens, and shared value types.

pub mod context;
pub mod token;
pub mod types;

pub use context::{Identity, RequestContext};
pub use token::TransactionToken;
pub use types::{Principal, Value};

#[cfg(test)]
mod tests {
    #[test]
    fn crate_loads() {
        // Empty body: if this test runs, the crate compiles and loads.
    }
}
