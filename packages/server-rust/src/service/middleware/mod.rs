//! Tower middleware layers for the operation pipeline.
//!
//! - [`metrics`]: Operation timing and counting
//! - [`transaction`]: Per-operation transaction scope
//! - [`timeout`]: Per-operation timeout enforcement
//! - [`pipeline`]: Composes all layers into a single service stack

pub mod metrics;
pub mod pipeline;
pub mod timeout;
pub mod transaction;

pub use metrics::MetricsLayer;
pub use pipeline::build_operation_pipeline;
pub use timeout::TimeoutLayer;
pub use transaction::TransactionLayer;
