//! Operation pipeline.
//!
//! 1. **Operation** (`operation`): the envelope every unit of work travels in
//! 2. **Middleware** (`middleware`): Tower layers (metrics, transaction, timeout)
//! 3. **Boundary** (`boundary`): runs the pipeline plus late consumers, then
//!    completes the operation

pub mod boundary;
pub mod middleware;
pub mod operation;

pub use boundary::drive_operation;
pub use middleware::build_operation_pipeline;
pub use operation::{Operation, OperationError};
