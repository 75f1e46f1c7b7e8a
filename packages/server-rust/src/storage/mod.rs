//! Storage abstraction consumed by the transaction layer.
//!
//! - [`Connection`] / [`ConnectionProvider`]: the raw session and pool traits
//! - [`MemoryPool`]: an in-process transactional backend implementing both

pub mod connection;
pub mod memory;

pub use connection::*;
pub use memory::*;
