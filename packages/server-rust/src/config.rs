//! Configuration for the transaction scope subsystem.

use serde::Deserialize;

/// Operation timeout used when neither the operation nor the config sets one.
pub const DEFAULT_OPERATION_TIMEOUT_MS: u64 = 30_000;

/// Output format for the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable multi-field lines.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

/// Top-level configuration.
///
/// Every field has a default, so partial documents deserialize cleanly.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ScopeConfig {
    /// Connection pool settings.
    pub pool: PoolConfig,
    /// Timeout applied to operations that do not carry their own, in milliseconds.
    pub default_operation_timeout_ms: u64,
    /// Log output format.
    pub log_format: LogFormat,
}

impl Default for ScopeConfig {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            default_operation_timeout_ms: DEFAULT_OPERATION_TIMEOUT_MS,
            log_format: LogFormat::Pretty,
        }
    }
}

/// Connection pool settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum number of connections checked out at once.
    pub max_connections: u32,
    /// How long `acquire` waits for a free connection, in milliseconds.
    pub acquire_timeout_ms: u64,
    /// Simulated per-statement latency of the in-memory backend, in milliseconds.
    /// Zero still yields to the scheduler once per statement.
    pub statement_latency_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            acquire_timeout_ms: 5_000,
            statement_latency_ms: 0,
        }
    }
}
