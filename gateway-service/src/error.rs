//! Store error taxonomy.

use thiserror::Error;

/// Failures raised by the registry and reading stores.
///
/// The validation variants carry the message shown verbatim to CLI callers.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0}")]
    InvalidField(String),
    #[error("{0}")]
    Conflict(String),
    #[error("node ID 0x{0:02x} not found in the database")]
    NodeNotFound(u8),
    #[error("sensor ID 0x{0:02x} not found in the database")]
    SensorNotFound(u8),
    #[error("database I/O failure: {0}")]
    Storage(#[from] rusqlite::Error),
}
