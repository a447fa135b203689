//! Error types for the near-cache layer
//!
//! Provides unified error handling using thiserror.

use thiserror::Error;

// == Near Map Error Enum ==
/// Unified error type for the near-cache layer.
#[derive(Error, Debug)]
pub enum NearMapError {
    /// The remote store rejected or failed an operation
    #[error("store error: {0}")]
    Store(String),

    /// The messaging bus rejected or failed an operation
    #[error("bus error: {0}")]
    Bus(String),

    /// A key or value could not be encoded/decoded
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// A counter operation overflowed the value range
    #[error("counter overflow")]
    Overflow,

    /// The map instance has been shut down
    #[error("map is shut down")]
    Shutdown,
}

// == Result Type Alias ==
/// Convenience Result type for the near-cache layer.
pub type Result<T> = std::result::Result<T, NearMapError>;
