//! Core error types.

use thiserror::Error;

/// Errors reported by the game core.
///
/// Orchestration code wraps these with [`anyhow`] context; the core itself
/// only ever produces one of these three kinds.
#[derive(Debug, Error)]
pub enum Error {
    /// A parameter is outside its allowed range.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A distribution was reinforced before it was ever sampled.
    #[error("distribution was reinforced before any sample was drawn")]
    PrematureStateUse,

    /// A serialized state could not be decoded into a valid one.
    #[error("serialized state does not match the expected schema: {0}")]
    SerializationMismatch(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
