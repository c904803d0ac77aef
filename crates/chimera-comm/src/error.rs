//! Error types for chimera-comm

use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, CommError>;

/// Communication-layer error kinds
#[derive(Debug, Error)]
pub enum CommError {
    /// Underlying transport send/recv/collective failed
    #[error("transport failure: {0}")]
    Transport(String),

    /// Buffer read past the written length
    #[error("message read past end of data: {requested} bytes at offset {offset}, {available} written")]
    OutOfRange {
        offset: usize,
        requested: usize,
        available: usize,
    },

    /// A wider integer could not be narrowed to a 32-bit count
    #[error("value {0} does not fit in a 32-bit count")]
    Range(u64),

    /// Conflicting or incomplete setup
    #[error("configuration: {0}")]
    Configuration(String),

    /// Invariant violated after processing
    #[error("invariant violated: {0}")]
    Invariant(String),

    /// Payload of an in-flight send reclaimed more than once
    #[error("send payload already reclaimed")]
    UseAfterFree,

    /// Key missing in a required map
    #[error("not found: {0}")]
    NotFound(String),
}

/// Narrow a length to the 32-bit count the wire format carries.
pub fn narrow_to_i32(n: usize) -> Result<i32> {
    i32::try_from(n).map_err(|_| CommError::Range(n as u64))
}
