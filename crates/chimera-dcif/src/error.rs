//! Error types for chimera-dcif

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DcifError>;

#[derive(Debug, Error)]
pub enum DcifError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Comm(#[from] chimera_comm::CommError),

    /// Counts, ids, or weights disagree with each other
    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("configuration: {0}")]
    Configuration(String),
}
