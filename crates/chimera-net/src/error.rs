//! Error types for chimera-net

use thiserror::Error;

pub type Result<T> = std::result::Result<T, NetError>;

#[derive(Debug, Error)]
pub enum NetError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Comm(#[from] chimera_comm::CommError),

    /// Missing callback at start, or traffic before the server exists
    #[error("configuration: {0}")]
    Configuration(String),

    #[error("frame of {0} bytes exceeds the frame size bound")]
    FrameTooLarge(u64),

    #[error("invariant violated: {0}")]
    Invariant(String),
}
