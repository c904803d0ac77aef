//! Error types for chimera-mesh

use thiserror::Error;

pub type Result<T> = std::result::Result<T, MeshError>;

#[derive(Debug, Error)]
pub enum MeshError {
    /// Failure in the communication layer
    #[error(transparent)]
    Comm(#[from] chimera_comm::CommError),

    /// Mesh invariant violated after processing
    #[error("invariant violated: {0}")]
    Invariant(String),

    /// A required id was missing from a map
    #[error("not found: {0}")]
    NotFound(String),

    /// Caller-supplied inputs disagree with the mesh
    #[error("configuration: {0}")]
    Configuration(String),
}
