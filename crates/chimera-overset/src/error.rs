//! Error types for chimera-overset

use thiserror::Error;

pub type Result<T> = std::result::Result<T, OversetError>;

#[derive(Debug, Error)]
pub enum OversetError {
    #[error(transparent)]
    Comm(#[from] chimera_comm::CommError),

    #[error(transparent)]
    Mesh(#[from] chimera_mesh::MeshError),

    #[error(transparent)]
    Net(#[from] chimera_net::NetError),

    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("configuration: {0}")]
    Configuration(String),
}
