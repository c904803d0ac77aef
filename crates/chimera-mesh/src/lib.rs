//! chimera-mesh: distributed unstructured mesh infrastructure
//!
//! Owned and ghost node/cell storage with global-id identity, ghost-refresh
//! sync patterns, recursive-bisection repartitioning, and mesh migration by
//! node or cell part vectors.

pub mod bisection;
pub mod error;
pub mod fragment;
pub mod geom;
pub mod mesh;
pub mod shuffle;
pub mod sync;

pub use bisection::recursive_bisection;
pub use error::{MeshError, Result};
pub use fragment::{FragmentBuilder, FragmentCell, MeshAppender, MeshFragment};
pub use geom::{Extent, Point};
pub use mesh::{CellBlock, CellKind, Mesh, UNKNOWN_OWNER};
pub use shuffle::{
    extend_cell_support, extend_node_support, repartition_cells, repartition_nodes, shuffle_cells,
    shuffle_nodes,
};
pub use sync::{sync_field, SyncPattern};
