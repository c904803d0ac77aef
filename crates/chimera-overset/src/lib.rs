//! chimera-overset: domain-connectivity assembly for overset grids
//!
//! Rebuckets distributed mesh cells into spatial work voxels, searches each
//! voxel for inter-grid donor cells, streams candidate receptors to their
//! owning ranks over the message router, and resolves the best donor per
//! receptor into a blanking array plus interpolation stencils.

pub mod adt;
pub mod assembler;
pub mod collector;
pub mod donor;
pub mod error;
pub mod interpolation;
pub mod receptor;
pub mod transfer;
pub mod voxel;

pub use adt::Adt;
pub use assembler::{
    assemble, AssemblyOptions, DomainConnectivity, VoxelPlan, FRAGMENT_MESSAGE, RECEPTORS_MESSAGE,
};
pub use collector::DonorCollector;
pub use donor::{find_candidate_receptors, AdtDonorFinder};
pub use error::{OversetError, Result};
pub use interpolation::{cell_contains, interpolate, least_squares_weights};
pub use receptor::{CandidateDonor, Receptor};
pub use transfer::{TransferCell, TransferNode, VoxelFragment};
pub use voxel::WorkVoxel;
