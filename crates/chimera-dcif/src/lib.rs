//! chimera-dcif: the Domain-Connectivity Interchange Format
//!
//! Binary codec for the assembled overset result (fringe ids, donor
//! stencils, blanking array, component-grid directory), consistency and
//! linear-reconstruction checking, receptor redistribution, and the
//! partition-vector file format.

pub mod checker;
pub mod codec;
pub mod distribute;
pub mod error;
pub mod flattened;
pub mod gather;
pub mod partvec;
pub mod topology;

pub use checker::{linear_field, InterpolationError, LINEAR_TOLERANCE, WEIGHT_SUM_TOLERANCE};
pub use codec::{read, write, MAX_REASONABLE_COUNT};
pub use distribute::{exchange_receptors, map_receptors_to_ranks, receptors_in_range};
pub use error::{DcifError, Result};
pub use flattened::{DcifReceptor, FlattenedDomainConnectivity, GridRange};
pub use gather::gather_connectivity;
pub use partvec::PartVectorIo;
pub use topology::Topology;
