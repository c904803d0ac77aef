//! Transfer nodes and cells: the payload of voxel fragment exchange

use crate::error::{OversetError, Result};
use chimera_comm::Message;
use chimera_mesh::{CellKind, Extent, Mesh, Point};
use std::collections::HashMap;

/// A node shipped into a work voxel.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TransferNode {
    pub gid: i64,
    pub xyz: Point,
    pub wall_distance: f64,
    pub component: i32,
    pub owner: i32,
}

impl TransferNode {
    pub fn new(gid: i64, xyz: Point, wall_distance: f64, component: i32, owner: i32) -> Self {
        Self {
            gid,
            xyz,
            wall_distance,
            component,
            owner,
        }
    }

    pub fn pack(&self, msg: &mut Message) {
        msg.pack(self.gid);
        msg.pack(self.xyz);
        msg.pack(self.wall_distance);
        msg.pack(self.component);
        msg.pack(self.owner);
    }

    pub fn unpack(msg: &mut Message) -> chimera_comm::Result<TransferNode> {
        Ok(TransferNode {
            gid: msg.unpack::<i64>()?,
            xyz: msg.unpack::<Point>()?,
            wall_distance: msg.unpack::<f64>()?,
            component: msg.unpack::<i32>()?,
            owner: msg.unpack::<i32>()?,
        })
    }
}

/// A volume cell shipped into a work voxel; node ids index the carrying
/// fragment's (and later the voxel's) node table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransferCell<const N: usize> {
    pub nodes: [i32; N],
    pub cell_gid: i64,
    pub owner: i32,
}

impl<const N: usize> TransferCell<N> {
    pub fn new(nodes: [i32; N], cell_gid: i64, owner: i32) -> Self {
        Self {
            nodes,
            cell_gid,
            owner,
        }
    }

    pub fn pack(&self, msg: &mut Message) {
        msg.pack(self.nodes);
        msg.pack(self.cell_gid);
        msg.pack(self.owner);
    }

    pub fn unpack(msg: &mut Message) -> chimera_comm::Result<TransferCell<N>> {
        Ok(TransferCell {
            nodes: msg.unpack::<[i32; N]>()?,
            cell_gid: msg.unpack::<i64>()?,
            owner: msg.unpack::<i32>()?,
        })
    }
}

/// The cells one rank contributes to one work voxel, with the nodes they
/// reference, split by corner count.
#[derive(Clone, Debug, Default)]
pub struct VoxelFragment {
    pub nodes: Vec<TransferNode>,
    pub tets: Vec<TransferCell<4>>,
    pub pyramids: Vec<TransferCell<5>>,
    pub prisms: Vec<TransferCell<6>>,
    pub hexes: Vec<TransferCell<8>>,
}

impl VoxelFragment {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn cell_count(&self) -> usize {
        self.tets.len() + self.pyramids.len() + self.prisms.len() + self.hexes.len()
    }

    /// Extract the cells of `mesh` owned by this rank whose extents overlap
    /// `box_extent`. Higher-order cells contribute their corner vertices.
    pub fn extract(
        mesh: &Mesh,
        box_extent: &Extent,
        components: &[i32],
        wall_distance: &[f64],
    ) -> Result<VoxelFragment> {
        if components.len() != mesh.node_count() || wall_distance.len() != mesh.node_count() {
            return Err(OversetError::Configuration(format!(
                "component/wall-distance fields sized {}/{} for {} nodes",
                components.len(),
                wall_distance.len(),
                mesh.node_count()
            )));
        }
        let mut fragment = VoxelFragment::default();
        let mut slot_of: HashMap<i64, i32> = HashMap::new();

        for (&kind, block) in &mesh.cells {
            if !kind.is_volume() {
                continue;
            }
            let corners = kind.corner_count();
            for index in 0..block.count() {
                if block.owners[index] != mesh.partition {
                    continue;
                }
                if !mesh.cell_extent(kind, index).overlaps(box_extent) {
                    continue;
                }
                let cell_nodes = mesh.cell_nodes(kind, index);
                let mut local = [0i32; 8];
                for (k, &node) in cell_nodes[..corners].iter().enumerate() {
                    let node = node as usize;
                    let gid = mesh.node_gids[node];
                    let slot = *slot_of.entry(gid).or_insert_with(|| {
                        fragment.nodes.push(TransferNode::new(
                            gid,
                            mesh.points[node],
                            wall_distance[node],
                            components[node],
                            mesh.node_owners[node],
                        ));
                        (fragment.nodes.len() - 1) as i32
                    });
                    local[k] = slot;
                }
                let gid = block.gids[index];
                let owner = block.owners[index];
                match corners {
                    4 => fragment
                        .tets
                        .push(TransferCell::new([local[0], local[1], local[2], local[3]], gid, owner)),
                    5 => fragment.pyramids.push(TransferCell::new(
                        [local[0], local[1], local[2], local[3], local[4]],
                        gid,
                        owner,
                    )),
                    6 => fragment.prisms.push(TransferCell::new(
                        [local[0], local[1], local[2], local[3], local[4], local[5]],
                        gid,
                        owner,
                    )),
                    8 => fragment.hexes.push(TransferCell::new(
                        [
                            local[0], local[1], local[2], local[3], local[4], local[5], local[6],
                            local[7],
                        ],
                        gid,
                        owner,
                    )),
                    other => {
                        return Err(OversetError::Invariant(format!(
                            "volume cell with {other} corners"
                        )))
                    }
                }
            }
        }
        Ok(fragment)
    }

    pub fn pack(&self, msg: &mut Message) -> chimera_comm::Result<()> {
        msg.pack_seq_with(&self.nodes, |m, n| n.pack(m))?;
        msg.pack_seq_with(&self.tets, |m, c| c.pack(m))?;
        msg.pack_seq_with(&self.pyramids, |m, c| c.pack(m))?;
        msg.pack_seq_with(&self.prisms, |m, c| c.pack(m))?;
        msg.pack_seq_with(&self.hexes, |m, c| c.pack(m))
    }

    pub fn unpack(msg: &mut Message) -> chimera_comm::Result<VoxelFragment> {
        Ok(VoxelFragment {
            nodes: msg.unpack_seq_with(TransferNode::unpack)?,
            tets: msg.unpack_seq_with(TransferCell::<4>::unpack)?,
            pyramids: msg.unpack_seq_with(TransferCell::<5>::unpack)?,
            prisms: msg.unpack_seq_with(TransferCell::<6>::unpack)?,
            hexes: msg.unpack_seq_with(TransferCell::<8>::unpack)?,
        })
    }
}
