//! Donor search inside a work voxel
//!
//! One spatial tree per component grid present in the voxel, over a single
//! linear cell index space (tets, then pyramids, prisms, hexes). A query
//! node only probes trees of other components; every bounding-box hit is
//! containment-tested before weights are computed.

use crate::adt::Adt;
use crate::interpolation::{cell_contains, least_squares_weights};
use crate::receptor::{CandidateDonor, Receptor};
use crate::voxel::WorkVoxel;
use chimera_mesh::{Extent, Point};

pub struct AdtDonorFinder<'v> {
    voxel: &'v WorkVoxel,
    component_ids: Vec<i32>,
    trees: Vec<Adt>,
}

impl<'v> AdtDonorFinder<'v> {
    pub fn new(voxel: &'v WorkVoxel) -> Self {
        let component_ids = voxel.component_ids();
        let mut per_component: Vec<Vec<(usize, Extent)>> =
            vec![Vec::new(); component_ids.len()];
        for cell in 0..voxel.cell_count() {
            let component = cell_component(voxel, cell);
            if let Ok(slot) = component_ids.binary_search(&component) {
                let mut bounds = Extent::empty();
                for &node in cell_nodes(voxel, cell) {
                    bounds.add_point(&voxel.nodes[node as usize].xyz);
                }
                per_component[slot].push((cell, bounds));
            }
        }
        let trees = per_component.into_iter().map(Adt::build).collect();
        Self {
            voxel,
            component_ids,
            trees,
        }
    }

    /// Candidate donors for a point of the given component, in tree-scan
    /// order.
    pub fn find_donors(&self, p: &Point, component: i32) -> Vec<CandidateDonor> {
        let mut candidates = Vec::new();
        let probe = Extent::from_point(*p);
        for (slot, tree) in self.trees.iter().enumerate() {
            if self.component_ids[slot] == component {
                continue;
            }
            for cell in tree.retrieve(&probe) {
                let cell_component = cell_component(self.voxel, cell);
                if cell_component == component {
                    continue;
                }
                let locals = cell_nodes(self.voxel, cell);
                let xyz: Vec<Point> = locals
                    .iter()
                    .map(|&l| self.voxel.nodes[l as usize].xyz)
                    .collect();
                if !cell_contains(&xyz, p) {
                    continue;
                }
                let weights = least_squares_weights(&xyz, p);
                let distance = locals
                    .iter()
                    .zip(&weights)
                    .map(|(&l, w)| w * self.voxel.nodes[l as usize].wall_distance)
                    .sum();
                let (gid, owner) = cell_identity(self.voxel, cell);
                candidates.push(CandidateDonor {
                    component: cell_component,
                    cell_gid: gid,
                    cell_owner: owner,
                    valid: true,
                    distance,
                    corners: locals.len() as u8,
                    donor_node_gids: locals
                        .iter()
                        .map(|&l| self.voxel.nodes[l as usize].gid)
                        .collect(),
                    weights,
                });
            }
        }
        candidates
    }
}

fn cell_nodes(voxel: &WorkVoxel, cell: usize) -> &[i32] {
    let mut id = cell;
    if id < voxel.tets.len() {
        return &voxel.tets[id].nodes;
    }
    id -= voxel.tets.len();
    if id < voxel.pyramids.len() {
        return &voxel.pyramids[id].nodes;
    }
    id -= voxel.pyramids.len();
    if id < voxel.prisms.len() {
        return &voxel.prisms[id].nodes;
    }
    id -= voxel.prisms.len();
    &voxel.hexes[id].nodes
}

fn cell_identity(voxel: &WorkVoxel, cell: usize) -> (i64, i32) {
    let mut id = cell;
    if id < voxel.tets.len() {
        let c = &voxel.tets[id];
        return (c.cell_gid, c.owner);
    }
    id -= voxel.tets.len();
    if id < voxel.pyramids.len() {
        let c = &voxel.pyramids[id];
        return (c.cell_gid, c.owner);
    }
    id -= voxel.pyramids.len();
    if id < voxel.prisms.len() {
        let c = &voxel.prisms[id];
        return (c.cell_gid, c.owner);
    }
    id -= voxel.prisms.len();
    let c = &voxel.hexes[id];
    (c.cell_gid, c.owner)
}

/// A cell's component is the component of its first node.
fn cell_component(voxel: &WorkVoxel, cell: usize) -> i32 {
    let first = cell_nodes(voxel, cell)[0];
    voxel.nodes[first as usize].component
}

/// Run the donor search for every eligible node of the voxel and emit a
/// receptor per node with a non-empty candidate list. Nodes outside the
/// voxel extent are skipped, as are nodes the caller's filter rejects
/// (voxel-face ownership).
pub fn find_candidate_receptors(
    voxel: &WorkVoxel,
    process_node: &dyn Fn(&Point) -> bool,
) -> Vec<Receptor> {
    let finder = AdtDonorFinder::new(voxel);
    let mut receptors = Vec::new();
    for node in &voxel.nodes {
        if !voxel.extent.contains(&node.xyz) || !process_node(&node.xyz) {
            continue;
        }
        let candidates = finder.find_donors(&node.xyz, node.component);
        if !candidates.is_empty() {
            receptors.push(Receptor {
                gid: node.gid,
                owner: node.owner,
                distance: node.wall_distance,
                candidates,
            });
        }
    }
    receptors
}
