//! Work voxels: spatial rebucketing of cells for donor search
//!
//! A voxel owns its node table: incoming transfer nodes are deduplicated by
//! global id and renumbered to voxel-local ids, and incoming cells are
//! rewritten against the new numbering. Re-adding a global id hands back
//! the existing local id.

use crate::transfer::{TransferCell, TransferNode, VoxelFragment};
use chimera_mesh::Extent;
use std::collections::HashMap;

pub struct WorkVoxel {
    pub extent: Extent,
    pub global_to_local: HashMap<i64, i32>,
    pub nodes: Vec<TransferNode>,
    pub tets: Vec<TransferCell<4>>,
    pub pyramids: Vec<TransferCell<5>>,
    pub prisms: Vec<TransferCell<6>>,
    pub hexes: Vec<TransferCell<8>>,
}

impl WorkVoxel {
    pub fn new(extent: Extent) -> Self {
        Self {
            extent,
            global_to_local: HashMap::new(),
            nodes: Vec::new(),
            tets: Vec::new(),
            pyramids: Vec::new(),
            prisms: Vec::new(),
            hexes: Vec::new(),
        }
    }

    /// Add nodes, deduplicating by global id; returns the voxel-local id of
    /// each input node, in input order.
    pub fn add_nodes(&mut self, more_nodes: &[TransferNode]) -> Vec<i32> {
        let mut new_local_ids = Vec::with_capacity(more_nodes.len());
        for node in more_nodes {
            let local = match self.global_to_local.get(&node.gid) {
                Some(&existing) => existing,
                None => {
                    let local = self.nodes.len() as i32;
                    self.global_to_local.insert(node.gid, local);
                    self.nodes.push(*node);
                    local
                }
            };
            new_local_ids.push(local);
        }
        new_local_ids
    }

    fn add_cells<const N: usize>(
        target: &mut Vec<TransferCell<N>>,
        more: &[TransferCell<N>],
        new_local_ids: &[i32],
    ) {
        for cell in more {
            let mut rewritten = *cell;
            for slot in &mut rewritten.nodes {
                *slot = new_local_ids[*slot as usize];
            }
            target.push(rewritten);
        }
    }

    pub fn add_tets(&mut self, more: &[TransferCell<4>], new_local_ids: &[i32]) {
        Self::add_cells(&mut self.tets, more, new_local_ids);
    }

    pub fn add_pyramids(&mut self, more: &[TransferCell<5>], new_local_ids: &[i32]) {
        Self::add_cells(&mut self.pyramids, more, new_local_ids);
    }

    pub fn add_prisms(&mut self, more: &[TransferCell<6>], new_local_ids: &[i32]) {
        Self::add_cells(&mut self.prisms, more, new_local_ids);
    }

    pub fn add_hexes(&mut self, more: &[TransferCell<8>], new_local_ids: &[i32]) {
        Self::add_cells(&mut self.hexes, more, new_local_ids);
    }

    /// Absorb a whole fragment.
    pub fn add_fragment(&mut self, fragment: &VoxelFragment) {
        let new_local_ids = self.add_nodes(&fragment.nodes);
        self.add_tets(&fragment.tets, &new_local_ids);
        self.add_pyramids(&fragment.pyramids, &new_local_ids);
        self.add_prisms(&fragment.prisms, &new_local_ids);
        self.add_hexes(&fragment.hexes, &new_local_ids);
    }

    pub fn cell_count(&self) -> usize {
        self.tets.len() + self.pyramids.len() + self.prisms.len() + self.hexes.len()
    }

    /// Component grids represented in this voxel, ascending.
    pub fn component_ids(&self) -> Vec<i32> {
        let mut ids: Vec<i32> = self.nodes.iter().map(|n| n.component).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}
