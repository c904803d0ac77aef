//! Distributed mesh model: owned and ghost nodes/cells with global ids
//!
//! Cells are stored as one block of parallel arrays per kind; a linear cell
//! id concatenates the kinds in `CellKind` order. Cross-rank identity is
//! always the global id; local ids are indices into this mesh object only.

use crate::error::{MeshError, Result};
use crate::geom::{Extent, Point};
use std::collections::{BTreeMap, HashMap};

/// Rank marker for an entity whose owner is not yet known.
pub const UNKNOWN_OWNER: i32 = -1;

/// Element kinds: the linear zoo plus their quadratic elevations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum CellKind {
    Node = 0,
    Bar2 = 1,
    Tri3 = 2,
    Quad4 = 3,
    Tetra4 = 4,
    Pyramid5 = 5,
    Prism6 = 6,
    Hex8 = 7,
    Bar3 = 8,
    Tri6 = 9,
    Quad8 = 10,
    Tetra10 = 11,
    Pyramid13 = 12,
    Prism15 = 13,
    Hex20 = 14,
}

impl CellKind {
    pub const ALL: [CellKind; 15] = [
        CellKind::Node,
        CellKind::Bar2,
        CellKind::Tri3,
        CellKind::Quad4,
        CellKind::Tetra4,
        CellKind::Pyramid5,
        CellKind::Prism6,
        CellKind::Hex8,
        CellKind::Bar3,
        CellKind::Tri6,
        CellKind::Quad8,
        CellKind::Tetra10,
        CellKind::Pyramid13,
        CellKind::Prism15,
        CellKind::Hex20,
    ];

    pub fn node_count(self) -> usize {
        match self {
            CellKind::Node => 1,
            CellKind::Bar2 => 2,
            CellKind::Tri3 | CellKind::Bar3 => 3,
            CellKind::Quad4 | CellKind::Tetra4 => 4,
            CellKind::Pyramid5 => 5,
            CellKind::Prism6 | CellKind::Tri6 => 6,
            CellKind::Hex8 | CellKind::Quad8 => 8,
            CellKind::Tetra10 => 10,
            CellKind::Pyramid13 => 13,
            CellKind::Prism15 => 15,
            CellKind::Hex20 => 20,
        }
    }

    /// Corner vertices of the underlying linear shape; quadratic kinds share
    /// the corners of their linear parents.
    pub fn corner_count(self) -> usize {
        match self {
            CellKind::Tetra4 | CellKind::Tetra10 => 4,
            CellKind::Pyramid5 | CellKind::Pyramid13 => 5,
            CellKind::Prism6 | CellKind::Prism15 => 6,
            CellKind::Hex8 | CellKind::Hex20 => 8,
            other => other.node_count(),
        }
    }

    pub fn is_volume(self) -> bool {
        matches!(
            self,
            CellKind::Tetra4
                | CellKind::Pyramid5
                | CellKind::Prism6
                | CellKind::Hex8
                | CellKind::Tetra10
                | CellKind::Pyramid13
                | CellKind::Prism15
                | CellKind::Hex20
        )
    }

    pub fn is_surface(self) -> bool {
        matches!(
            self,
            CellKind::Tri3 | CellKind::Quad4 | CellKind::Tri6 | CellKind::Quad8
        )
    }
}

impl TryFrom<u8> for CellKind {
    type Error = MeshError;

    fn try_from(value: u8) -> Result<Self> {
        CellKind::ALL
            .into_iter()
            .find(|k| *k as u8 == value)
            .ok_or_else(|| MeshError::Invariant(format!("unknown cell kind tag {value}")))
    }
}

/// Parallel arrays for all cells of one kind.
#[derive(Clone, Debug, Default)]
pub struct CellBlock {
    pub connectivity: Vec<i32>,
    pub gids: Vec<i64>,
    pub owners: Vec<i32>,
    pub tags: Vec<i32>,
}

impl CellBlock {
    pub fn count(&self) -> usize {
        self.gids.len()
    }
}

/// One rank's portion of a distributed mesh.
#[derive(Clone, Debug, Default)]
pub struct Mesh {
    pub points: Vec<Point>,
    pub node_gids: Vec<i64>,
    pub node_owners: Vec<i32>,
    pub cells: BTreeMap<CellKind, CellBlock>,
    /// This rank's index in the owning group.
    pub partition: i32,
}

impl Mesh {
    pub fn new(partition: i32) -> Self {
        Self {
            partition,
            ..Self::default()
        }
    }

    pub fn node_count(&self) -> usize {
        self.points.len()
    }

    pub fn cell_count(&self) -> usize {
        self.cells.values().map(CellBlock::count).sum()
    }

    pub fn owned_node(&self, node: usize) -> bool {
        self.node_owners[node] == self.partition
    }

    pub fn owned_node_count(&self) -> usize {
        self.node_owners
            .iter()
            .filter(|&&o| o == self.partition)
            .count()
    }

    pub fn add_node(&mut self, gid: i64, xyz: Point, owner: i32) -> usize {
        self.points.push(xyz);
        self.node_gids.push(gid);
        self.node_owners.push(owner);
        self.points.len() - 1
    }

    pub fn add_cell(
        &mut self,
        kind: CellKind,
        gid: i64,
        owner: i32,
        tag: i32,
        nodes: &[i32],
    ) -> Result<()> {
        if nodes.len() != kind.node_count() {
            return Err(MeshError::Configuration(format!(
                "{kind:?} cell {gid} supplied {} nodes, needs {}",
                nodes.len(),
                kind.node_count()
            )));
        }
        let block = self.cells.entry(kind).or_default();
        block.connectivity.extend_from_slice(nodes);
        block.gids.push(gid);
        block.owners.push(owner);
        block.tags.push(tag);
        Ok(())
    }

    pub fn block(&self, kind: CellKind) -> Option<&CellBlock> {
        self.cells.get(&kind)
    }

    pub fn cell_nodes(&self, kind: CellKind, index: usize) -> &[i32] {
        let n = kind.node_count();
        let block = &self.cells[&kind];
        &block.connectivity[n * index..n * (index + 1)]
    }

    /// Map a linear cell id to its (kind, index-in-kind) pair.
    pub fn kind_and_index(&self, cell: usize) -> Result<(CellKind, usize)> {
        let mut remaining = cell;
        for (&kind, block) in &self.cells {
            if remaining < block.count() {
                return Ok((kind, remaining));
            }
            remaining -= block.count();
        }
        Err(MeshError::NotFound(format!(
            "cell id {cell} outside the {} resident cells",
            self.cell_count()
        )))
    }

    /// The linear cell id of a (kind, index-in-kind) pair.
    pub fn linear_cell_id(&self, kind: CellKind, index: usize) -> usize {
        let mut offset = 0;
        for (&k, block) in &self.cells {
            if k == kind {
                break;
            }
            offset += block.count();
        }
        offset + index
    }

    pub fn cell_gid(&self, kind: CellKind, index: usize) -> i64 {
        self.cells[&kind].gids[index]
    }

    pub fn cell_owner(&self, kind: CellKind, index: usize) -> i32 {
        self.cells[&kind].owners[index]
    }

    pub fn owned_cell(&self, kind: CellKind, index: usize) -> bool {
        self.cell_owner(kind, index) == self.partition
    }

    pub fn build_node_g2l(&self) -> HashMap<i64, usize> {
        self.node_gids
            .iter()
            .enumerate()
            .map(|(l, &g)| (g, l))
            .collect()
    }

    pub fn build_cell_g2l(&self) -> HashMap<i64, usize> {
        let mut map = HashMap::new();
        let mut linear = 0;
        for block in self.cells.values() {
            for &gid in &block.gids {
                map.insert(gid, linear);
                linear += 1;
            }
        }
        map
    }

    /// Cells (linear ids) incident to each node.
    pub fn node_to_cell(&self) -> Vec<Vec<usize>> {
        let mut n2c = vec![Vec::new(); self.node_count()];
        let mut linear = 0;
        for (&kind, block) in &self.cells {
            let n = kind.node_count();
            for index in 0..block.count() {
                for &node in &block.connectivity[n * index..n * (index + 1)] {
                    n2c[node as usize].push(linear);
                }
                linear += 1;
            }
        }
        n2c
    }

    pub fn cell_extent(&self, kind: CellKind, index: usize) -> Extent {
        let mut extent = Extent::empty();
        for &node in self.cell_nodes(kind, index) {
            extent.add_point(&self.points[node as usize]);
        }
        extent
    }

    pub fn cell_centroid(&self, kind: CellKind, index: usize) -> Point {
        let nodes = self.cell_nodes(kind, index);
        let mut centroid = [0.0; 3];
        for &node in nodes {
            let p = self.points[node as usize];
            for i in 0..3 {
                centroid[i] += p[i];
            }
        }
        for c in &mut centroid {
            *c /= nodes.len() as f64;
        }
        centroid
    }

    pub fn owned_node_gids(&self) -> Vec<i64> {
        (0..self.node_count())
            .filter(|&n| self.owned_node(n))
            .map(|n| self.node_gids[n])
            .collect()
    }

    /// Global ids of resident nodes owned elsewhere.
    pub fn ghost_node_gids(&self) -> Vec<i64> {
        (0..self.node_count())
            .filter(|&n| !self.owned_node(n))
            .map(|n| self.node_gids[n])
            .collect()
    }

    /// Check the residency and ownership invariants; every referenced node
    /// must be resident and every owner must be a real rank.
    pub fn validate(&self, group_size: usize) -> Result<()> {
        for (node, &owner) in self.node_owners.iter().enumerate() {
            if owner < 0 || owner as usize >= group_size {
                return Err(MeshError::Invariant(format!(
                    "node {} (gid {}) owner is {owner}",
                    node, self.node_gids[node]
                )));
            }
        }
        for (&kind, block) in &self.cells {
            let n = kind.node_count();
            for (index, &owner) in block.owners.iter().enumerate() {
                if owner < 0 || owner as usize >= group_size {
                    return Err(MeshError::Invariant(format!(
                        "{kind:?} cell {} owner is {owner}",
                        block.gids[index]
                    )));
                }
                for &node in &block.connectivity[n * index..n * (index + 1)] {
                    if node < 0 || node as usize >= self.node_count() {
                        return Err(MeshError::Invariant(format!(
                            "{kind:?} cell {} references non-resident node {node}",
                            block.gids[index]
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}
