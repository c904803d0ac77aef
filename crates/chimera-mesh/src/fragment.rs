//! Mesh fragments: the unit of cell migration between ranks
//!
//! A fragment carries whole cells with their node identities, coordinates,
//! and owners, keyed by global ids so the receiver can renumber into its own
//! local id space. The appender merges fragments, deduplicating nodes by
//! global id and cells by (kind, global id).

use crate::error::{MeshError, Result};
use crate::geom::Point;
use crate::mesh::{CellBlock, CellKind, Mesh, UNKNOWN_OWNER};
use chimera_comm::Message;
use std::collections::{HashMap, HashSet};

/// One cell traveling between ranks, nodes referenced by global id.
#[derive(Clone, Debug)]
pub struct FragmentCell {
    pub kind: CellKind,
    pub gid: i64,
    pub owner: i32,
    pub tag: i32,
    pub nodes: Vec<i64>,
}

/// A bundle of cells plus the node data they reference.
#[derive(Clone, Debug, Default)]
pub struct MeshFragment {
    pub node_gids: Vec<i64>,
    pub node_xyz: Vec<Point>,
    pub node_owners: Vec<i32>,
    pub cells: Vec<FragmentCell>,
}

impl MeshFragment {
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn pack(&self, msg: &mut Message) -> chimera_comm::Result<()> {
        msg.pack_slice(&self.node_gids)?;
        msg.pack_slice(&self.node_xyz)?;
        msg.pack_slice(&self.node_owners)?;
        msg.pack_seq_with(&self.cells, |m, cell| {
            m.pack(cell.kind as u8);
            m.pack(cell.gid);
            m.pack(cell.owner);
            m.pack(cell.tag);
            m.pack(cell.nodes.len() as i32);
            for &gid in &cell.nodes {
                m.pack(gid);
            }
        })
    }

    pub fn unpack(msg: &mut Message) -> Result<MeshFragment> {
        let node_gids = msg.unpack_vec::<i64>()?;
        let node_xyz = msg.unpack_vec::<Point>()?;
        let node_owners = msg.unpack_vec::<i32>()?;
        let cells = msg.unpack_seq_with(|m| {
            let kind = CellKind::try_from(m.unpack::<u8>()?)
                .map_err(|e| chimera_comm::CommError::Invariant(e.to_string()))?;
            Ok(FragmentCell {
                kind,
                gid: m.unpack::<i64>()?,
                owner: m.unpack::<i32>()?,
                tag: m.unpack::<i32>()?,
                nodes: m.unpack_vec::<i64>()?,
            })
        })?;
        if node_gids.len() != node_xyz.len() || node_gids.len() != node_owners.len() {
            return Err(MeshError::Invariant(
                "fragment node arrays disagree in length".into(),
            ));
        }
        Ok(MeshFragment {
            node_gids,
            node_xyz,
            node_owners,
            cells,
        })
    }
}

/// Builds a fragment from resident cells, deduplicating as it goes.
pub struct FragmentBuilder<'m> {
    mesh: &'m Mesh,
    node_slot: HashMap<i64, usize>,
    seen_cells: HashSet<(u8, i64)>,
    fragment: MeshFragment,
}

impl<'m> FragmentBuilder<'m> {
    pub fn new(mesh: &'m Mesh) -> Self {
        Self {
            mesh,
            node_slot: HashMap::new(),
            seen_cells: HashSet::new(),
            fragment: MeshFragment::default(),
        }
    }

    /// Add a resident cell; `cell_owner` is the owner the receiver should
    /// record and `node_owner_of` supplies the owner for each local node id.
    pub fn add_cell(
        &mut self,
        kind: CellKind,
        index: usize,
        cell_owner: i32,
        node_owner_of: &dyn Fn(usize) -> i32,
    ) {
        let gid = self.mesh.cell_gid(kind, index);
        if !self.seen_cells.insert((kind as u8, gid)) {
            return;
        }
        let mut node_gids = Vec::with_capacity(kind.node_count());
        for &node in self.mesh.cell_nodes(kind, index) {
            let node = node as usize;
            let node_gid = self.mesh.node_gids[node];
            node_gids.push(node_gid);
            if !self.node_slot.contains_key(&node_gid) {
                self.node_slot.insert(node_gid, self.fragment.node_gids.len());
                self.fragment.node_gids.push(node_gid);
                self.fragment.node_xyz.push(self.mesh.points[node]);
                self.fragment.node_owners.push(node_owner_of(node));
            }
        }
        self.fragment.cells.push(FragmentCell {
            kind,
            gid,
            owner: cell_owner,
            tag: self.mesh.cells[&kind].tags[index],
            nodes: node_gids,
        });
    }

    pub fn finish(self) -> MeshFragment {
        self.fragment
    }
}

/// Merges fragments into a new local mesh, deduplicating nodes by global id
/// and cells by (kind, global id). Owners merge by preferring a known rank
/// over `UNKNOWN_OWNER`.
pub struct MeshAppender {
    mesh: Mesh,
    node_slot: HashMap<i64, usize>,
    cell_slot: HashMap<(u8, i64), usize>,
}

impl MeshAppender {
    pub fn new(partition: i32) -> Self {
        Self {
            mesh: Mesh::new(partition),
            node_slot: HashMap::new(),
            cell_slot: HashMap::new(),
        }
    }

    /// Seed the appender with an existing mesh, for halo enlargement.
    pub fn from_mesh(mesh: &Mesh) -> Self {
        let mut appender = Self::new(mesh.partition);
        for (node, &gid) in mesh.node_gids.iter().enumerate() {
            appender.add_node(gid, mesh.points[node], mesh.node_owners[node]);
        }
        for (&kind, block) in &mesh.cells {
            let n = kind.node_count();
            for index in 0..block.count() {
                let nodes: Vec<i64> = block.connectivity[n * index..n * (index + 1)]
                    .iter()
                    .map(|&l| mesh.node_gids[l as usize])
                    .collect();
                appender
                    .add_cell_record(&FragmentCell {
                        kind,
                        gid: block.gids[index],
                        owner: block.owners[index],
                        tag: block.tags[index],
                        nodes,
                    })
                    .expect("a validated mesh re-appends cleanly");
            }
        }
        appender
    }

    fn add_node(&mut self, gid: i64, xyz: Point, owner: i32) -> usize {
        match self.node_slot.get(&gid) {
            Some(&slot) => {
                if self.mesh.node_owners[slot] == UNKNOWN_OWNER {
                    self.mesh.node_owners[slot] = owner;
                }
                slot
            }
            None => {
                let slot = self.mesh.add_node(gid, xyz, owner);
                self.node_slot.insert(gid, slot);
                slot
            }
        }
    }

    fn add_cell_record(&mut self, cell: &FragmentCell) -> Result<()> {
        let key = (cell.kind as u8, cell.gid);
        if let Some(&index) = self.cell_slot.get(&key) {
            // a later copy may know the owner the first one lacked
            if cell.owner != UNKNOWN_OWNER {
                if let Some(block) = self.mesh.cells.get_mut(&cell.kind) {
                    if block.owners[index] == UNKNOWN_OWNER {
                        block.owners[index] = cell.owner;
                    }
                }
            }
            return Ok(());
        }
        let mut locals = Vec::with_capacity(cell.nodes.len());
        for &gid in &cell.nodes {
            let slot = self.node_slot.get(&gid).ok_or_else(|| {
                MeshError::Invariant(format!(
                    "cell {} references node gid {gid} absent from its fragment",
                    cell.gid
                ))
            })?;
            locals.push(*slot as i32);
        }
        let index = self.mesh.cells.get(&cell.kind).map_or(0, CellBlock::count);
        self.mesh
            .add_cell(cell.kind, cell.gid, cell.owner, cell.tag, &locals)?;
        self.cell_slot.insert(key, index);
        Ok(())
    }

    pub fn add_fragment(&mut self, fragment: &MeshFragment) -> Result<()> {
        for (i, &gid) in fragment.node_gids.iter().enumerate() {
            self.add_node(gid, fragment.node_xyz[i], fragment.node_owners[i]);
        }
        for cell in &fragment.cells {
            self.add_cell_record(cell)?;
        }
        Ok(())
    }

    pub fn into_mesh(self) -> Mesh {
        self.mesh
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_tet_mesh() -> Mesh {
        let mut mesh = Mesh::new(0);
        for (gid, xyz) in [
            (0i64, [0.0, 0.0, 0.0]),
            (1, [1.0, 0.0, 0.0]),
            (2, [0.0, 1.0, 0.0]),
            (3, [0.0, 0.0, 1.0]),
            (4, [1.0, 1.0, 1.0]),
        ] {
            mesh.add_node(gid, xyz, 0);
        }
        mesh.add_cell(CellKind::Tetra4, 0, 0, 0, &[0, 1, 2, 3]).unwrap();
        mesh.add_cell(CellKind::Tetra4, 1, 0, 0, &[1, 2, 3, 4]).unwrap();
        mesh
    }

    #[test]
    fn test_builder_dedupes_shared_nodes() {
        let mesh = two_tet_mesh();
        let mut builder = FragmentBuilder::new(&mesh);
        builder.add_cell(CellKind::Tetra4, 0, 1, &|_| 1);
        builder.add_cell(CellKind::Tetra4, 1, 1, &|_| 1);
        builder.add_cell(CellKind::Tetra4, 0, 1, &|_| 1); // re-add is a no-op
        let fragment = builder.finish();
        assert_eq!(fragment.node_gids.len(), 5);
        assert_eq!(fragment.cells.len(), 2);
    }

    #[test]
    fn test_fragment_pack_unpack() {
        let mesh = two_tet_mesh();
        let mut builder = FragmentBuilder::new(&mesh);
        builder.add_cell(CellKind::Tetra4, 0, 2, &|n| if n == 0 { 2 } else { 0 });
        let fragment = builder.finish();

        let mut msg = Message::new();
        fragment.pack(&mut msg).unwrap();
        msg.finalize();
        let back = MeshFragment::unpack(&mut msg).unwrap();
        assert_eq!(back.node_gids, fragment.node_gids);
        assert_eq!(back.node_owners, fragment.node_owners);
        assert_eq!(back.cells.len(), 1);
        assert_eq!(back.cells[0].nodes, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_appender_merges_and_renumbers() {
        let mesh = two_tet_mesh();
        let mut builder_a = FragmentBuilder::new(&mesh);
        builder_a.add_cell(CellKind::Tetra4, 0, 0, &|_| 0);
        let mut builder_b = FragmentBuilder::new(&mesh);
        builder_b.add_cell(CellKind::Tetra4, 1, 0, &|_| 0);

        let mut appender = MeshAppender::new(0);
        appender.add_fragment(&builder_a.finish()).unwrap();
        appender.add_fragment(&builder_b.finish()).unwrap();
        let merged = appender.into_mesh();
        assert_eq!(merged.node_count(), 5);
        assert_eq!(merged.cell_count(), 2);
        merged.validate(1).unwrap();
    }

    #[test]
    fn test_appender_prefers_known_owner() {
        let mesh = two_tet_mesh();
        let mut unknown = FragmentBuilder::new(&mesh);
        unknown.add_cell(CellKind::Tetra4, 0, UNKNOWN_OWNER, &|_| UNKNOWN_OWNER);
        let mut known = FragmentBuilder::new(&mesh);
        known.add_cell(CellKind::Tetra4, 0, 3, &|_| 3);

        let mut appender = MeshAppender::new(3);
        appender.add_fragment(&unknown.finish()).unwrap();
        appender.add_fragment(&known.finish()).unwrap();
        let merged = appender.into_mesh();
        assert_eq!(merged.node_owners, vec![3, 3, 3, 3]);
        assert_eq!(merged.cells[&CellKind::Tetra4].owners, vec![3]);
    }
}
