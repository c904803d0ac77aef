//! Repartitioning and migration of distributed meshes

use crate::bisection::recursive_bisection;
use crate::error::{MeshError, Result};
use crate::fragment::{FragmentBuilder, MeshAppender, MeshFragment};
use crate::geom::Point;
use crate::mesh::{Mesh, UNKNOWN_OWNER};
use crate::sync::{sync_field, SyncPattern};
use chimera_comm::{Message, ProcessGroup};
use std::collections::BTreeMap;
use tracing::debug;

/// Balanced node partition by recursive bisection on owned node positions,
/// broadcast to ghosts through the node sync pattern.
pub fn repartition_nodes(
    group: &ProcessGroup,
    mesh: &Mesh,
    node_costs: &[f64],
) -> Result<Vec<i32>> {
    if node_costs.len() != mesh.node_count() {
        return Err(MeshError::Configuration(format!(
            "{} node costs for {} nodes",
            node_costs.len(),
            mesh.node_count()
        )));
    }
    let mut xyz = Vec::new();
    let mut weights = Vec::new();
    let mut owned_ids = Vec::new();
    for node in 0..mesh.node_count() {
        if mesh.owned_node(node) {
            xyz.push(mesh.points[node]);
            weights.push(node_costs[node]);
            owned_ids.push(node);
        }
    }
    let compact = recursive_bisection(group, &xyz, &weights, group.size(), 1.0e-4)?;

    let mut part = vec![0i32; mesh.node_count()];
    for (i, &node) in owned_ids.iter().enumerate() {
        part[node] = compact[i];
    }
    // ghosts learn their owner's assignment
    let pattern = SyncPattern::for_nodes(group, mesh)?;
    sync_field(group, &pattern, &mut part, 1)?;
    Ok(part)
}

/// Balanced cell partition on owned cell centroids; symmetric to the node
/// form.
pub fn repartition_cells(
    group: &ProcessGroup,
    mesh: &Mesh,
    cell_costs: &[f64],
) -> Result<Vec<i32>> {
    if cell_costs.len() != mesh.cell_count() {
        return Err(MeshError::Configuration(format!(
            "{} cell costs for {} cells",
            cell_costs.len(),
            mesh.cell_count()
        )));
    }
    let mut xyz: Vec<Point> = Vec::new();
    let mut weights = Vec::new();
    let mut owned_ids = Vec::new();
    let mut linear = 0;
    for (&kind, block) in &mesh.cells {
        for index in 0..block.count() {
            if block.owners[index] == mesh.partition {
                xyz.push(mesh.cell_centroid(kind, index));
                weights.push(cell_costs[linear]);
                owned_ids.push(linear);
            }
            linear += 1;
        }
    }
    let compact = recursive_bisection(group, &xyz, &weights, group.size(), 1.0e-4)?;

    let mut part = vec![0i32; mesh.cell_count()];
    for (i, &cell) in owned_ids.iter().enumerate() {
        part[cell] = compact[i];
    }
    let pattern = SyncPattern::for_cells(group, mesh)?;
    sync_field(group, &pattern, &mut part, 1)?;
    Ok(part)
}

/// Collective: every rank learns the aggregate verdict on the part vectors
/// before any rank enters the downstream exchanges, so one rank's bad
/// input fails the whole group instead of deadlocking it.
fn check_part_vector(group: &ProcessGroup, part: &[i32], expected_len: usize) -> Result<()> {
    let local_error = if part.len() != expected_len {
        Some(MeshError::Configuration(format!(
            "part vector has {} entries, mesh has {expected_len}",
            part.len()
        )))
    } else {
        part.iter()
            .find(|&&owner| owner < 0 || owner as usize >= group.size())
            .map(|owner| {
                MeshError::Invariant(format!("target owner {owner} outside the rank range"))
            })
    };
    let all_valid = group.parallel_and(local_error.is_none())?;
    if all_valid {
        return Ok(());
    }
    Err(local_error.unwrap_or_else(|| {
        MeshError::Invariant("a peer rank supplied an invalid part vector".into())
    }))
}

fn exchange_fragments(
    group: &ProcessGroup,
    builders: BTreeMap<usize, FragmentBuilder<'_>>,
) -> Result<Vec<MeshFragment>> {
    let mut messages = BTreeMap::new();
    for (rank, builder) in builders {
        let mut msg = Message::new();
        builder.finish().pack(&mut msg)?;
        messages.insert(rank, msg);
    }
    let incoming = group.exchange_messages(messages)?;
    let mut fragments = Vec::with_capacity(incoming.len());
    for (source, mut msg) in incoming {
        msg.finalize();
        let fragment = MeshFragment::unpack(&mut msg)?;
        debug!(
            source,
            cells = fragment.cells.len(),
            "received mesh fragment"
        );
        fragments.push(fragment);
    }
    Ok(fragments)
}

/// Move nodes to the ranks in `new_node_owners` (indexed by local node id;
/// ghost entries are refreshed internally). Cells follow their nodes: each
/// newly owning rank receives every cell incident to the nodes it gains,
/// and a cell's owner becomes the node-owner of its minimum-global-id node.
pub fn shuffle_nodes(group: &ProcessGroup, mesh: &Mesh, new_node_owners: &[i32]) -> Result<Mesh> {
    check_part_vector(group, new_node_owners, mesh.node_count())?;
    let mut part = new_node_owners.to_vec();
    let pattern = SyncPattern::for_nodes(group, mesh)?;
    sync_field(group, &pattern, &mut part, 1)?;

    let n2c = mesh.node_to_cell();
    let mut builders: BTreeMap<usize, FragmentBuilder> = BTreeMap::new();
    for node in 0..mesh.node_count() {
        if !mesh.owned_node(node) {
            continue;
        }
        let target = part[node] as usize;
        let builder = builders
            .entry(target)
            .or_insert_with(|| FragmentBuilder::new(mesh));
        for &cell in &n2c[node] {
            let (kind, index) = mesh.kind_and_index(cell)?;
            builder.add_cell(kind, index, UNKNOWN_OWNER, &|local| part[local]);
        }
    }

    let fragments = exchange_fragments(group, builders)?;
    let mut appender = MeshAppender::new(group.rank() as i32);
    for fragment in &fragments {
        appender.add_fragment(fragment)?;
    }
    let mut out = appender.into_mesh();
    infer_cell_owners_from_min_gid_node(&mut out)?;
    out.validate(group.size())?;
    Ok(out)
}

/// Move cells to the ranks in `new_cell_owners` (indexed by linear cell id);
/// each target also receives the node-neighbor cells so its stencils stay
/// complete. Node owners are re-derived as the lowest rank owning an
/// incident cell, settled through a directory exchange.
pub fn shuffle_cells(group: &ProcessGroup, mesh: &Mesh, new_cell_owners: &[i32]) -> Result<Mesh> {
    check_part_vector(group, new_cell_owners, mesh.cell_count())?;
    let mut part = new_cell_owners.to_vec();
    let pattern = SyncPattern::for_cells(group, mesh)?;
    sync_field(group, &pattern, &mut part, 1)?;

    let n2c = mesh.node_to_cell();
    let mut builders: BTreeMap<usize, FragmentBuilder> = BTreeMap::new();
    let mut linear = 0;
    for (&kind, block) in &mesh.cells {
        for index in 0..block.count() {
            if block.owners[index] == mesh.partition {
                let target = part[linear] as usize;
                let builder = builders
                    .entry(target)
                    .or_insert_with(|| FragmentBuilder::new(mesh));
                builder.add_cell(kind, index, part[linear], &|_| UNKNOWN_OWNER);
                // node neighbors ride along as the halo
                for &node in mesh.cell_nodes(kind, index) {
                    for &neighbor in &n2c[node as usize] {
                        let (nkind, nindex) = mesh.kind_and_index(neighbor)?;
                        builder.add_cell(nkind, nindex, part[neighbor], &|_| UNKNOWN_OWNER);
                    }
                }
            }
            linear += 1;
        }
    }

    let fragments = exchange_fragments(group, builders)?;
    let mut appender = MeshAppender::new(group.rank() as i32);
    for fragment in &fragments {
        appender.add_fragment(fragment)?;
    }
    let mut out = appender.into_mesh();
    assign_node_owners_from_cells(group, &mut out)?;
    out.validate(group.size())?;
    Ok(out)
}

/// Enlarge halos so every rank holds the complete set of cells incident to
/// each node it owns.
pub fn extend_node_support(group: &ProcessGroup, mesh: &Mesh) -> Result<Mesh> {
    let n2c = mesh.node_to_cell();
    let mut builders: BTreeMap<usize, FragmentBuilder> = BTreeMap::new();
    for node in 0..mesh.node_count() {
        let target = mesh.node_owners[node] as usize;
        let builder = builders
            .entry(target)
            .or_insert_with(|| FragmentBuilder::new(mesh));
        for &cell in &n2c[node] {
            let (kind, index) = mesh.kind_and_index(cell)?;
            builder.add_cell(kind, index, mesh.cell_owner(kind, index), &|local| {
                mesh.node_owners[local]
            });
        }
    }
    let fragments = exchange_fragments(group, builders)?;
    let mut appender = MeshAppender::new(group.rank() as i32);
    for fragment in &fragments {
        appender.add_fragment(fragment)?;
    }
    let out = appender.into_mesh();
    out.validate(group.size())?;
    Ok(out)
}

/// Enlarge halos so every rank owning a cell also holds every cell sharing
/// a node with it.
pub fn extend_cell_support(group: &ProcessGroup, mesh: &Mesh) -> Result<Mesh> {
    let n2c = mesh.node_to_cell();
    let mut builders: BTreeMap<usize, FragmentBuilder> = BTreeMap::new();
    for cells in &n2c {
        for &c in cells {
            let (ckind, cindex) = mesh.kind_and_index(c)?;
            let target = mesh.cell_owner(ckind, cindex) as usize;
            let builder = builders
                .entry(target)
                .or_insert_with(|| FragmentBuilder::new(mesh));
            for &d in cells {
                let (dkind, dindex) = mesh.kind_and_index(d)?;
                builder.add_cell(dkind, dindex, mesh.cell_owner(dkind, dindex), &|local| {
                    mesh.node_owners[local]
                });
            }
        }
    }
    let fragments = exchange_fragments(group, builders)?;
    let mut appender = MeshAppender::new(group.rank() as i32);
    for fragment in &fragments {
        appender.add_fragment(fragment)?;
    }
    let out = appender.into_mesh();
    out.validate(group.size())?;
    Ok(out)
}

/// Cell owner := owner of the cell's minimum-global-id node.
fn infer_cell_owners_from_min_gid_node(mesh: &mut Mesh) -> Result<()> {
    let g2l = mesh.build_node_g2l();
    let mut assignments = Vec::new();
    for (&kind, block) in &mesh.cells {
        let n = kind.node_count();
        for index in 0..block.count() {
            let min_gid = block.connectivity[n * index..n * (index + 1)]
                .iter()
                .map(|&l| mesh.node_gids[l as usize])
                .min()
                .ok_or_else(|| MeshError::Invariant("cell with no nodes".into()))?;
            let local = g2l.get(&min_gid).ok_or_else(|| {
                MeshError::NotFound(format!("minimum gid {min_gid} is not resident"))
            })?;
            let owner = mesh.node_owners[*local];
            if owner == UNKNOWN_OWNER {
                return Err(MeshError::Invariant(format!(
                    "node {min_gid} owner still unknown after shuffle"
                )));
            }
            assignments.push((kind, index, owner));
        }
    }
    for (kind, index, owner) in assignments {
        if let Some(block) = mesh.cells.get_mut(&kind) {
            block.owners[index] = owner;
        }
    }
    Ok(())
}

/// Node owner := lowest rank owning an incident cell, agreed globally
/// through a directory keyed by gid.
fn assign_node_owners_from_cells(group: &ProcessGroup, mesh: &mut Mesh) -> Result<()> {
    let n2c = mesh.node_to_cell();
    let mut candidate = vec![i32::MAX; mesh.node_count()];
    for node in 0..mesh.node_count() {
        for &cell in &n2c[node] {
            let (kind, index) = mesh.kind_and_index(cell)?;
            candidate[node] = candidate[node].min(mesh.cell_owner(kind, index));
        }
    }

    // directory pass: lowest candidate wins per gid
    let mut asks: Vec<Vec<(i64, i32)>> = vec![Vec::new(); group.size()];
    for node in 0..mesh.node_count() {
        let gid = mesh.node_gids[node];
        let directory = (gid as usize) % group.size();
        asks[directory].push((gid, candidate[node]));
    }
    let incoming = group.exchange(asks)?;
    let mut best: BTreeMap<i64, i32> = BTreeMap::new();
    for row in &incoming {
        for &(gid, owner) in row {
            let entry = best.entry(gid).or_insert(i32::MAX);
            *entry = (*entry).min(owner);
        }
    }
    let mut replies: Vec<Vec<(i64, i32)>> = vec![Vec::new(); group.size()];
    for (rank, row) in incoming.iter().enumerate() {
        for &(gid, _) in row {
            replies[rank].push((gid, best[&gid]));
        }
    }
    let answers = group.exchange(replies)?;

    let g2l = mesh.build_node_g2l();
    for row in &answers {
        for &(gid, owner) in row {
            if owner == i32::MAX || owner == UNKNOWN_OWNER {
                return Err(MeshError::Invariant(format!(
                    "node {gid} owner still unknown after shuffle"
                )));
            }
            if let Some(&local) = g2l.get(&gid) {
                mesh.node_owners[local] = owner;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::CellKind;
    use chimera_comm::local::spawn_group;

    /// Rank 0 starts owning everything: a bar of two tets sharing a face.
    fn all_on_rank_zero(rank: i32) -> Mesh {
        let mut mesh = Mesh::new(rank);
        if rank == 0 {
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
        }
        mesh
    }

    #[test]
    fn test_shuffle_nodes_moves_ownership_and_preserves_gids() {
        spawn_group(2, |group| {
            let mesh = all_on_rank_zero(group.rank() as i32);
            // send node 4 to rank 1, keep the rest
            let part: Vec<i32> = mesh
                .node_gids
                .iter()
                .map(|&gid| if gid == 4 { 1 } else { 0 })
                .collect();
            let shuffled = shuffle_nodes(&group, &mesh, &part).unwrap();

            let g2l = shuffled.build_node_g2l();
            if group.rank() == 0 {
                // rank 0 keeps nodes 0..3 and sees 4 as a ghost
                for gid in 0..4i64 {
                    assert_eq!(shuffled.node_owners[g2l[&gid]], 0);
                }
                assert_eq!(shuffled.node_owners[g2l[&4]], 1);
            } else {
                assert_eq!(shuffled.node_owners[g2l[&4]], 1);
                // the cell containing node 4 came along
                assert!(shuffled.cell_count() >= 1);
            }
            // cell owner follows the minimum-gid node everywhere
            for (&kind, block) in &shuffled.cells {
                let n = kind.node_count();
                for index in 0..block.count() {
                    let min_gid = block.connectivity[n * index..n * (index + 1)]
                        .iter()
                        .map(|&l| shuffled.node_gids[l as usize])
                        .min()
                        .unwrap();
                    assert_eq!(block.owners[index], shuffled.node_owners[g2l[&min_gid]]);
                }
            }
        });
    }

    #[test]
    fn test_invalid_part_vector_fails_on_every_rank() {
        spawn_group(2, |group| {
            let mesh = all_on_rank_zero(group.rank() as i32);
            // rank 0 requests an owner outside the group; rank 1's empty
            // input is locally fine, but the collective check fails both
            let cell_part = vec![7i32; mesh.cell_count()];
            assert!(shuffle_cells(&group, &mesh, &cell_part).is_err());
            let node_part = vec![7i32; mesh.node_count()];
            assert!(shuffle_nodes(&group, &mesh, &node_part).is_err());
        });
    }

    #[test]
    fn test_shuffle_cells_moves_cell_and_halo() {
        spawn_group(2, |group| {
            let mesh = all_on_rank_zero(group.rank() as i32);
            // cell 1 moves to rank 1
            let part: Vec<i32> = (0..mesh.cell_count())
                .map(|c| if c == 1 { 1 } else { 0 })
                .collect();
            let shuffled = shuffle_cells(&group, &mesh, &part).unwrap();
            if group.rank() == 1 {
                // the moved cell plus its face neighbor as halo
                assert_eq!(shuffled.cell_count(), 2);
                let block = &shuffled.cells[&CellKind::Tetra4];
                let owners: Vec<i32> = block.owners.clone();
                assert!(owners.contains(&1));
                assert!(owners.contains(&0));
            }
            // node owners are consistent across ranks: gid -> lowest
            // incident cell owner
            let g2l = shuffled.build_node_g2l();
            if shuffled.node_count() > 0 {
                // node 0 only touches cell 0, which stayed on rank 0
                if let Some(&l) = g2l.get(&0) {
                    assert_eq!(shuffled.node_owners[l], 0);
                }
                // node 4 only touches cell 1, now on rank 1
                if let Some(&l) = g2l.get(&4) {
                    assert_eq!(shuffled.node_owners[l], 1);
                }
            }
        });
    }

    #[test]
    fn test_repartition_and_shuffle_round_trip() {
        spawn_group(2, |group| {
            let mesh = all_on_rank_zero(group.rank() as i32);
            let costs = vec![1.0; mesh.node_count()];
            let part = repartition_nodes(&group, &mesh, &costs).unwrap();
            let shuffled = shuffle_nodes(&group, &mesh, &part).unwrap();
            // both ranks own at least one node afterwards
            let owned = shuffled.owned_node_count();
            let total = group.parallel_sum(owned as i64).unwrap();
            assert_eq!(total, 5);
            assert!(owned > 0);
        });
    }

    #[test]
    fn test_extend_node_support_completes_stencils() {
        spawn_group(2, |group| {
            let mesh = all_on_rank_zero(group.rank() as i32);
            let part: Vec<i32> = mesh
                .node_gids
                .iter()
                .map(|&gid| if gid >= 3 { 1 } else { 0 })
                .collect();
            let shuffled = shuffle_nodes(&group, &mesh, &part).unwrap();
            let extended = extend_node_support(&group, &shuffled).unwrap();
            // every owned node sees both tets if it touches both
            let n2c = extended.node_to_cell();
            let g2l = extended.build_node_g2l();
            if let Some(&l) = g2l.get(&3) {
                if extended.owned_node(l) {
                    assert_eq!(n2c[l].len(), 2);
                }
            }
        });
    }
}
