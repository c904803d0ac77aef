//! Ghost-refresh sync patterns
//!
//! A pattern records, per peer, the ordered local ids this rank sends and
//! receives. It is built once per topology by announcing needed global ids
//! to every peer; peers intersect with their owned sets and echo the match,
//! and the requester's need order fixes the ordering on both sides. The
//! pattern is then reused for any pod payload of compatible stride.

use crate::error::{MeshError, Result};
use crate::mesh::Mesh;
use chimera_comm::{Pod, ProcessGroup};
use std::collections::{BTreeMap, HashMap};

#[derive(Clone, Debug, Default)]
pub struct SyncPattern {
    /// Peer rank -> ordered local ids to send.
    pub send: BTreeMap<usize, Vec<usize>>,
    /// Peer rank -> ordered local ids to receive into.
    pub recv: BTreeMap<usize, Vec<usize>>,
}

impl SyncPattern {
    /// Build from the ids this rank owns and the ids it needs refreshed.
    pub fn build(
        group: &ProcessGroup,
        owned: &HashMap<i64, usize>,
        needed_gids: &[i64],
        needed_locals: &[usize],
    ) -> Result<SyncPattern> {
        if needed_gids.len() != needed_locals.len() {
            return Err(MeshError::Configuration(
                "needed gid and local id lists disagree in length".into(),
            ));
        }
        // announce my needs to every peer
        let announcements = vec![needed_gids.to_vec(); group.size()];
        let requests = group.exchange(announcements)?;

        // the subset of each peer's needs that I own, in the peer's order
        let mut matched: Vec<Vec<i64>> = Vec::with_capacity(group.size());
        let mut send = BTreeMap::new();
        for (peer, request) in requests.iter().enumerate() {
            let hits: Vec<i64> = request
                .iter()
                .copied()
                .filter(|gid| owned.contains_key(gid))
                .collect();
            if !hits.is_empty() && peer != group.rank() {
                send.insert(peer, hits.iter().map(|gid| owned[gid]).collect());
            }
            matched.push(if peer == group.rank() { Vec::new() } else { hits });
        }

        // echo the matches so each requester learns who will feed it
        let claims = group.exchange(matched)?;
        let needed_slot: HashMap<i64, usize> = needed_gids
            .iter()
            .zip(needed_locals)
            .map(|(&g, &l)| (g, l))
            .collect();
        let mut claimed: HashMap<i64, usize> = HashMap::new();
        let mut recv = BTreeMap::new();
        for (peer, claim) in claims.iter().enumerate() {
            if claim.is_empty() {
                continue;
            }
            let mut locals = Vec::with_capacity(claim.len());
            for &gid in claim {
                if let Some(previous) = claimed.insert(gid, peer) {
                    return Err(MeshError::Invariant(format!(
                        "ghost gid {gid} claimed by both rank {previous} and rank {peer}"
                    )));
                }
                let local = needed_slot.get(&gid).ok_or_else(|| {
                    MeshError::Invariant(format!("rank {peer} claimed unrequested gid {gid}"))
                })?;
                locals.push(*local);
            }
            recv.insert(peer, locals);
        }

        for &gid in needed_gids {
            if !claimed.contains_key(&gid) {
                return Err(MeshError::Invariant(format!(
                    "ghost gid {gid} is owned by no rank"
                )));
            }
        }
        Ok(SyncPattern { send, recv })
    }

    /// Pattern refreshing ghost nodes from their owners.
    pub fn for_nodes(group: &ProcessGroup, mesh: &Mesh) -> Result<SyncPattern> {
        let mut owned = HashMap::new();
        let mut needed_gids = Vec::new();
        let mut needed_locals = Vec::new();
        for node in 0..mesh.node_count() {
            if mesh.owned_node(node) {
                owned.insert(mesh.node_gids[node], node);
            } else {
                needed_gids.push(mesh.node_gids[node]);
                needed_locals.push(node);
            }
        }
        Self::build(group, &owned, &needed_gids, &needed_locals)
    }

    /// Pattern refreshing ghost cells from their owners, on linear cell ids.
    pub fn for_cells(group: &ProcessGroup, mesh: &Mesh) -> Result<SyncPattern> {
        let mut owned = HashMap::new();
        let mut needed_gids = Vec::new();
        let mut needed_locals = Vec::new();
        let mut linear = 0;
        for block in mesh.cells.values() {
            for index in 0..block.count() {
                if block.owners[index] == mesh.partition {
                    owned.insert(block.gids[index], linear);
                } else {
                    needed_gids.push(block.gids[index]);
                    needed_locals.push(linear);
                }
                linear += 1;
            }
        }
        Self::build(group, &owned, &needed_gids, &needed_locals)
    }
}

/// Refresh ghost entries of `values` from their owners; `stride` values per
/// entity. Ghost values afterwards equal the owners' values at the start of
/// the call.
pub fn sync_field<T: Pod>(
    group: &ProcessGroup,
    pattern: &SyncPattern,
    values: &mut [T],
    stride: usize,
) -> Result<()> {
    let mut sends = vec![Vec::new(); group.size()];
    for (&peer, locals) in &pattern.send {
        let row = &mut sends[peer];
        row.reserve(locals.len() * stride);
        for &local in locals {
            row.extend_from_slice(&values[stride * local..stride * (local + 1)]);
        }
    }
    let received = group.exchange(sends)?;
    for (&peer, locals) in &pattern.recv {
        let row = &received[peer];
        if row.len() != locals.len() * stride {
            return Err(MeshError::Invariant(format!(
                "sync from rank {peer} delivered {} values, expected {}",
                row.len(),
                locals.len() * stride
            )));
        }
        for (i, &local) in locals.iter().enumerate() {
            values[stride * local..stride * (local + 1)]
                .copy_from_slice(&row[stride * i..stride * (i + 1)]);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chimera_comm::local::spawn_group;

    /// Two ranks share a bar of nodes 0..4; rank 0 owns {0,1}, rank 1 owns
    /// {2,3}, and each holds the other's boundary node as a ghost.
    fn shared_bar_mesh(rank: i32) -> Mesh {
        let mut mesh = Mesh::new(rank);
        if rank == 0 {
            mesh.add_node(0, [0.0, 0.0, 0.0], 0);
            mesh.add_node(1, [1.0, 0.0, 0.0], 0);
            mesh.add_node(2, [2.0, 0.0, 0.0], 1);
        } else {
            mesh.add_node(2, [2.0, 0.0, 0.0], 1);
            mesh.add_node(3, [3.0, 0.0, 0.0], 1);
            mesh.add_node(1, [1.0, 0.0, 0.0], 0);
        }
        mesh
    }

    #[test]
    fn test_pattern_matches_needs_to_owners() {
        spawn_group(2, |group| {
            let mesh = shared_bar_mesh(group.rank() as i32);
            let pattern = SyncPattern::for_nodes(&group, &mesh).unwrap();
            let peer = 1 - group.rank();
            assert_eq!(pattern.send[&peer].len(), 1);
            assert_eq!(pattern.recv[&peer].len(), 1);
        });
    }

    #[test]
    fn test_sync_refreshes_ghosts_from_owners() {
        spawn_group(2, |group| {
            let mesh = shared_bar_mesh(group.rank() as i32);
            let pattern = SyncPattern::for_nodes(&group, &mesh).unwrap();
            // field value = owning rank * 100 + gid, ghosts zeroed
            let mut field: Vec<i64> = (0..mesh.node_count())
                .map(|n| {
                    if mesh.owned_node(n) {
                        mesh.partition as i64 * 100 + mesh.node_gids[n]
                    } else {
                        0
                    }
                })
                .collect();
            sync_field(&group, &pattern, &mut field, 1).unwrap();
            for n in 0..mesh.node_count() {
                let expected = mesh.node_owners[n] as i64 * 100 + mesh.node_gids[n];
                assert_eq!(field[n], expected);
            }
        });
    }

    #[test]
    fn test_sync_is_idempotent_without_owner_mutation() {
        spawn_group(2, |group| {
            let mesh = shared_bar_mesh(group.rank() as i32);
            let pattern = SyncPattern::for_nodes(&group, &mesh).unwrap();
            let mut field: Vec<f64> = mesh.node_gids.iter().map(|&g| g as f64 * 1.5).collect();
            sync_field(&group, &pattern, &mut field, 1).unwrap();
            let first = field.clone();
            sync_field(&group, &pattern, &mut field, 1).unwrap();
            assert_eq!(field, first);
        });
    }

    #[test]
    fn test_strided_sync() {
        spawn_group(2, |group| {
            let mesh = shared_bar_mesh(group.rank() as i32);
            let pattern = SyncPattern::for_nodes(&group, &mesh).unwrap();
            let mut field = vec![0.0f64; 3 * mesh.node_count()];
            for n in 0..mesh.node_count() {
                if mesh.owned_node(n) {
                    for k in 0..3 {
                        field[3 * n + k] = mesh.node_gids[n] as f64 + k as f64 * 0.1;
                    }
                }
            }
            sync_field(&group, &pattern, &mut field, 3).unwrap();
            for n in 0..mesh.node_count() {
                for k in 0..3 {
                    assert_eq!(field[3 * n + k], mesh.node_gids[n] as f64 + k as f64 * 0.1);
                }
            }
        });
    }

    #[test]
    fn test_unowned_ghost_is_an_invariant_failure() {
        spawn_group(2, |group| {
            let mut mesh = shared_bar_mesh(group.rank() as i32);
            if group.rank() == 0 {
                mesh.add_node(77, [9.0, 0.0, 0.0], 1); // rank 1 never owns gid 77
            }
            let result = SyncPattern::for_nodes(&group, &mesh);
            if group.rank() == 0 {
                assert!(result.is_err());
            }
        });
    }
}
