//! Collecting per-rank connectivity shares into the flattened result

use crate::error::{DcifError, Result};
use crate::flattened::{FlattenedDomainConnectivity, GridRange};
use chimera_comm::ProcessGroup;

/// Collective: assemble each rank's owned-node blanking and fringe stencils
/// into the root's flattened connectivity, dense and ordered by global id.
/// Returns `None` away from the root.
#[allow(clippy::too_many_arguments)]
pub fn gather_connectivity(
    group: &ProcessGroup,
    node_gids: &[i64],
    iblank: &[i8],
    fringe_gids: &[i64],
    donor_counts: &[i8],
    donor_gids: &[i64],
    donor_weights: &[f64],
    grids: &[GridRange],
) -> Result<Option<FlattenedDomainConnectivity>> {
    if node_gids.len() != iblank.len() {
        return Err(DcifError::Configuration(format!(
            "{} blanking entries for {} owned nodes",
            iblank.len(),
            node_gids.len()
        )));
    }
    if fringe_gids.len() != donor_counts.len() {
        return Err(DcifError::Configuration(format!(
            "{} donor counts for {} fringes",
            donor_counts.len(),
            fringe_gids.len()
        )));
    }

    let dense_iblank = group.gather_and_sort(iblank, 1, node_gids, 0)?;
    let all_fringes = group.gatherv_to(fringe_gids, 0)?;
    let all_counts = group.gatherv_to(donor_counts, 0)?;
    let all_donor_gids = group.gatherv_to(donor_gids, 0)?;
    let all_weights = group.gatherv_to(donor_weights, 0)?;

    let (dense_iblank, all_fringes, all_counts, all_donor_gids, all_weights) =
        match (dense_iblank, all_fringes, all_counts, all_donor_gids, all_weights) {
            (Some(a), Some(b), Some(c), Some(d), Some(e)) => (a, b, c, d, e),
            _ => return Ok(None),
        };

    // receptors ordered by global id across all ranks
    struct Stencil {
        gid: i64,
        donor_ids: Vec<i64>,
        donor_weights: Vec<f64>,
    }
    let mut receptors: Vec<Stencil> = Vec::new();
    for (rank, fringes) in all_fringes.iter().enumerate() {
        let counts = &all_counts[rank];
        let ids = &all_donor_gids[rank];
        let weights = &all_weights[rank];
        let mut offset = 0usize;
        for (i, &gid) in fringes.iter().enumerate() {
            let n = counts[i] as usize;
            if offset + n > ids.len() || offset + n > weights.len() {
                return Err(DcifError::Invariant(format!(
                    "rank {rank} supplied fewer donors than its counts claim"
                )));
            }
            receptors.push(Stencil {
                gid,
                donor_ids: ids[offset..offset + n].to_vec(),
                donor_weights: weights[offset..offset + n].to_vec(),
            });
            offset += n;
        }
    }
    receptors.sort_by_key(|r| r.gid);

    let mut dcif = FlattenedDomainConnectivity::new();
    dcif.set_iblank(dense_iblank);
    dcif.set_receptor_ids(receptors.iter().map(|r| r.gid).collect());
    dcif.set_donor_counts(receptors.iter().map(|r| r.donor_ids.len() as i8).collect());
    dcif.set_donor_ids(receptors.iter().flat_map(|r| r.donor_ids.clone()).collect())?;
    dcif.set_donor_weights(
        receptors
            .iter()
            .flat_map(|r| r.donor_weights.clone())
            .collect(),
    )?;
    for &grid in grids {
        dcif.add_grid(grid);
    }
    Ok(Some(dcif))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker;
    use crate::codec;
    use chimera_comm::local::spawn_group;
    use chimera_mesh::{CellKind, Mesh};
    use chimera_overset::{assemble, AssemblyOptions};

    #[test]
    fn test_gather_orders_receptors_by_gid() {
        spawn_group(2, |group| {
            // rank 0 owns nodes 0,2 with a fringe at 2; rank 1 owns 1,3
            // with a fringe at 1
            let (gids, iblank, fringes, counts, donors, weights) = if group.rank() == 0 {
                (
                    vec![0i64, 2],
                    vec![1i8, -1],
                    vec![2i64],
                    vec![1i8],
                    vec![0i64],
                    vec![1.0f64],
                )
            } else {
                (
                    vec![1i64, 3],
                    vec![-1i8, 1],
                    vec![1i64],
                    vec![1i8],
                    vec![3i64],
                    vec![1.0f64],
                )
            };
            let grids = [GridRange {
                start: 0,
                end: 3,
                imesh: 1,
            }];
            let dcif = gather_connectivity(
                &group, &gids, &iblank, &fringes, &counts, &donors, &weights, &grids,
            )
            .unwrap();
            if group.rank() == 0 {
                let dcif = dcif.unwrap();
                assert_eq!(dcif.fringe_ids(), &[1, 2]);
                assert_eq!(dcif.donor_ids(), &[3, 0]);
                assert_eq!(dcif.iblank(), &[1, -1, -1, 1]);
                dcif.verify_consistency().unwrap();
            } else {
                assert!(dcif.is_none());
            }
        });
    }

    /// Full pipeline: assemble a two-component overlap on two ranks, gather
    /// the connectivity, write the file, read it back, and verify the
    /// stencils recover the linear reference field.
    #[test]
    fn test_assembly_to_file_recovers_linear_field() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("assembled.dcif");
        spawn_group(2, move |group| {
            let mut mesh = Mesh::new(group.rank() as i32);
            if group.rank() == 0 {
                // component 0: unit tet, gids 0..3
                mesh.add_node(0, [0.0, 0.0, 0.0], 0);
                mesh.add_node(1, [1.0, 0.0, 0.0], 0);
                mesh.add_node(2, [0.0, 1.0, 0.0], 0);
                mesh.add_node(3, [0.0, 0.0, 1.0], 0);
                mesh.add_cell(CellKind::Tetra4, 0, 0, 0, &[0, 1, 2, 3]).unwrap();
            } else {
                // component 1: a tet with one vertex inside component 0
                mesh.add_node(4, [0.1, 0.1, 0.1], 1);
                mesh.add_node(5, [3.0, 0.1, 0.1], 1);
                mesh.add_node(6, [0.1, 3.0, 0.1], 1);
                mesh.add_node(7, [0.1, 0.1, 3.0], 1);
                mesh.add_cell(CellKind::Tetra4, 1, 1, 0, &[0, 1, 2, 3]).unwrap();
            }
            let components: Vec<i32> = mesh
                .node_gids
                .iter()
                .map(|&g| if g < 4 { 0 } else { 1 })
                .collect();
            let distance: Vec<f64> = mesh
                .node_gids
                .iter()
                .map(|&g| if g < 4 { 0.5 } else { 0.9 })
                .collect();
            let options = AssemblyOptions {
                target_voxel_count: 8,
            };
            let out = assemble(&group, &mesh, &components, &distance, &options).unwrap();

            let grids = [
                GridRange {
                    start: 0,
                    end: 3,
                    imesh: 1,
                },
                GridRange {
                    start: 4,
                    end: 7,
                    imesh: 0,
                },
            ];
            let dcif = gather_connectivity(
                &group,
                &out.node_gids,
                &out.iblank,
                &out.fringe_gids,
                &out.donor_counts,
                &out.donor_gids,
                &out.donor_weights,
                &grids,
            )
            .unwrap();

            // dense coordinates for the checker
            let owned_xyz: Vec<f64> = (0..mesh.node_count())
                .filter(|&n| mesh.owned_node(n))
                .flat_map(|n| mesh.points[n])
                .collect();
            let owned_gids: Vec<i64> = mesh.owned_node_gids();
            let dense_xyz = group.gather_and_sort(&owned_xyz, 3, &owned_gids, 0).unwrap();

            if group.rank() == 0 {
                let dcif = dcif.unwrap();
                codec::write(&path, &dcif).unwrap();
                let back = codec::read(&path).unwrap();
                assert_eq!(back.node_count(), 8);
                assert_eq!(back.fringe_ids(), &[4]);
                assert_eq!(back.grids().len(), 2);

                let dense_xyz = dense_xyz.unwrap();
                let points: Vec<[f64; 3]> = dense_xyz
                    .chunks_exact(3)
                    .map(|c| [c[0], c[1], c[2]])
                    .collect();
                checker::check_receptor_counts(back.iblank(), back.fringe_ids()).unwrap();
                checker::check_receptor_ids(back.iblank(), back.fringe_ids()).unwrap();
                let stats = checker::check_linear_reconstruction(
                    &points,
                    back.fringe_ids(),
                    back.donor_counts(),
                    back.donor_ids(),
                    back.donor_weights(),
                )
                .unwrap();
                assert!(stats.max < checker::LINEAR_TOLERANCE);
            }
        });
    }
}
