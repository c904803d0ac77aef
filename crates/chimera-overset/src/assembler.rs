//! Overset assembly pipeline
//!
//! Plan a coarse voxel grid over the union domain, route overlapping cell
//! fragments to each voxel's owning rank over the message router, run the
//! donor search per voxel, stream candidate receptors back to their owning
//! ranks, and resolve the best donor per receptor into a blanking array and
//! donor stencils.
//!
//! Frame counting is deterministic: every rank sends exactly one fragment
//! frame per voxel and one receptor frame per peer, so receivers know how
//! many frames to await without a termination protocol.

use crate::collector::DonorCollector;
use crate::donor::find_candidate_receptors;
use crate::error::{OversetError, Result};
use crate::receptor::Receptor;
use crate::transfer::VoxelFragment;
use crate::voxel::WorkVoxel;
use chimera_comm::linear::worker_of_id;
use chimera_comm::{Message, ProcessGroup};
use chimera_mesh::{Extent, Mesh, Point};
use chimera_net::{MailBox, PostMan};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info};

/// Router message type for voxel fragments.
pub const FRAGMENT_MESSAGE: i32 = 1;
/// Router message type for receptor streams.
pub const RECEPTORS_MESSAGE: i32 = 2;

#[derive(Clone, Debug)]
pub struct AssemblyOptions {
    /// Rough number of work voxels covering the union domain.
    pub target_voxel_count: usize,
}

impl Default for AssemblyOptions {
    fn default() -> Self {
        Self {
            target_voxel_count: 64,
        }
    }
}

/// Coarse spatial grid over the union of all component domains. Voxels are
/// assigned to ranks by linear partition of the voxel index space.
#[derive(Clone, Debug)]
pub struct VoxelPlan {
    pub domain: Extent,
    pub dims: [usize; 3],
    spacing: [f64; 3],
    ranks: usize,
}

impl VoxelPlan {
    /// Collective: agree on the union extent and grid dimensions.
    pub fn build(
        group: &ProcessGroup,
        mesh: &Mesh,
        options: &AssemblyOptions,
    ) -> Result<VoxelPlan> {
        let mut local = Extent::empty();
        for p in &mesh.points {
            local.add_point(p);
        }
        let lo = group.reduce_vec(&local.lo, |a: f64, b| if a < b { a } else { b })?;
        let hi = group.reduce_vec(&local.hi, |a: f64, b| if a > b { a } else { b })?;
        let domain = Extent::new([lo[0], lo[1], lo[2]], [hi[0], hi[1], hi[2]]);
        if !domain.is_valid() {
            return Err(OversetError::Invariant(
                "union domain is empty: no rank holds any nodes".into(),
            ));
        }

        let lengths = domain.lengths();
        let volume: f64 = lengths.iter().map(|l| l.max(1.0e-12)).product();
        let scale = (options.target_voxel_count.max(1) as f64 / volume).cbrt();
        let mut dims = [1usize; 3];
        for i in 0..3 {
            dims[i] = ((lengths[i] * scale).round() as usize).max(1);
        }
        let mut spacing = [0.0f64; 3];
        for i in 0..3 {
            spacing[i] = lengths[i] / dims[i] as f64;
        }
        info!(?dims, "voxel plan over union domain");
        Ok(VoxelPlan {
            domain,
            dims,
            spacing,
            ranks: group.size(),
        })
    }

    pub fn voxel_count(&self) -> usize {
        self.dims[0] * self.dims[1] * self.dims[2]
    }

    pub fn extent_of(&self, voxel: usize) -> Extent {
        let (i, j, k) = self.unravel(voxel);
        let lo = [
            self.domain.lo[0] + i as f64 * self.spacing[0],
            self.domain.lo[1] + j as f64 * self.spacing[1],
            self.domain.lo[2] + k as f64 * self.spacing[2],
        ];
        let hi = [
            self.domain.lo[0] + (i + 1) as f64 * self.spacing[0],
            self.domain.lo[1] + (j + 1) as f64 * self.spacing[1],
            self.domain.lo[2] + (k + 1) as f64 * self.spacing[2],
        ];
        Extent::new(lo, hi)
    }

    pub fn owner_of(&self, voxel: usize) -> usize {
        worker_of_id(voxel as i64, self.voxel_count() as i64, self.ranks as i64) as usize
    }

    fn unravel(&self, voxel: usize) -> (usize, usize, usize) {
        let i = voxel % self.dims[0];
        let j = (voxel / self.dims[0]) % self.dims[1];
        let k = voxel / (self.dims[0] * self.dims[1]);
        (i, j, k)
    }

    /// The unique voxel that processes a point. A point exactly on a shared
    /// face belongs to the lexicographically smaller adjacent voxel.
    pub fn owning_voxel(&self, p: &Point) -> usize {
        let mut index = [0usize; 3];
        for axis in 0..3 {
            let h = self.spacing[axis];
            if h <= 0.0 {
                continue;
            }
            let t = (p[axis] - self.domain.lo[axis]) / h;
            let mut i = t.floor() as i64;
            // exact face hit: the lower neighbor owns it
            if t == t.floor() && i > 0 {
                i -= 1;
            }
            index[axis] = i.clamp(0, self.dims[axis] as i64 - 1) as usize;
        }
        index[0] + self.dims[0] * (index[1] + self.dims[1] * index[2])
    }
}

/// This rank's share of the assembled domain connectivity: a blanking entry
/// per owned node plus the donor stencils of its fringe nodes, ordered by
/// global id.
#[derive(Clone, Debug, Default)]
pub struct DomainConnectivity {
    /// Owned node gids, in local order.
    pub node_gids: Vec<i64>,
    /// Per owned node: 1 normal, -1 receptor, 0 hole.
    pub iblank: Vec<i8>,
    pub fringe_gids: Vec<i64>,
    pub donor_counts: Vec<i8>,
    pub donor_gids: Vec<i64>,
    pub donor_weights: Vec<f64>,
}

/// Run the full assembly. `components` tags every resident node with its
/// component grid and `wall_distance` supplies the distance field the donor
/// preference is ranked by.
pub fn assemble(
    group: &ProcessGroup,
    mesh: &Mesh,
    components: &[i32],
    wall_distance: &[f64],
    options: &AssemblyOptions,
) -> Result<DomainConnectivity> {
    let plan = VoxelPlan::build(group, mesh, options)?;

    let fragment_mail = MailBox::new([FRAGMENT_MESSAGE]);
    let collector = DonorCollector::new();
    let mut postman = PostMan::new(group, [FRAGMENT_MESSAGE, RECEPTORS_MESSAGE].into())?;
    postman.register_callback(FRAGMENT_MESSAGE, fragment_mail.deliverer(FRAGMENT_MESSAGE));
    postman.register_callback(RECEPTORS_MESSAGE, collector.callback());
    postman.start()?;

    // one fragment frame per voxel to its owner, empty allowed
    for voxel in 0..plan.voxel_count() {
        let fragment =
            VoxelFragment::extract(mesh, &plan.extent_of(voxel), components, wall_distance)?;
        let mut msg = Message::new();
        msg.pack(voxel as i64);
        fragment.pack(&mut msg)?;
        postman.push(plan.owner_of(voxel), FRAGMENT_MESSAGE, msg)?;
    }

    // collect the fragments addressed to the voxels this rank processes
    let my_voxels: Vec<usize> =
        (0..plan.voxel_count()).filter(|&v| plan.owner_of(v) == group.rank()).collect();
    let mut arrived: BTreeMap<usize, Vec<VoxelFragment>> =
        my_voxels.iter().map(|&v| (v, Vec::new())).collect();
    for _ in 0..group.size() * my_voxels.len() {
        let mut msg = fragment_mail.wait(FRAGMENT_MESSAGE);
        let voxel = msg.unpack::<i64>()? as usize;
        let fragment = VoxelFragment::unpack(&mut msg)?;
        arrived
            .get_mut(&voxel)
            .ok_or_else(|| {
                OversetError::Invariant(format!("fragment for voxel {voxel} routed to wrong rank"))
            })?
            .push(fragment);
    }

    // donor search per voxel, receptors grouped by owning rank
    let mut receptors_for_rank: BTreeMap<usize, Vec<Receptor>> =
        (0..group.size()).map(|r| (r, Vec::new())).collect();
    for (&voxel, fragments) in &arrived {
        let mut work = WorkVoxel::new(plan.extent_of(voxel));
        for fragment in fragments {
            work.add_fragment(fragment);
        }
        debug!(
            voxel,
            nodes = work.nodes.len(),
            cells = work.cell_count(),
            "processing voxel"
        );
        let receptors =
            find_candidate_receptors(&work, &|p: &Point| plan.owning_voxel(p) == voxel);
        for receptor in receptors {
            let owner = receptor.owner as usize;
            receptors_for_rank
                .get_mut(&owner)
                .ok_or_else(|| {
                    OversetError::Invariant(format!("receptor owner {owner} outside the group"))
                })?
                .push(receptor);
        }
    }

    // one receptor frame per peer, empty allowed
    for (rank, receptors) in receptors_for_rank {
        let mut msg = Message::new();
        Receptor::pack_list(&receptors, &mut msg);
        postman.push(rank, RECEPTORS_MESSAGE, msg)?;
    }
    collector.wait_for_deliveries(group.size());

    let connectivity = resolve_receptors(group, mesh, collector.take_receptors())?;

    // every expected frame has arrived everywhere once all ranks get here
    while postman.pending_outbound() > 0 {
        std::thread::sleep(Duration::from_micros(10));
    }
    group.barrier()?;
    postman.stop();

    info!(
        fringes = connectivity.fringe_gids.len(),
        holes = connectivity.iblank.iter().filter(|&&b| b == 0).count(),
        "assembly complete"
    );
    Ok(connectivity)
}

/// Owner-side resolution: merge candidate lists per node, pick the best
/// donor, and blank the nodes.
fn resolve_receptors(
    group: &ProcessGroup,
    mesh: &Mesh,
    incoming: Vec<Receptor>,
) -> Result<DomainConnectivity> {
    let mut merged: BTreeMap<i64, Receptor> = BTreeMap::new();
    for receptor in incoming {
        if receptor.owner as usize != group.rank() {
            return Err(OversetError::Invariant(format!(
                "receptor {} owned by rank {} arrived at rank {}",
                receptor.gid,
                receptor.owner,
                group.rank()
            )));
        }
        match merged.entry(receptor.gid) {
            Entry::Occupied(mut slot) => {
                slot.get_mut().candidates.extend(receptor.candidates);
            }
            Entry::Vacant(slot) => {
                slot.insert(receptor);
            }
        }
    }

    let mut out = DomainConnectivity::default();
    let mut slot_of: BTreeMap<i64, usize> = BTreeMap::new();
    for node in 0..mesh.node_count() {
        if mesh.owned_node(node) {
            slot_of.insert(mesh.node_gids[node], out.node_gids.len());
            out.node_gids.push(mesh.node_gids[node]);
            out.iblank.push(1);
        }
    }

    for (gid, receptor) in merged {
        let slot = *slot_of.get(&gid).ok_or_else(|| {
            OversetError::NotFound(format!("receptor gid {gid} is not an owned node here"))
        })?;
        match receptor.best_donor() {
            Some(donor) => {
                out.iblank[slot] = -1;
                out.fringe_gids.push(gid);
                out.donor_counts.push(donor.donor_node_gids.len() as i8);
                out.donor_gids.extend_from_slice(&donor.donor_node_gids);
                out.donor_weights.extend_from_slice(&donor.weights);
            }
            None => {
                // no valid donor: the node is cut out of the computation
                out.iblank[slot] = 0;
            }
        }
    }
    Ok(out)
}
