//! In-memory assembled domain connectivity

use crate::error::{DcifError, Result};
use chimera_comm::Message;

/// One component grid's slice of the global node id space, inclusive, plus
/// its solver mesh index.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GridRange {
    pub start: i64,
    pub end: i64,
    pub imesh: i32,
}

impl GridRange {
    pub fn node_count(&self) -> i64 {
        1 + self.end - self.start
    }
}

/// A single receptor with its donor stencil, the unit of redistribution.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DcifReceptor {
    pub gid: i64,
    pub donor_ids: Vec<i64>,
    pub donor_weights: Vec<f64>,
}

impl DcifReceptor {
    pub fn pack(&self, msg: &mut Message) {
        msg.pack(self.gid);
        msg.pack(self.donor_ids.len() as i32);
        for &id in &self.donor_ids {
            msg.pack(id);
        }
        for &w in &self.donor_weights {
            msg.pack(w);
        }
    }

    pub fn unpack(msg: &mut Message) -> chimera_comm::Result<DcifReceptor> {
        let gid = msg.unpack::<i64>()?;
        let n = msg.unpack::<i32>()? as usize;
        let mut donor_ids = Vec::with_capacity(n);
        for _ in 0..n {
            donor_ids.push(msg.unpack::<i64>()?);
        }
        let mut donor_weights = Vec::with_capacity(n);
        for _ in 0..n {
            donor_weights.push(msg.unpack::<f64>()?);
        }
        Ok(DcifReceptor {
            gid,
            donor_ids,
            donor_weights,
        })
    }
}

/// The whole assembled result in flattened arrays, as it lays out on disk.
/// Setters validate sizes against the donor counts as they arrive.
#[derive(Clone, Debug, Default)]
pub struct FlattenedDomainConnectivity {
    fringe_ids: Vec<i64>,
    donor_counts: Vec<i8>,
    donor_offsets: Vec<i64>,
    donor_ids: Vec<i64>,
    donor_weights: Vec<f64>,
    iblank: Vec<i8>,
    grids: Vec<GridRange>,
    ndonors: i64,
}

impl FlattenedDomainConnectivity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_receptor_ids(&mut self, ids: Vec<i64>) {
        self.fringe_ids = ids;
    }

    pub fn set_donor_counts(&mut self, counts: Vec<i8>) {
        self.ndonors = counts.iter().map(|&c| c as i64).sum();
        self.donor_offsets = Vec::with_capacity(counts.len());
        let mut offset = 0i64;
        for &c in &counts {
            self.donor_offsets.push(offset);
            offset += c as i64;
        }
        self.donor_counts = counts;
    }

    pub fn set_donor_ids(&mut self, ids: Vec<i64>) -> Result<()> {
        if ids.len() as i64 != self.ndonors {
            return Err(DcifError::Invariant(format!(
                "{} donor ids do not match the donor counts ({})",
                ids.len(),
                self.ndonors
            )));
        }
        self.donor_ids = ids;
        Ok(())
    }

    pub fn set_donor_weights(&mut self, weights: Vec<f64>) -> Result<()> {
        if weights.len() as i64 != self.ndonors {
            return Err(DcifError::Invariant(format!(
                "{} donor weights do not match the donor counts ({})",
                weights.len(),
                self.ndonors
            )));
        }
        self.donor_weights = weights;
        Ok(())
    }

    pub fn set_iblank(&mut self, iblank: Vec<i8>) {
        self.iblank = iblank;
    }

    pub fn add_grid(&mut self, range: GridRange) {
        self.grids.push(range);
    }

    pub fn node_count(&self) -> i64 {
        self.iblank.len() as i64
    }

    pub fn receptor_count(&self) -> i64 {
        self.fringe_ids.len() as i64
    }

    pub fn donor_count(&self) -> i64 {
        self.ndonors
    }

    pub fn grid_count(&self) -> i32 {
        self.grids.len() as i32
    }

    pub fn fringe_ids(&self) -> &[i64] {
        &self.fringe_ids
    }

    pub fn donor_counts(&self) -> &[i8] {
        &self.donor_counts
    }

    pub fn donor_ids(&self) -> &[i64] {
        &self.donor_ids
    }

    pub fn donor_weights(&self) -> &[f64] {
        &self.donor_weights
    }

    pub fn iblank(&self) -> &[i8] {
        &self.iblank
    }

    pub fn grids(&self) -> &[GridRange] {
        &self.grids
    }

    pub fn receptor(&self, i: usize) -> Result<DcifReceptor> {
        if i >= self.fringe_ids.len() {
            return Err(DcifError::NotFound(format!(
                "receptor {i} of {}",
                self.fringe_ids.len()
            )));
        }
        let first = self.donor_offsets[i] as usize;
        let count = self.donor_counts[i] as usize;
        Ok(DcifReceptor {
            gid: self.fringe_ids[i],
            donor_ids: self.donor_ids[first..first + count].to_vec(),
            donor_weights: self.donor_weights[first..first + count].to_vec(),
        })
    }

    /// The blanking array must mark exactly the fringe nodes as receptors;
    /// checked before every write.
    pub fn verify_consistency(&self) -> Result<()> {
        let blanked = self.iblank.iter().filter(|&&b| b == -1).count() as i64;
        if blanked != self.receptor_count() {
            return Err(DcifError::Invariant(format!(
                "{blanked} nodes blanked as receptors but {} fringes recorded",
                self.receptor_count()
            )));
        }
        for &id in &self.fringe_ids {
            if id < 0 || id >= self.node_count() {
                return Err(DcifError::Invariant(format!(
                    "fringe id {id} outside the {} nodes",
                    self.node_count()
                )));
            }
            if self.iblank[id as usize] != -1 {
                return Err(DcifError::Invariant(format!(
                    "fringe id {id} is not blanked as a receptor"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub fn small_connectivity() -> FlattenedDomainConnectivity {
        let mut dcif = FlattenedDomainConnectivity::new();
        dcif.set_receptor_ids(vec![2]);
        dcif.set_donor_counts(vec![4]);
        dcif.set_donor_ids(vec![0, 1, 3, 4]).unwrap();
        dcif.set_donor_weights(vec![0.25; 4]).unwrap();
        dcif.set_iblank(vec![1, 1, -1, 1, 1]);
        dcif.add_grid(GridRange {
            start: 0,
            end: 4,
            imesh: 1,
        });
        dcif
    }

    #[test]
    fn test_counts_and_accessors() {
        let dcif = small_connectivity();
        assert_eq!(dcif.node_count(), 5);
        assert_eq!(dcif.receptor_count(), 1);
        assert_eq!(dcif.donor_count(), 4);
        assert_eq!(dcif.grid_count(), 1);
        assert_eq!(dcif.grids()[0].node_count(), 5);
        dcif.verify_consistency().unwrap();
    }

    #[test]
    fn test_receptor_accessor_uses_offsets() {
        let mut dcif = FlattenedDomainConnectivity::new();
        dcif.set_receptor_ids(vec![7, 9]);
        dcif.set_donor_counts(vec![2, 3]);
        dcif.set_donor_ids(vec![0, 1, 2, 3, 4]).unwrap();
        dcif.set_donor_weights(vec![0.5, 0.5, 0.2, 0.3, 0.5]).unwrap();
        let second = dcif.receptor(1).unwrap();
        assert_eq!(second.gid, 9);
        assert_eq!(second.donor_ids, vec![2, 3, 4]);
        assert_eq!(second.donor_weights, vec![0.2, 0.3, 0.5]);
        assert!(dcif.receptor(2).is_err());
    }

    #[test]
    fn test_mismatched_donor_ids_are_rejected() {
        let mut dcif = FlattenedDomainConnectivity::new();
        dcif.set_donor_counts(vec![2]);
        assert!(dcif.set_donor_ids(vec![0]).is_err());
        assert!(dcif.set_donor_weights(vec![0.5; 3]).is_err());
    }

    #[test]
    fn test_blank_count_mismatch_is_fatal() {
        let mut dcif = small_connectivity();
        dcif.set_iblank(vec![1, 1, -1, -1, 1]);
        assert!(dcif.verify_consistency().is_err());
    }

    #[test]
    fn test_receptor_pack_round_trip() {
        let receptor = DcifReceptor {
            gid: 11,
            donor_ids: vec![5, 6, 7],
            donor_weights: vec![0.2, 0.3, 0.5],
        };
        let mut msg = Message::new();
        receptor.pack(&mut msg);
        msg.finalize();
        assert_eq!(DcifReceptor::unpack(&mut msg).unwrap(), receptor);
    }
}
