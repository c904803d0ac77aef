//! Receptors and their candidate donors

use chimera_comm::{Message, Result};

/// A donor cell able to supply interpolation to a receptor, with the
/// stencil (node gids and weights) the connectivity export needs.
#[derive(Clone, Debug, PartialEq)]
pub struct CandidateDonor {
    pub component: i32,
    pub cell_gid: i64,
    pub cell_owner: i32,
    pub valid: bool,
    /// Wall distance interpolated to the receptor position.
    pub distance: f64,
    /// Donor shape by corner count (4 tet, 5 pyramid, 6 prism, 8 hex).
    pub corners: u8,
    pub donor_node_gids: Vec<i64>,
    pub weights: Vec<f64>,
}

impl CandidateDonor {
    pub fn pack(&self, msg: &mut Message) {
        msg.pack(self.component);
        msg.pack(self.cell_gid);
        msg.pack(self.cell_owner);
        msg.pack(self.valid);
        msg.pack(self.distance);
        msg.pack(self.corners);
        msg.pack(self.donor_node_gids.len() as i32);
        for &gid in &self.donor_node_gids {
            msg.pack(gid);
        }
        for &w in &self.weights {
            msg.pack(w);
        }
    }

    pub fn unpack(msg: &mut Message) -> Result<CandidateDonor> {
        let component = msg.unpack::<i32>()?;
        let cell_gid = msg.unpack::<i64>()?;
        let cell_owner = msg.unpack::<i32>()?;
        let valid = msg.unpack::<bool>()?;
        let distance = msg.unpack::<f64>()?;
        let corners = msg.unpack::<u8>()?;
        let n = msg.unpack::<i32>()? as usize;
        let mut donor_node_gids = Vec::with_capacity(n);
        for _ in 0..n {
            donor_node_gids.push(msg.unpack::<i64>()?);
        }
        let mut weights = Vec::with_capacity(n);
        for _ in 0..n {
            weights.push(msg.unpack::<f64>()?);
        }
        Ok(CandidateDonor {
            component,
            cell_gid,
            cell_owner,
            valid,
            distance,
            corners,
            donor_node_gids,
            weights,
        })
    }
}

/// A node requiring interpolation from another component grid, with the
/// candidates collected across voxels.
#[derive(Clone, Debug, PartialEq)]
pub struct Receptor {
    pub gid: i64,
    pub owner: i32,
    pub distance: f64,
    pub candidates: Vec<CandidateDonor>,
}

impl Receptor {
    pub fn pack(&self, msg: &mut Message) {
        msg.pack(self.gid);
        msg.pack(self.owner);
        msg.pack(self.distance);
        msg.pack(self.candidates.len() as i32);
        for candidate in &self.candidates {
            candidate.pack(msg);
        }
    }

    pub fn unpack(msg: &mut Message) -> Result<Receptor> {
        let gid = msg.unpack::<i64>()?;
        let owner = msg.unpack::<i32>()?;
        let distance = msg.unpack::<f64>()?;
        let n = msg.unpack::<i32>()? as usize;
        let mut candidates = Vec::with_capacity(n);
        for _ in 0..n {
            candidates.push(CandidateDonor::unpack(msg)?);
        }
        Ok(Receptor {
            gid,
            owner,
            distance,
            candidates,
        })
    }

    pub fn pack_list(receptors: &[Receptor], msg: &mut Message) {
        msg.pack(receptors.len() as i32);
        for receptor in receptors {
            receptor.pack(msg);
        }
    }

    pub fn unpack_list(msg: &mut Message) -> Result<Vec<Receptor>> {
        let n = msg.unpack::<i32>()? as usize;
        let mut receptors = Vec::with_capacity(n);
        for _ in 0..n {
            receptors.push(Receptor::unpack(msg)?);
        }
        Ok(receptors)
    }

    /// The winning donor: lowest interpolated wall distance among valid
    /// candidates, ties broken by (component, owning rank, cell id).
    pub fn best_donor(&self) -> Option<&CandidateDonor> {
        self.candidates
            .iter()
            .filter(|c| c.valid)
            .min_by(|a, b| {
                a.distance
                    .total_cmp(&b.distance)
                    .then(a.component.cmp(&b.component))
                    .then(a.cell_owner.cmp(&b.cell_owner))
                    .then(a.cell_gid.cmp(&b.cell_gid))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn donor(component: i32, cell_gid: i64, owner: i32, distance: f64) -> CandidateDonor {
        CandidateDonor {
            component,
            cell_gid,
            cell_owner: owner,
            valid: true,
            distance,
            corners: 4,
            donor_node_gids: vec![0, 1, 2, 3],
            weights: vec![0.25; 4],
        }
    }

    #[test]
    fn test_receptor_pack_round_trip() {
        let receptor = Receptor {
            gid: 42,
            owner: 3,
            distance: 1.5,
            candidates: vec![donor(0, 9, 1, 0.25), donor(2, 4, 0, 0.75)],
        };
        let mut msg = Message::new();
        Receptor::pack_list(&[receptor.clone()], &mut msg);
        msg.finalize();
        let back = Receptor::unpack_list(&mut msg).unwrap();
        assert_eq!(back, vec![receptor]);
    }

    #[test]
    fn test_best_donor_prefers_lowest_distance() {
        let receptor = Receptor {
            gid: 1,
            owner: 0,
            distance: 9.0,
            candidates: vec![donor(1, 10, 0, 0.5), donor(0, 20, 1, 0.1)],
        };
        assert_eq!(receptor.best_donor().unwrap().cell_gid, 20);
    }

    #[test]
    fn test_best_donor_tie_break_is_lexicographic() {
        let receptor = Receptor {
            gid: 1,
            owner: 0,
            distance: 9.0,
            candidates: vec![
                donor(1, 10, 2, 0.5),
                donor(1, 3, 1, 0.5),
                donor(0, 99, 5, 0.5),
            ],
        };
        // equal distance: lowest component wins
        assert_eq!(receptor.best_donor().unwrap().cell_gid, 99);
    }

    #[test]
    fn test_invalid_candidates_are_ignored() {
        let mut bad = donor(0, 7, 0, 0.01);
        bad.valid = false;
        let receptor = Receptor {
            gid: 1,
            owner: 0,
            distance: 9.0,
            candidates: vec![bad, donor(1, 8, 0, 0.9)],
        };
        assert_eq!(receptor.best_donor().unwrap().cell_gid, 8);

        let mut all_bad = donor(0, 7, 0, 0.01);
        all_bad.valid = false;
        let hole = Receptor {
            gid: 2,
            owner: 0,
            distance: 9.0,
            candidates: vec![all_bad],
        };
        assert!(hole.best_donor().is_none());
    }
}
