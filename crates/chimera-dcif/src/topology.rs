//! Local/global topology side input for persisting per-node data

use std::collections::HashMap;

/// Maps this rank's local ids to global ids with a do-own flag per local,
/// the minimal description file I/O needs of a distributed field.
#[derive(Clone, Debug, Default)]
pub struct Topology {
    gids: Vec<i64>,
    do_own: Vec<bool>,
}

impl Topology {
    pub fn new(gids: Vec<i64>, do_own: Vec<bool>) -> Self {
        assert_eq!(gids.len(), do_own.len());
        Self { gids, do_own }
    }

    pub fn local_count(&self) -> usize {
        self.gids.len()
    }

    pub fn owned_count(&self) -> usize {
        self.do_own.iter().filter(|&&o| o).count()
    }

    pub fn global_id(&self, local: usize) -> i64 {
        self.gids[local]
    }

    pub fn owns(&self, local: usize) -> bool {
        self.do_own[local]
    }

    pub fn global_ids(&self) -> &[i64] {
        &self.gids
    }

    /// Global ids of the locals this rank owns, in local order.
    pub fn owned_gids(&self) -> Vec<i64> {
        self.gids
            .iter()
            .zip(&self.do_own)
            .filter(|(_, &own)| own)
            .map(|(&gid, _)| gid)
            .collect()
    }

    pub fn global_to_local(&self) -> HashMap<i64, usize> {
        self.gids
            .iter()
            .enumerate()
            .map(|(l, &g)| (g, l))
            .collect()
    }
}
