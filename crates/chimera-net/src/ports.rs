//! Group-wide port directory

use crate::error::{NetError, Result};
use chimera_comm::ProcessGroup;

/// Gathers every rank's listening ports once so that any rank can address
/// any peer's channels without further collective traffic.
pub struct PortMapper {
    ports_for_ranks: Vec<Vec<u16>>,
}

impl PortMapper {
    /// Collective: every rank contributes the ports it bound, one per
    /// channel.
    pub fn new(group: &ProcessGroup, my_ports: &[u16]) -> Result<PortMapper> {
        let as_i32: Vec<i32> = my_ports.iter().map(|&p| p as i32).collect();
        let gathered = group.gatherv(&as_i32)?;
        Ok(PortMapper {
            ports_for_ranks: gathered
                .into_iter()
                .map(|row| row.into_iter().map(|p| p as u16).collect())
                .collect(),
        })
    }

    pub fn port(&self, rank: usize, channel: usize) -> Result<u16> {
        self.ports_for_ranks
            .get(rank)
            .and_then(|channels| channels.get(channel))
            .copied()
            .ok_or_else(|| {
                NetError::Configuration(format!("no port for rank {rank} channel {channel}"))
            })
    }
}
