//! Partition-vector files
//!
//! Layout, little-endian: `i32 nranks, i64 nnodes, i32[nnodes] node_owner`
//! with Fortran-indexed owners on disk. Export and import run in chunks of
//! the global id space so no rank ever materializes the whole vector twice;
//! the root does the file I/O and the chunks travel through the dense
//! gather / broadcast path. An explicit `swap` flag serves big-endian
//! producers and consumers.

use crate::error::{DcifError, Result};
use crate::topology::Topology;
use chimera_comm::linear::range_for_worker;
use chimera_comm::ProcessGroup;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use tracing::{debug, info};

const CHUNK: i64 = 100_000;
const FORTRAN: i32 = 1;

pub struct PartVectorIo<'a> {
    group: &'a ProcessGroup,
    swap: bool,
}

impl<'a> PartVectorIo<'a> {
    pub fn new(group: &'a ProcessGroup) -> Self {
        Self { group, swap: false }
    }

    /// Byte-swap every word on the way in and out.
    pub fn with_swap(group: &'a ProcessGroup) -> Self {
        Self { group, swap: true }
    }

    fn fix(&self, value: i32) -> i32 {
        if self.swap {
            value.swap_bytes()
        } else {
            value
        }
    }

    fn fix64(&self, value: i64) -> i64 {
        if self.swap {
            value.swap_bytes()
        } else {
            value
        }
    }

    /// Collective: write each owned node's rank, dense by global id.
    pub fn export(&self, path: impl AsRef<Path>, topology: &Topology) -> Result<()> {
        let my_gids = topology.owned_gids();
        let total: i64 = self.group.parallel_sum(my_gids.len() as i64)?;
        let mut file = if self.group.rank() == 0 {
            info!(total, "exporting partition vector");
            let mut out = BufWriter::new(File::create(path)?);
            out.write_all(&self.fix(self.group.size() as i32).to_le_bytes())?;
            out.write_all(&self.fix64(total).to_le_bytes())?;
            Some(out)
        } else {
            None
        };

        let nchunks = total / CHUNK + 1;
        for chunk_id in 0..nchunks {
            let range = range_for_worker(chunk_id, total, nchunks);
            debug!(start = range.start, end = range.end, "exporting chunk");
            let mut gids_in_range = Vec::new();
            for &gid in &my_gids {
                if range.contains(gid) {
                    gids_in_range.push(gid - range.start);
                }
            }
            let ranks = vec![self.group.rank() as i32; gids_in_range.len()];
            let dense = self.group.gather_and_sort(&ranks, 1, &gids_in_range, 0)?;
            if let (Some(out), Some(dense)) = (file.as_mut(), dense) {
                for owner in dense {
                    out.write_all(&self.fix(owner + FORTRAN).to_le_bytes())?;
                }
            }
        }
        if let Some(mut out) = file {
            out.flush()?;
        }
        Ok(())
    }

    /// Collective: read the owner of each of this rank's nodes.
    pub fn import(&self, path: impl AsRef<Path>, topology: &Topology) -> Result<Vec<i32>> {
        let my_gids = topology.owned_gids();
        let mut file = None;
        let mut total = 0i64;
        if self.group.rank() == 0 {
            let mut source = BufReader::new(File::open(path)?);
            let mut word = [0u8; 4];
            source.read_exact(&mut word)?;
            let nranks = self.fix(i32::from_le_bytes(word));
            let mut long_word = [0u8; 8];
            source.read_exact(&mut long_word)?;
            total = self.fix64(i64::from_le_bytes(long_word));
            info!(nranks, total, "importing partition vector");
            if nranks as usize != self.group.size() {
                return Err(DcifError::Configuration(format!(
                    "file was written by {nranks} ranks, group has {}",
                    self.group.size()
                )));
            }
            file = Some(source);
        }
        self.group.broadcast(&mut total, 0)?;

        let mut part = vec![0i32; my_gids.len()];
        let nchunks = total / CHUNK + 1;
        for chunk_id in 0..nchunks {
            let range = range_for_worker(chunk_id, total, nchunks);
            let mut chunk = Vec::new();
            if let Some(source) = file.as_mut() {
                chunk.reserve(range.len() as usize);
                let mut word = [0u8; 4];
                for _ in 0..range.len() {
                    source.read_exact(&mut word)?;
                    chunk.push(self.fix(i32::from_le_bytes(word)) - FORTRAN);
                }
            }
            self.group.broadcast_vec(&mut chunk, 0)?;
            for (i, &gid) in my_gids.iter().enumerate() {
                if range.contains(gid) {
                    part[i] = chunk[(gid - range.start) as usize];
                }
            }
        }
        Ok(part)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chimera_comm::local::spawn_group;

    fn topology_for(rank: usize) -> Topology {
        // rank 0 owns even gids, rank 1 odd, 10 nodes total
        let gids: Vec<i64> = (0..10).filter(|g| (g % 2) as usize == rank).collect();
        let owned = vec![true; gids.len()];
        Topology::new(gids, owned)
    }

    #[test]
    fn test_export_import_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("parts.bin");
        spawn_group(2, move |group| {
            let topology = topology_for(group.rank());
            let io = PartVectorIo::new(&group);
            io.export(&path, &topology).unwrap();
            group.barrier().unwrap();

            let part = io.import(&path, &topology).unwrap();
            // every node reads back its own rank
            assert_eq!(part, vec![group.rank() as i32; topology.owned_count()]);
        });
    }

    #[test]
    fn test_file_is_fortran_indexed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("parts.bin");
        spawn_group(1, move |group| {
            let topology = Topology::new(vec![0, 1, 2], vec![true; 3]);
            PartVectorIo::new(&group).export(&path, &topology).unwrap();
            let bytes = std::fs::read(&path).unwrap();
            assert_eq!(i32::from_le_bytes(bytes[0..4].try_into().unwrap()), 1);
            assert_eq!(i64::from_le_bytes(bytes[4..12].try_into().unwrap()), 3);
            // rank 0 owner stored as 1
            assert_eq!(i32::from_le_bytes(bytes[12..16].try_into().unwrap()), 1);
        });
    }

    #[test]
    fn test_swapped_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("parts-swapped.bin");
        spawn_group(1, move |group| {
            let topology = Topology::new(vec![0, 1], vec![true; 2]);
            let io = PartVectorIo::with_swap(&group);
            io.export(&path, &topology).unwrap();
            // a swapped file reads garbage without the flag
            let plain = PartVectorIo::new(&group);
            assert!(plain.import(&path, &topology).is_err());
            let part = io.import(&path, &topology).unwrap();
            assert_eq!(part, vec![0, 0]);
        });
    }

    #[test]
    fn test_rank_count_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("parts.bin");
        spawn_group(1, move |group| {
            let topology = Topology::new(vec![0], vec![true]);
            PartVectorIo::new(&group).export(&path, &topology).unwrap();
            // hand-rewrite the rank count
            let mut bytes = std::fs::read(&path).unwrap();
            bytes[0..4].copy_from_slice(&7i32.to_le_bytes());
            std::fs::write(&path, bytes).unwrap();
            let err = PartVectorIo::new(&group).import(&path, &topology).unwrap_err();
            assert!(matches!(err, DcifError::Configuration(_)));
        });
    }
}
