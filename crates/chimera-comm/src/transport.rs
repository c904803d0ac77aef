//! Group-oriented transport contract
//!
//! The facade assumes a transport offering rank/size, blocking and
//! non-blocking point-to-point, probe, barriers, the byte-level collectives,
//! reductions with a caller-supplied combine, one-sided windows, and split.
//! Collectives carry provided lowerings onto point-to-point so a minimal
//! transport only implements the primitives; a native implementation may
//! override any of them.

use crate::error::{CommError, Result};
use crate::status::{RecvHandle, Status};
use std::sync::Arc;

/// Reserved tags for the provided collective lowerings. Collectives are
/// program-ordered per rank, so serial reuse of one tag per primitive is
/// safe; user point-to-point traffic uses non-negative tags.
pub const TAG_BARRIER: i32 = -1;
pub const TAG_GATHER: i32 = -2;
pub const TAG_SCATTER: i32 = -3;
pub const TAG_BCAST: i32 = -4;
pub const TAG_ALLTOALL: i32 = -5;

/// Result of probing for an incoming message.
#[derive(Clone, Copy, Debug)]
pub struct ProbeResult {
    pub source: usize,
    pub tag: i32,
    pub bytes: usize,
}

/// Element-wise combine for reductions: fold the left element into the
/// right-hand buffer. Carried per call; no global operator state.
pub type Combine<'a> = &'a (dyn Fn(&[u8], &mut [u8]) + Sync);

/// One-sided window over a per-rank byte buffer.
pub trait Window: Send + Sync {
    fn get(&self, rank: usize, offset: usize, len: usize) -> Result<Vec<u8>>;
    fn put(&self, rank: usize, offset: usize, bytes: &[u8]) -> Result<()>;
    /// Atomically add to an i64 slot and return the previous value.
    fn fetch_add_i64(&self, rank: usize, offset: usize, delta: i64) -> Result<i64>;
}

pub trait Transport: Send + Sync {
    fn rank(&self) -> usize;
    fn size(&self) -> usize;

    fn send(&self, bytes: &[u8], dest: usize, tag: i32) -> Result<()>;
    fn recv(&self, source: usize, tag: i32) -> Result<Vec<u8>>;
    /// Receive the oldest pending message with the given tag from any source.
    fn recv_any(&self, tag: i32) -> Result<(usize, Vec<u8>)>;
    /// Block until any message is pending and describe it without consuming.
    fn probe(&self) -> Result<ProbeResult>;

    fn isend(&self, bytes: Vec<u8>, dest: usize, tag: i32) -> Result<Status>;
    fn irecv(&self, source: usize, tag: i32) -> Result<RecvHandle>;

    fn ibarrier(&self) -> Result<Status>;

    /// Tear the group down; every pending and future operation fails.
    fn abort(&self, code: i32);

    /// Collective: create a sub-group of the ranks sharing `color`.
    fn split(&self, color: i32) -> Result<Arc<dyn Transport>>;

    /// Collective: expose `local` for one-sided access by the whole group.
    fn create_window(&self, local: Vec<u8>) -> Result<Arc<dyn Window>>;

    fn barrier(&self) -> Result<()> {
        if self.rank() != 0 {
            self.send(&[], 0, TAG_BARRIER)?;
            self.recv(0, TAG_BARRIER)?;
        } else {
            for r in 1..self.size() {
                self.recv(r, TAG_BARRIER)?;
            }
            for r in 1..self.size() {
                self.send(&[], r, TAG_BARRIER)?;
            }
        }
        Ok(())
    }

    /// Gather every rank's bytes to `root`, in rank order.
    fn gatherv(&self, bytes: &[u8], root: usize) -> Result<Option<Vec<Vec<u8>>>> {
        if self.rank() != root {
            self.send(bytes, root, TAG_GATHER)?;
            return Ok(None);
        }
        let mut rows = Vec::with_capacity(self.size());
        for r in 0..self.size() {
            if r == root {
                rows.push(bytes.to_vec());
            } else {
                rows.push(self.recv(r, TAG_GATHER)?);
            }
        }
        Ok(Some(rows))
    }

    /// Scatter one byte row per rank from `root`; only the root supplies rows.
    fn scatterv(&self, rows: Option<&[Vec<u8>]>, root: usize) -> Result<Vec<u8>> {
        if self.rank() == root {
            let rows = rows.ok_or_else(|| {
                CommError::Configuration("scatter root must supply one row per rank".into())
            })?;
            if rows.len() != self.size() {
                return Err(CommError::Configuration(format!(
                    "scatter expected {} rows, got {}",
                    self.size(),
                    rows.len()
                )));
            }
            for (r, row) in rows.iter().enumerate() {
                if r != root {
                    self.send(row, r, TAG_SCATTER)?;
                }
            }
            Ok(rows[root].clone())
        } else {
            self.recv(root, TAG_SCATTER)
        }
    }

    /// Broadcast the root's bytes to every rank; all ranks return the payload.
    fn bcast(&self, bytes: Vec<u8>, root: usize) -> Result<Vec<u8>> {
        if self.rank() == root {
            for r in 0..self.size() {
                if r != root {
                    self.send(&bytes, r, TAG_BCAST)?;
                }
            }
            Ok(bytes)
        } else {
            self.recv(root, TAG_BCAST)
        }
    }

    /// Variable-length all-to-all: `sends[d]` goes to rank `d`; the result
    /// holds one row per source rank.
    fn alltoallv(&self, sends: Vec<Vec<u8>>) -> Result<Vec<Vec<u8>>> {
        if sends.len() != self.size() {
            return Err(CommError::Configuration(format!(
                "all-to-all expected {} rows, got {}",
                self.size(),
                sends.len()
            )));
        }
        let me = self.rank();
        let mut received = vec![Vec::new(); self.size()];
        for (d, row) in sends.iter().enumerate() {
            if d != me {
                self.send(row, d, TAG_ALLTOALL)?;
            }
        }
        for (s, slot) in received.iter_mut().enumerate() {
            if s == me {
                *slot = sends[me].clone();
            } else {
                *slot = self.recv(s, TAG_ALLTOALL)?;
            }
        }
        Ok(received)
    }

    /// All-reduce `bytes` (a whole number of `elem_size` elements) with the
    /// per-call combine. Every rank returns the reduced buffer.
    fn allreduce(&self, bytes: &[u8], elem_size: usize, combine: Combine) -> Result<Vec<u8>> {
        if elem_size == 0 || bytes.len() % elem_size != 0 {
            return Err(CommError::Invariant(format!(
                "reduction buffer of {} bytes is not a multiple of element size {}",
                bytes.len(),
                elem_size
            )));
        }
        let acc = if let Some(rows) = self.gatherv(bytes, 0)? {
            let mut acc = rows[0].clone();
            for row in &rows[1..] {
                if row.len() != acc.len() {
                    return Err(CommError::Invariant(
                        "ranks supplied reduction buffers of different lengths".into(),
                    ));
                }
                for (a, b) in row.chunks_exact(elem_size).zip(acc.chunks_exact_mut(elem_size)) {
                    combine(a, b);
                }
            }
            acc
        } else {
            Vec::new()
        };
        self.bcast(acc, 0)
    }
}
