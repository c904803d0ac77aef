//! DCIF file reader and writer
//!
//! All integers are little-endian on disk and node/donor ids are
//! Fortran-indexed (1-based). The reader detects a byte-swapped producer by
//! sanity-checking the header counts and re-swapping if any is negative or
//! larger than `MAX_REASONABLE_COUNT`.

use crate::error::{DcifError, Result};
use crate::flattened::{FlattenedDomainConnectivity, GridRange};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use tracing::info;

/// Explicit bound for the endianness heuristic: a header count beyond this
/// is treated as byte-swapped, not as a real size.
pub const MAX_REASONABLE_COUNT: i64 = i64::MAX / 2;

const FORTRAN: i64 = 1;

pub fn write(path: impl AsRef<Path>, dcif: &FlattenedDomainConnectivity) -> Result<()> {
    dcif.verify_consistency()?;
    let mut out = BufWriter::new(File::create(path)?);
    out.write_all(&dcif.node_count().to_le_bytes())?;
    out.write_all(&dcif.receptor_count().to_le_bytes())?;
    out.write_all(&dcif.donor_count().to_le_bytes())?;
    out.write_all(&dcif.grid_count().to_le_bytes())?;
    for &id in dcif.fringe_ids() {
        out.write_all(&(id + FORTRAN).to_le_bytes())?;
    }
    for &count in dcif.donor_counts() {
        out.write_all(&count.to_le_bytes())?;
    }
    for &id in dcif.donor_ids() {
        out.write_all(&(id + FORTRAN).to_le_bytes())?;
    }
    for &weight in dcif.donor_weights() {
        out.write_all(&weight.to_le_bytes())?;
    }
    for &blank in dcif.iblank() {
        out.write_all(&blank.to_le_bytes())?;
    }
    for grid in dcif.grids() {
        out.write_all(&(grid.start + FORTRAN).to_le_bytes())?;
        out.write_all(&(grid.end + FORTRAN).to_le_bytes())?;
        out.write_all(&grid.imesh.to_le_bytes())?;
    }
    out.flush()?;
    Ok(())
}

struct Source<R> {
    inner: R,
    swap: bool,
}

impl<R: Read> Source<R> {
    fn i64(&mut self) -> Result<i64> {
        let mut raw = [0u8; 8];
        self.inner.read_exact(&mut raw)?;
        if self.swap {
            raw.reverse();
        }
        Ok(i64::from_le_bytes(raw))
    }

    fn i32(&mut self) -> Result<i32> {
        let mut raw = [0u8; 4];
        self.inner.read_exact(&mut raw)?;
        if self.swap {
            raw.reverse();
        }
        Ok(i32::from_le_bytes(raw))
    }

    fn f64(&mut self) -> Result<f64> {
        let mut raw = [0u8; 8];
        self.inner.read_exact(&mut raw)?;
        if self.swap {
            raw.reverse();
        }
        Ok(f64::from_le_bytes(raw))
    }

    fn i8(&mut self) -> Result<i8> {
        let mut raw = [0u8; 1];
        self.inner.read_exact(&mut raw)?;
        Ok(raw[0] as i8)
    }
}

fn counts_are_absurd(nnodes: i64, nfringes: i64, ndonors: i64, ngrids: i32) -> bool {
    nnodes < 0
        || nfringes < 0
        || ndonors < 0
        || ngrids < 0
        || nnodes > MAX_REASONABLE_COUNT
        || nfringes > MAX_REASONABLE_COUNT
        || ndonors > MAX_REASONABLE_COUNT
}

pub fn read(path: impl AsRef<Path>) -> Result<FlattenedDomainConnectivity> {
    let path = path.as_ref();
    info!(path = %path.display(), "reading domain-connectivity file");
    let mut source = Source {
        inner: BufReader::new(File::open(path)?),
        swap: false,
    };
    let mut nnodes = source.i64()?;
    let mut nfringes = source.i64()?;
    let mut ndonors = source.i64()?;
    let mut ngrids = source.i32()?;
    if counts_are_absurd(nnodes, nfringes, ndonors, ngrids) {
        info!("header counts look byte-swapped, re-reading swapped");
        source.swap = true;
        nnodes = nnodes.swap_bytes();
        nfringes = nfringes.swap_bytes();
        ndonors = ndonors.swap_bytes();
        ngrids = ngrids.swap_bytes();
    }
    if counts_are_absurd(nnodes, nfringes, ndonors, ngrids) {
        return Err(DcifError::Invariant(format!(
            "header does not make sense in either byte order: \
             nnodes {nnodes}, nfringes {nfringes}, ndonors {ndonors}, ngrids {ngrids}"
        )));
    }
    info!(nnodes, nfringes, ndonors, ngrids, "header");

    let mut fringe_ids = Vec::with_capacity(nfringes as usize);
    for _ in 0..nfringes {
        fringe_ids.push(source.i64()? - FORTRAN);
    }
    let mut donor_counts = Vec::with_capacity(nfringes as usize);
    for _ in 0..nfringes {
        donor_counts.push(source.i8()?);
    }
    let mut donor_ids = Vec::with_capacity(ndonors as usize);
    for _ in 0..ndonors {
        donor_ids.push(source.i64()? - FORTRAN);
    }
    let mut donor_weights = Vec::with_capacity(ndonors as usize);
    for _ in 0..ndonors {
        donor_weights.push(source.f64()?);
    }
    let mut iblank = Vec::with_capacity(nnodes as usize);
    for _ in 0..nnodes {
        iblank.push(source.i8()?);
    }

    let mut dcif = FlattenedDomainConnectivity::new();
    dcif.set_receptor_ids(fringe_ids);
    dcif.set_donor_counts(donor_counts);
    dcif.set_donor_ids(donor_ids)?;
    dcif.set_donor_weights(donor_weights)?;
    dcif.set_iblank(iblank);
    for _ in 0..ngrids {
        let start = source.i64()? - FORTRAN;
        let end = source.i64()? - FORTRAN;
        let imesh = source.i32()?;
        dcif.add_grid(GridRange { start, end, imesh });
    }
    Ok(dcif)
}
