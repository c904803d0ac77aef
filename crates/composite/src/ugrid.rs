//! UGRID component grids
//!
//! Layout: a 7-integer header (nodes, tris, quads, tets, pyramids, prisms,
//! hexes), node coordinates, triangle and quad connectivity, triangle and
//! quad surface tags, then tet/pyramid/prism/hex connectivity, all node
//! references 1-based on disk. The flavor comes from the filename:
//! `.lb8.ugrid` is little-endian i64/f64, `.b8.ugrid` big-endian, plain
//! `.ugrid` is ascii. These three flavors are all the composite tool
//! consumes and emits; general-purpose grid export lives elsewhere.

use anyhow::{bail, Context};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

const FORTRAN: i64 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flavor {
    Ascii,
    LittleEndian,
    BigEndian,
}

impl Flavor {
    pub fn of(path: &Path) -> anyhow::Result<Flavor> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .context("grid path has no file name")?;
        if name.ends_with(".lb8.ugrid") {
            Ok(Flavor::LittleEndian)
        } else if name.ends_with(".b8.ugrid") {
            Ok(Flavor::BigEndian)
        } else if name.ends_with(".ugrid") {
            Ok(Flavor::Ascii)
        } else {
            bail!("unrecognized grid flavor: {name}")
        }
    }
}

/// One grid's worth of nodes and cells; node references are 0-based in
/// memory and per-kind connectivity is flat.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UgridData {
    pub nodes: Vec<[f64; 3]>,
    pub tris: Vec<i64>,
    pub tri_tags: Vec<i64>,
    pub quads: Vec<i64>,
    pub quad_tags: Vec<i64>,
    pub tets: Vec<i64>,
    pub pyramids: Vec<i64>,
    pub prisms: Vec<i64>,
    pub hexes: Vec<i64>,
}

impl UgridData {
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Apply a row-major 4x4 transform to every node.
    pub fn transform(&mut self, motion: &[[f64; 4]; 4]) {
        for p in &mut self.nodes {
            let q = [p[0], p[1], p[2], 1.0];
            let mut moved = [0.0f64; 3];
            for (row, out) in moved.iter_mut().enumerate() {
                *out = (0..4).map(|col| motion[row][col] * q[col]).sum();
            }
            *p = moved;
        }
    }

    /// Renumber every surface tag through the grid's slot in the combined
    /// boundary map; a tag the map does not know is an error.
    pub fn remap_tags(&mut self, tag_of: &BTreeMap<i32, i32>) -> anyhow::Result<()> {
        for tag in self.tri_tags.iter_mut().chain(self.quad_tags.iter_mut()) {
            let renumbered = tag_of
                .get(&(*tag as i32))
                .with_context(|| format!("surface tag {tag} missing from the mapbc"))?;
            *tag = *renumbered as i64;
        }
        Ok(())
    }

    /// Append another grid, offsetting its node references past this one's.
    pub fn append(&mut self, other: UgridData) {
        let offset = self.nodes.len() as i64;
        self.nodes.extend(other.nodes);
        self.tris.extend(other.tris.into_iter().map(|n| n + offset));
        self.tri_tags.extend(other.tri_tags);
        self.quads.extend(other.quads.into_iter().map(|n| n + offset));
        self.quad_tags.extend(other.quad_tags);
        self.tets.extend(other.tets.into_iter().map(|n| n + offset));
        self.pyramids
            .extend(other.pyramids.into_iter().map(|n| n + offset));
        self.prisms
            .extend(other.prisms.into_iter().map(|n| n + offset));
        self.hexes.extend(other.hexes.into_iter().map(|n| n + offset));
    }

    fn counts(&self) -> [i64; 7] {
        [
            self.nodes.len() as i64,
            (self.tris.len() / 3) as i64,
            (self.quads.len() / 4) as i64,
            (self.tets.len() / 4) as i64,
            (self.pyramids.len() / 5) as i64,
            (self.prisms.len() / 6) as i64,
            (self.hexes.len() / 8) as i64,
        ]
    }
}

pub fn read(path: impl AsRef<Path>) -> anyhow::Result<UgridData> {
    let path = path.as_ref();
    match Flavor::of(path)? {
        Flavor::Ascii => read_ascii(path),
        flavor => read_binary(path, flavor == Flavor::BigEndian),
    }
}

pub fn write(path: impl AsRef<Path>, data: &UgridData) -> anyhow::Result<()> {
    let path = path.as_ref();
    match Flavor::of(path)? {
        Flavor::Ascii => write_ascii(path, data),
        flavor => write_binary(path, data, flavor == Flavor::BigEndian),
    }
}

fn check_counts(counts: &[i64; 7]) -> anyhow::Result<()> {
    if counts.iter().any(|&c| c < 0) {
        bail!("grid header has negative counts: {counts:?}");
    }
    Ok(())
}

fn next_i64<'a>(tokens: &mut impl Iterator<Item = &'a str>) -> anyhow::Result<i64> {
    tokens
        .next()
        .context("grid file ended early")?
        .parse::<i64>()
        .context("expected an integer")
}

fn next_f64<'a>(tokens: &mut impl Iterator<Item = &'a str>) -> anyhow::Result<f64> {
    tokens
        .next()
        .context("grid file ended early")?
        .parse::<f64>()
        .context("expected a real")
}

fn read_ascii(path: &Path) -> anyhow::Result<UgridData> {
    let text = std::fs::read_to_string(path)?;
    let mut tokens = text.split_whitespace();
    let mut counts = [0i64; 7];
    for slot in &mut counts {
        *slot = next_i64(&mut tokens)?;
    }
    check_counts(&counts)?;
    let [nnodes, ntris, nquads, ntets, npyramids, nprisms, nhexes] = counts;

    let mut data = UgridData::default();
    for _ in 0..nnodes {
        let x = next_f64(&mut tokens)?;
        let y = next_f64(&mut tokens)?;
        let z = next_f64(&mut tokens)?;
        data.nodes.push([x, y, z]);
    }
    for _ in 0..3 * ntris {
        data.tris.push(next_i64(&mut tokens)? - FORTRAN);
    }
    for _ in 0..4 * nquads {
        data.quads.push(next_i64(&mut tokens)? - FORTRAN);
    }
    for _ in 0..ntris {
        data.tri_tags.push(next_i64(&mut tokens)?);
    }
    for _ in 0..nquads {
        data.quad_tags.push(next_i64(&mut tokens)?);
    }
    for _ in 0..4 * ntets {
        data.tets.push(next_i64(&mut tokens)? - FORTRAN);
    }
    for _ in 0..5 * npyramids {
        data.pyramids.push(next_i64(&mut tokens)? - FORTRAN);
    }
    for _ in 0..6 * nprisms {
        data.prisms.push(next_i64(&mut tokens)? - FORTRAN);
    }
    for _ in 0..8 * nhexes {
        data.hexes.push(next_i64(&mut tokens)? - FORTRAN);
    }
    Ok(data)
}

struct WordReader<R> {
    inner: R,
    big_endian: bool,
}

impl<R: Read> WordReader<R> {
    fn i64(&mut self) -> anyhow::Result<i64> {
        let mut raw = [0u8; 8];
        self.inner.read_exact(&mut raw)?;
        Ok(if self.big_endian {
            i64::from_be_bytes(raw)
        } else {
            i64::from_le_bytes(raw)
        })
    }

    fn f64(&mut self) -> anyhow::Result<f64> {
        let mut raw = [0u8; 8];
        self.inner.read_exact(&mut raw)?;
        Ok(if self.big_endian {
            f64::from_be_bytes(raw)
        } else {
            f64::from_le_bytes(raw)
        })
    }
}

fn read_binary(path: &Path, big_endian: bool) -> anyhow::Result<UgridData> {
    let mut source = WordReader {
        inner: BufReader::new(File::open(path)?),
        big_endian,
    };
    let mut counts = [0i64; 7];
    for slot in &mut counts {
        *slot = source.i64()?;
    }
    check_counts(&counts)?;
    let [nnodes, ntris, nquads, ntets, npyramids, nprisms, nhexes] = counts;

    let mut data = UgridData::default();
    for _ in 0..nnodes {
        let x = source.f64()?;
        let y = source.f64()?;
        let z = source.f64()?;
        data.nodes.push([x, y, z]);
    }
    for _ in 0..3 * ntris {
        data.tris.push(source.i64()? - FORTRAN);
    }
    for _ in 0..4 * nquads {
        data.quads.push(source.i64()? - FORTRAN);
    }
    for _ in 0..ntris {
        data.tri_tags.push(source.i64()?);
    }
    for _ in 0..nquads {
        data.quad_tags.push(source.i64()?);
    }
    for _ in 0..4 * ntets {
        data.tets.push(source.i64()? - FORTRAN);
    }
    for _ in 0..5 * npyramids {
        data.pyramids.push(source.i64()? - FORTRAN);
    }
    for _ in 0..6 * nprisms {
        data.prisms.push(source.i64()? - FORTRAN);
    }
    for _ in 0..8 * nhexes {
        data.hexes.push(source.i64()? - FORTRAN);
    }
    Ok(data)
}

fn write_ascii(path: &Path, data: &UgridData) -> anyhow::Result<()> {
    let counts = data.counts();
    let mut text = String::new();
    let _ = writeln!(
        text,
        "{} {} {} {} {} {} {}",
        counts[0], counts[1], counts[2], counts[3], counts[4], counts[5], counts[6]
    );
    for p in &data.nodes {
        let _ = writeln!(text, "{} {} {}", p[0], p[1], p[2]);
    }
    for cell in data.tris.chunks_exact(3) {
        let _ = writeln!(text, "{} {} {}", cell[0] + FORTRAN, cell[1] + FORTRAN, cell[2] + FORTRAN);
    }
    for cell in data.quads.chunks_exact(4) {
        let line: Vec<String> = cell.iter().map(|&n| (n + FORTRAN).to_string()).collect();
        let _ = writeln!(text, "{}", line.join(" "));
    }
    for tag in &data.tri_tags {
        let _ = writeln!(text, "{tag}");
    }
    for tag in &data.quad_tags {
        let _ = writeln!(text, "{tag}");
    }
    for (flat, arity) in [
        (&data.tets, 4usize),
        (&data.pyramids, 5),
        (&data.prisms, 6),
        (&data.hexes, 8),
    ] {
        for cell in flat.chunks_exact(arity) {
            let line: Vec<String> = cell.iter().map(|&n| (n + FORTRAN).to_string()).collect();
            let _ = writeln!(text, "{}", line.join(" "));
        }
    }
    std::fs::write(path, text)?;
    Ok(())
}

struct WordWriter<W> {
    inner: W,
    big_endian: bool,
}

impl<W: Write> WordWriter<W> {
    fn i64(&mut self, value: i64) -> anyhow::Result<()> {
        let raw = if self.big_endian {
            value.to_be_bytes()
        } else {
            value.to_le_bytes()
        };
        self.inner.write_all(&raw)?;
        Ok(())
    }

    fn f64(&mut self, value: f64) -> anyhow::Result<()> {
        let raw = if self.big_endian {
            value.to_be_bytes()
        } else {
            value.to_le_bytes()
        };
        self.inner.write_all(&raw)?;
        Ok(())
    }
}

fn write_binary(path: &Path, data: &UgridData, big_endian: bool) -> anyhow::Result<()> {
    let mut out = WordWriter {
        inner: BufWriter::new(File::create(path)?),
        big_endian,
    };
    for count in data.counts() {
        out.i64(count)?;
    }
    for p in &data.nodes {
        out.f64(p[0])?;
        out.f64(p[1])?;
        out.f64(p[2])?;
    }
    for &n in &data.tris {
        out.i64(n + FORTRAN)?;
    }
    for &n in &data.quads {
        out.i64(n + FORTRAN)?;
    }
    for &tag in &data.tri_tags {
        out.i64(tag)?;
    }
    for &tag in &data.quad_tags {
        out.i64(tag)?;
    }
    for flat in [&data.tets, &data.pyramids, &data.prisms, &data.hexes] {
        for &n in flat {
            out.i64(n + FORTRAN)?;
        }
    }
    out.inner.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tet_with_tri() -> UgridData {
        UgridData {
            nodes: vec![
                [0.0, 0.0, 0.0],
                [1.0, 0.0, 0.0],
                [0.0, 1.0, 0.0],
                [0.0, 0.0, 1.0],
            ],
            tris: vec![0, 1, 2],
            tri_tags: vec![1],
            tets: vec![0, 1, 2, 3],
            ..UgridData::default()
        }
    }

    #[test]
    fn test_ascii_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tet.ugrid");
        let data = tet_with_tri();
        write(&path, &data).unwrap();
        assert_eq!(read(&path).unwrap(), data);
    }

    #[test]
    fn test_little_endian_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tet.lb8.ugrid");
        let data = tet_with_tri();
        write(&path, &data).unwrap();
        assert_eq!(read(&path).unwrap(), data);
    }

    #[test]
    fn test_big_endian_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tet.b8.ugrid");
        let data = tet_with_tri();
        write(&path, &data).unwrap();
        assert_eq!(read(&path).unwrap(), data);
        // connectivity really is Fortran-indexed big-endian on disk
        let bytes = std::fs::read(&path).unwrap();
        let first_tri_node = i64::from_be_bytes(
            bytes[7 * 8 + 12 * 8..7 * 8 + 12 * 8 + 8].try_into().unwrap(),
        );
        assert_eq!(first_tri_node, 1);
    }

    #[test]
    fn test_append_offsets_node_references() {
        let mut merged = tet_with_tri();
        merged.append(tet_with_tri());
        assert_eq!(merged.node_count(), 8);
        assert_eq!(merged.tris, vec![0, 1, 2, 4, 5, 6]);
        assert_eq!(merged.tets, vec![0, 1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(merged.tri_tags, vec![1, 1]);
    }

    #[test]
    fn test_transform_translates_nodes() {
        let mut data = tet_with_tri();
        let motion = [
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 2.5],
            [0.0, 0.0, 0.0, 1.0],
        ];
        data.transform(&motion);
        assert_eq!(data.nodes[0], [0.0, 0.0, 2.5]);
        assert_eq!(data.nodes[3], [0.0, 0.0, 3.5]);
    }

    #[test]
    fn test_remap_tags_renumbers_and_rejects_unknown() {
        let mut data = tet_with_tri();
        let tag_of: BTreeMap<i32, i32> = [(1, 5)].into_iter().collect();
        data.remap_tags(&tag_of).unwrap();
        assert_eq!(data.tri_tags, vec![5]);

        let empty = BTreeMap::new();
        assert!(data.remap_tags(&empty).is_err());
    }

    #[test]
    fn test_unknown_flavor_is_rejected() {
        assert!(read(Path::new("grid.cgns")).is_err());
    }

    #[test]
    fn test_truncated_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.ugrid");
        std::fs::write(&path, "4 1 0 1 0 0 0\n0.0 0.0\n").unwrap();
        assert!(read(&path).is_err());
    }
}
