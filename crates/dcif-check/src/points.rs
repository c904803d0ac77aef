//! Node-coordinate sidecar file
//!
//! Layout, little-endian: `i64 count` then `3*count` f64 values, xyz per
//! node in global-id order.

use anyhow::bail;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

pub fn read(path: impl AsRef<Path>) -> anyhow::Result<Vec<[f64; 3]>> {
    let mut source = BufReader::new(File::open(path)?);
    let mut word = [0u8; 8];
    source.read_exact(&mut word)?;
    let count = i64::from_le_bytes(word);
    if count < 0 {
        bail!("negative node count {count}");
    }
    let mut points = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let mut xyz = [0.0f64; 3];
        for value in &mut xyz {
            source.read_exact(&mut word)?;
            *value = f64::from_le_bytes(word);
        }
        points.push(xyz);
    }
    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_read_points_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("points.bin");
        let mut out = File::create(&path).unwrap();
        out.write_all(&2i64.to_le_bytes()).unwrap();
        for v in [0.0f64, 1.0, 2.0, 3.0, 4.0, 5.0] {
            out.write_all(&v.to_le_bytes()).unwrap();
        }
        drop(out);

        let points = read(&path).unwrap();
        assert_eq!(points, vec![[0.0, 1.0, 2.0], [3.0, 4.0, 5.0]]);
    }

    #[test]
    fn test_truncated_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.bin");
        std::fs::write(&path, 5i64.to_le_bytes()).unwrap();
        assert!(read(&path).is_err());
    }
}
