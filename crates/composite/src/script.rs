//! Composite builder script
//!
//! One component grid per `grid` line:
//! ```text
//! # component grids
//! grid wing.lb8.ugrid wing.mapbc wing
//! motion 1 0 0 0  0 1 0 0  0 0 1 2.5  0 0 0 1
//! grid store.b8.ugrid store.mapbc
//! ```
//! A `motion` line carries a row-major 4x4 transform for the preceding
//! grid; absent, the grid is unmoved. Blank lines and `#` comments are
//! skipped.

use anyhow::{bail, Context};
use std::path::PathBuf;

pub type MotionMatrix = [[f64; 4]; 4];

pub const IDENTITY: MotionMatrix = [
    [1.0, 0.0, 0.0, 0.0],
    [0.0, 1.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
    [0.0, 0.0, 0.0, 1.0],
];

#[derive(Clone, Debug, PartialEq)]
pub struct GridEntry {
    pub grid_file: PathBuf,
    pub mapbc_file: PathBuf,
    pub body_name: Option<String>,
    pub motion: MotionMatrix,
}

pub fn parse(input: &str) -> anyhow::Result<Vec<GridEntry>> {
    let mut entries: Vec<GridEntry> = Vec::new();
    for (lineno, raw) in input.lines().enumerate() {
        let line = raw.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let mut words = line.split_whitespace();
        match words.next() {
            Some("grid") => {
                let grid_file = words
                    .next()
                    .with_context(|| format!("line {}: grid entry without a file", lineno + 1))?;
                let mapbc_file = words.next().with_context(|| {
                    format!("line {}: grid entry without a mapbc file", lineno + 1)
                })?;
                let body_name = words.next().map(str::to_string);
                if words.next().is_some() {
                    bail!("line {}: trailing tokens after the body name", lineno + 1);
                }
                entries.push(GridEntry {
                    grid_file: grid_file.into(),
                    mapbc_file: mapbc_file.into(),
                    body_name,
                    motion: IDENTITY,
                });
            }
            Some("motion") => {
                let entry = entries
                    .last_mut()
                    .with_context(|| format!("line {}: motion before any grid", lineno + 1))?;
                let values: Vec<f64> = words
                    .map(str::parse)
                    .collect::<Result<_, _>>()
                    .with_context(|| format!("line {}: bad motion value", lineno + 1))?;
                if values.len() != 16 {
                    bail!(
                        "line {}: motion needs 16 values, got {}",
                        lineno + 1,
                        values.len()
                    );
                }
                for (r, row) in entry.motion.iter_mut().enumerate() {
                    row.copy_from_slice(&values[4 * r..4 * r + 4]);
                }
            }
            Some(other) => bail!("line {}: unknown directive `{other}`", lineno + 1),
            None => {}
        }
    }
    if entries.is_empty() {
        bail!("script lists no component grids");
    }
    Ok(entries)
}
