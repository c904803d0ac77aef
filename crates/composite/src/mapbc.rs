//! Boundary-condition maps
//!
//! A mapbc file names each boundary tag's condition:
//! ```text
//! 3
//! 1 4000 wing_surface
//! 2 5000 farfield
//! 3 5050 symmetry
//! ```
//! Combining grids re-offsets each grid's tags past the previous grids'.
//! Solid-wall conditions take the owning body's name outright; other
//! conditions get the body name as a prefix. Lumping merges tags whose
//! names match into the lowest participating tag.

use anyhow::{bail, Context};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use tracing::info;

/// tag -> (bc number, family name)
pub type BoundaryConditionMap = BTreeMap<i32, (i32, String)>;

pub fn parse(input: &str) -> anyhow::Result<BoundaryConditionMap> {
    let mut lines = input.lines().filter(|l| !l.trim().is_empty());
    let count: usize = lines
        .next()
        .context("mapbc is empty")?
        .trim()
        .parse()
        .context("mapbc first line is not a count")?;
    let mut map = BoundaryConditionMap::new();
    for _ in 0..count {
        let line = lines.next().context("mapbc ends before its count")?;
        let mut words = line.split_whitespace();
        let tag: i32 = words
            .next()
            .context("mapbc line without a tag")?
            .parse()
            .context("bad boundary tag")?;
        let bc: i32 = words
            .next()
            .context("mapbc line without a bc number")?
            .parse()
            .context("bad bc number")?;
        let name = words.collect::<Vec<_>>().join(" ");
        if map.insert(tag, (bc, name)).is_some() {
            bail!("duplicate boundary tag {tag}");
        }
    }
    Ok(map)
}

pub fn render(map: &BoundaryConditionMap) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", map.len());
    for (tag, (bc, name)) in map {
        let _ = writeln!(out, "{tag} {bc} {name}");
    }
    out
}

/// FUN3D solid-wall condition numbers.
fn is_solid_wall(bc: i32) -> bool {
    matches!(bc, 3000 | 4000)
}

/// Rename a grid's conditions for its body: solid walls take the body name,
/// everything else gets it as a prefix.
pub fn apply_body_name(map: &mut BoundaryConditionMap, body_name: &str) {
    if body_name.is_empty() {
        return;
    }
    for (bc, name) in map.values_mut() {
        let renamed = if is_solid_wall(*bc) {
            body_name.to_string()
        } else {
            format!("{body_name}_{name}")
        };
        info!("renaming boundary: {name} -> {renamed}");
        *name = renamed;
    }
}

/// Merge tags sharing a family name into the lowest participating tag.
/// Returns the old-tag -> new-tag mapping alongside the lumped map.
pub fn lump_by_name(map: &BoundaryConditionMap) -> (BoundaryConditionMap, BTreeMap<i32, i32>) {
    let mut first_tag_of: BTreeMap<&str, i32> = BTreeMap::new();
    let mut old_to_new = BTreeMap::new();
    let mut lumped = BoundaryConditionMap::new();
    for (&tag, (bc, name)) in map {
        let target = *first_tag_of.entry(name.as_str()).or_insert(tag);
        old_to_new.insert(tag, target);
        lumped.entry(target).or_insert_with(|| (*bc, name.clone()));
    }
    (lumped, old_to_new)
}

/// Concatenate per-grid maps into one, offsetting each grid's tags past the
/// largest tag so far. Returns the combined map and each grid's tag offset.
pub fn combine(maps: &[BoundaryConditionMap]) -> (BoundaryConditionMap, Vec<i32>) {
    let mut combined = BoundaryConditionMap::new();
    let mut offsets = Vec::with_capacity(maps.len());
    let mut offset = 0;
    for map in maps {
        offsets.push(offset);
        for (&tag, entry) in map {
            combined.insert(tag + offset, entry.clone());
        }
        offset = combined.keys().next_back().copied().unwrap_or(0);
    }
    (combined, offsets)
}
