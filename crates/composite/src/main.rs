//! composite - combine multiple component grids into a single domain
//!
//! Reads a composite builder script, merges the component grids into one
//! UGRID file (each grid moved by its motion matrix, nodes and surface
//! tags renumbered past the previous grids'), combines the per-grid
//! boundary condition maps into `<base>.mapbc` (optionally prefixed by
//! body name and lumped by family name), and writes the per-grid
//! node-count file the solver uses to tell component grids apart.

mod bodies;
mod config;
mod mapbc;
mod script;
mod ugrid;

use anyhow::Context;
use clap::Parser;
use config::Config;
use mapbc::BoundaryConditionMap;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// The combined boundary map plus, per grid, the original-tag to
/// composite-tag renumbering its surface elements must go through.
fn combined_mapbc(
    entries: &[script::GridEntry],
    lump: bool,
) -> anyhow::Result<(BoundaryConditionMap, Vec<BTreeMap<i32, i32>>)> {
    let mut maps = Vec::with_capacity(entries.len());
    let mut per_grid_remaps = Vec::with_capacity(entries.len());
    for entry in entries {
        info!("importing mapbc file: {}", entry.mapbc_file.display());
        let text = std::fs::read_to_string(&entry.mapbc_file)
            .with_context(|| format!("reading {}", entry.mapbc_file.display()))?;
        let mut map = mapbc::parse(&text)
            .with_context(|| format!("parsing {}", entry.mapbc_file.display()))?;
        if let Some(body) = &entry.body_name {
            mapbc::apply_body_name(&mut map, body);
        }
        let remap: BTreeMap<i32, i32> = if lump {
            let (lumped, old_to_new) = mapbc::lump_by_name(&map);
            map = lumped;
            old_to_new
        } else {
            map.keys().map(|&tag| (tag, tag)).collect()
        };
        per_grid_remaps.push(remap);
        maps.push(map);
    }
    let (combined, offsets) = mapbc::combine(&maps);
    let tag_maps = per_grid_remaps
        .into_iter()
        .zip(&offsets)
        .map(|(remap, &offset)| {
            remap
                .into_iter()
                .map(|(old, new)| (old, new + offset))
                .collect()
        })
        .collect();
    Ok((combined, tag_maps))
}

/// The combined map lands beside the grid, named by the grid's base.
fn mapbc_path_for(grid_output: &Path) -> PathBuf {
    let name = grid_output
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("composite");
    let base = name
        .strip_suffix(".lb8.ugrid")
        .or_else(|| name.strip_suffix(".b8.ugrid"))
        .or_else(|| name.strip_suffix(".ugrid"))
        .unwrap_or(name);
    grid_output.with_file_name(format!("{base}.mapbc"))
}

fn imesh_lines(node_counts: &[i64]) -> String {
    // the last component grid carries imesh 0 by solver convention
    let mut out = String::new();
    let _ = writeln!(out, "{}", node_counts.len());
    for (i, count) in node_counts.iter().enumerate() {
        let imesh = if i + 1 == node_counts.len() { 0 } else { i + 1 };
        let _ = writeln!(out, "{count} {imesh}");
    }
    out
}

fn check_moving_bodies(bodies: &[bodies::Body], map: &BoundaryConditionMap) -> anyhow::Result<()> {
    for body in bodies {
        for &tag in &body.tags {
            if !map.contains_key(&tag) {
                anyhow::bail!(
                    "body `{}` references boundary tag {tag} missing from the combined mapbc",
                    body.name
                );
            }
        }
        info!(body = %body.name, tags = ?body.tags, "moving body tags verified");
    }
    Ok(())
}

fn run(config: &Config) -> anyhow::Result<()> {
    info!("loading: {}", config.input.display());
    let text = std::fs::read_to_string(&config.input)
        .with_context(|| format!("reading {}", config.input.display()))?;
    let entries = script::parse(&text)?;

    let (combined, tag_maps) = combined_mapbc(&entries, config.lump_bcs)?;
    let mapbc_path = mapbc_path_for(&config.output);
    info!("writing: {}", mapbc_path.display());
    std::fs::write(&mapbc_path, mapbc::render(&combined))?;

    if let Some(moving_body_path) = &config.moving_body_input {
        let text = std::fs::read_to_string(moving_body_path)
            .with_context(|| format!("reading {}", moving_body_path.display()))?;
        check_moving_bodies(&bodies::parse(&text)?, &combined)?;
    }

    if config.mapbc_only {
        return Ok(());
    }

    // merge the component grids into the single composite grid
    let mut merged = ugrid::UgridData::default();
    let mut node_counts = Vec::with_capacity(entries.len());
    for (entry, tags) in entries.iter().zip(&tag_maps) {
        let mut data = ugrid::read(&entry.grid_file)
            .with_context(|| format!("reading {}", entry.grid_file.display()))?;
        info!(
            grid = %entry.grid_file.display(),
            nodes = data.node_count() as i64,
            "component grid"
        );
        data.transform(&entry.motion);
        data.remap_tags(tags)
            .with_context(|| format!("renumbering tags of {}", entry.grid_file.display()))?;
        node_counts.push(data.node_count() as i64);
        merged.append(data);
    }
    info!(
        nodes = merged.node_count() as i64,
        "writing: {}", config.output.display()
    );
    ugrid::write(&config.output, &merged)?;

    info!("writing: {}", config.imesh.display());
    std::fs::write(&config.imesh, imesh_lines(&node_counts))?;
    Ok(())
}

fn main() -> ExitCode {
    let config = Config::parse();

    let filter = EnvFilter::from_default_env().add_directive("composite=info".parse().unwrap());
    if config.log_format == "json" {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry().with(fmt::layer()).with(filter).init();
    }

    if let Err(e) = run(&config) {
        error!("{e:#}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_imesh_numbering_matches_solver_convention() {
        let text = imesh_lines(&[100, 200, 300]);
        assert_eq!(text, "3\n100 1\n200 2\n300 0\n");
    }

    #[test]
    fn test_single_grid_imesh_is_zero() {
        assert_eq!(imesh_lines(&[50]), "1\n50 0\n");
    }

    #[test]
    fn test_mapbc_lands_beside_the_grid() {
        assert_eq!(
            mapbc_path_for(Path::new("out/composite.lb8.ugrid")),
            Path::new("out/composite.mapbc")
        );
        assert_eq!(
            mapbc_path_for(Path::new("wing.b8.ugrid")),
            Path::new("wing.mapbc")
        );
        assert_eq!(
            mapbc_path_for(Path::new("plain.ugrid")),
            Path::new("plain.mapbc")
        );
    }

    const TET_GRID: &str = "\
4 1 0 1 0 0 0
0.0 0.0 0.0
1.0 0.0 0.0
0.0 1.0 0.0
0.0 0.0 1.0
1 2 3
1
1 2 3 4
";

    #[test]
    fn test_end_to_end_merged_grid_mapbc_and_imesh() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("wing.ugrid"), TET_GRID).unwrap();
        std::fs::write(
            dir.path().join("wing.mapbc"),
            "2\n1 4000 surface\n2 5000 farfield\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("store.ugrid"), TET_GRID).unwrap();
        std::fs::write(
            dir.path().join("store.mapbc"),
            "2\n1 3000 surface\n2 5000 farfield\n",
        )
        .unwrap();
        let script_path = dir.path().join("build.txt");
        std::fs::write(
            &script_path,
            format!(
                "grid {} {} wing\n\
                 grid {} {} store\n\
                 motion 1 0 0 0  0 1 0 0  0 0 1 2.5  0 0 0 1\n",
                dir.path().join("wing.ugrid").display(),
                dir.path().join("wing.mapbc").display(),
                dir.path().join("store.ugrid").display(),
                dir.path().join("store.mapbc").display(),
            ),
        )
        .unwrap();

        let config = Config {
            input: script_path,
            output: dir.path().join("composite.ugrid"),
            imesh: dir.path().join("imesh.dat"),
            mapbc_only: false,
            lump_bcs: false,
            moving_body_input: None,
            log_format: "pretty".into(),
        };
        run(&config).unwrap();

        let mapbc_text = std::fs::read_to_string(dir.path().join("composite.mapbc")).unwrap();
        let combined = mapbc::parse(&mapbc_text).unwrap();
        assert_eq!(combined.len(), 4);
        // solid walls took their body names, the store's tags sit past the
        // wing's
        assert_eq!(combined[&1].1, "wing");
        assert_eq!(combined[&2].1, "wing_farfield");
        assert_eq!(combined[&3].1, "store");

        // the merged composite grid: both tets, the store's nodes moved
        // and renumbered, its surface tag re-offset
        let merged = ugrid::read(dir.path().join("composite.ugrid")).unwrap();
        assert_eq!(merged.node_count(), 8);
        assert_eq!(merged.tets, vec![0, 1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(merged.tris, vec![0, 1, 2, 4, 5, 6]);
        assert_eq!(merged.tri_tags, vec![1, 3]);
        assert_eq!(merged.nodes[4], [0.0, 0.0, 2.5]);
        assert_eq!(merged.nodes[0], [0.0, 0.0, 0.0]);

        let imesh = std::fs::read_to_string(dir.path().join("imesh.dat")).unwrap();
        assert_eq!(imesh, "2\n4 1\n4 0\n");
    }

    #[test]
    fn test_lumped_tags_flow_through_to_the_grid() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("wing.ugrid"), TET_GRID).unwrap();
        // two tags share a family name; lumping folds tag 2 into tag 1,
        // but the grid only references tag 1 so the remap stays total
        std::fs::write(dir.path().join("wing.mapbc"), "2\n1 4000 wall\n2 4000 wall\n").unwrap();
        let script_path = dir.path().join("build.txt");
        std::fs::write(
            &script_path,
            format!(
                "grid {} {}\n",
                dir.path().join("wing.ugrid").display(),
                dir.path().join("wing.mapbc").display(),
            ),
        )
        .unwrap();

        let config = Config {
            input: script_path,
            output: dir.path().join("composite.ugrid"),
            imesh: dir.path().join("imesh.dat"),
            mapbc_only: false,
            lump_bcs: true,
            moving_body_input: None,
            log_format: "pretty".into(),
        };
        run(&config).unwrap();

        let mapbc_text = std::fs::read_to_string(dir.path().join("composite.mapbc")).unwrap();
        let combined = mapbc::parse(&mapbc_text).unwrap();
        assert_eq!(combined.len(), 1);
        let merged = ugrid::read(dir.path().join("composite.ugrid")).unwrap();
        assert_eq!(merged.tri_tags, vec![1]);
    }

    #[test]
    fn test_missing_moving_body_tag_fails() {
        let map = mapbc::parse("1\n1 4000 wall\n").unwrap();
        let body = bodies::Body {
            name: "store".into(),
            tags: vec![9],
        };
        assert!(check_moving_bodies(&[body], &map).is_err());
    }
}
