//! Configuration for the composite assembly helper

use clap::Parser;
use std::path::PathBuf;

/// composite - combine multiple component grids into one domain
#[derive(Parser, Debug, Clone)]
#[command(name = "composite")]
#[command(about = "Combine component-grid metadata into composite outputs")]
pub struct Config {
    /// Composite builder script: one `grid <grid> <mapbc> [body]` entry per
    /// line, optionally followed by a `motion <16 values>` line
    #[arg(short, long)]
    pub input: PathBuf,

    /// Output composite grid name, with its flavor extension (`.ugrid`,
    /// `.lb8.ugrid`, or `.b8.ugrid`); the combined map lands beside it at
    /// `<base>.mapbc`
    #[arg(short, long, default_value = "composite.lb8.ugrid")]
    pub output: PathBuf,

    /// Name of the per-grid node-count file
    #[arg(long, default_value = "imesh.dat")]
    pub imesh: PathBuf,

    /// Only create the combined mapbc, skip the grid headers
    #[arg(long)]
    pub mapbc_only: bool,

    /// Combine boundary tags with matching names into a single tag
    #[arg(long)]
    pub lump_bcs: bool,

    /// Solver moving-body input; its defining boundary tags are checked
    /// against the combined map
    #[arg(long)]
    pub moving_body_input: Option<PathBuf>,

    /// Log format (json or pretty)
    #[arg(long, default_value = "pretty")]
    pub log_format: String,
}
