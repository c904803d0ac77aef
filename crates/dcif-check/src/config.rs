//! Configuration for dcif-check

use clap::Parser;
use std::path::PathBuf;

/// dcif-check - verify a domain-connectivity interchange file
#[derive(Parser, Debug, Clone)]
#[command(name = "dcif-check")]
#[command(about = "Check a domain-connectivity file for consistency")]
pub struct Config {
    /// The DCIF file to check
    #[arg(short, long)]
    pub input: PathBuf,

    /// Node coordinates for the linear-reconstruction check: little-endian
    /// i64 count followed by 3*count f64 values
    #[arg(short, long)]
    pub points: Option<PathBuf>,

    /// Emit a JSON summary on stdout
    #[arg(long)]
    pub report: bool,

    /// Log format (json or pretty)
    #[arg(long, default_value = "pretty")]
    pub log_format: String,
}
