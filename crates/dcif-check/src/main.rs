//! dcif-check - domain-connectivity file checker
//!
//! Verifies the structural invariants of a DCIF file (blanking counts,
//! receptor ids) and, given node coordinates, that every donor stencil
//! recovers a linear field to interpolation accuracy.

mod config;
mod points;

use anyhow::Context;
use chimera_dcif::checker;
use clap::Parser;
use config::Config;
use serde::Serialize;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Serialize)]
struct CheckReport {
    nodes: i64,
    fringes: i64,
    donors: i64,
    grids: i32,
    interpolation: Option<checker::InterpolationError>,
}

fn run(config: &Config) -> anyhow::Result<CheckReport> {
    let dcif = chimera_dcif::read(&config.input)
        .with_context(|| format!("reading {}", config.input.display()))?;

    checker::check_receptor_counts(dcif.iblank(), dcif.fringe_ids())?;
    checker::check_receptor_ids(dcif.iblank(), dcif.fringe_ids())?;

    let mut interpolation = None;
    if let Some(points_path) = &config.points {
        let points = points::read(points_path)
            .with_context(|| format!("reading {}", points_path.display()))?;
        interpolation = Some(checker::check_linear_reconstruction(
            &points,
            dcif.fringe_ids(),
            dcif.donor_counts(),
            dcif.donor_ids(),
            dcif.donor_weights(),
        )?);
    }

    Ok(CheckReport {
        nodes: dcif.node_count(),
        fringes: dcif.receptor_count(),
        donors: dcif.donor_count(),
        grids: dcif.grid_count(),
        interpolation,
    })
}

fn main() -> ExitCode {
    let config = Config::parse();

    let filter = EnvFilter::from_default_env().add_directive("dcif_check=info".parse().unwrap());
    if config.log_format == "json" {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry().with(fmt::layer()).with(filter).init();
    }

    match run(&config) {
        Ok(report) => {
            info!(
                nodes = report.nodes,
                fringes = report.fringes,
                donors = report.donors,
                "all checks passed"
            );
            if config.report {
                match serde_json::to_string_pretty(&report) {
                    Ok(json) => println!("{json}"),
                    Err(e) => {
                        error!("could not serialize report: {e}");
                        return ExitCode::FAILURE;
                    }
                }
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
