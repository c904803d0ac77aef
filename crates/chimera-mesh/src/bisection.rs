//! Parallel recursive coordinate bisection
//!
//! Every rank walks the identical recursion tree over the part range, so
//! the collective calls line up even on ranks whose local point set is
//! empty in a branch. Cut planes are found by bisection search on the
//! weighted fraction along the longest axis of the branch extent.

use crate::error::{MeshError, Result};
use crate::geom::{Extent, Point};
use chimera_comm::ProcessGroup;

const MAX_CUT_SEARCH_ITERATIONS: usize = 50;

/// Assign each point a part in `[0, nparts)`, weighted-balanced to within
/// `tol` of the even fraction at every split.
pub fn recursive_bisection(
    group: &ProcessGroup,
    points: &[Point],
    weights: &[f64],
    nparts: usize,
    tol: f64,
) -> Result<Vec<i32>> {
    if points.len() != weights.len() {
        return Err(MeshError::Configuration(format!(
            "{} points but {} weights",
            points.len(),
            weights.len()
        )));
    }
    if nparts == 0 {
        return Err(MeshError::Configuration("zero parts requested".into()));
    }
    let mut part = vec![0i32; points.len()];
    let active: Vec<usize> = (0..points.len()).collect();
    bisect(group, points, weights, &mut part, active, 0, nparts, tol)?;
    Ok(part)
}

#[allow(clippy::too_many_arguments)]
fn bisect(
    group: &ProcessGroup,
    points: &[Point],
    weights: &[f64],
    part: &mut [i32],
    active: Vec<usize>,
    part_lo: usize,
    part_hi: usize,
    tol: f64,
) -> Result<()> {
    if part_hi - part_lo <= 1 {
        for i in active {
            part[i] = part_lo as i32;
        }
        return Ok(());
    }
    let left_parts = (part_hi - part_lo) / 2;
    let target = left_parts as f64 / (part_hi - part_lo) as f64;

    // global extent of the branch
    let mut local = Extent::empty();
    for &i in &active {
        local.add_point(&points[i]);
    }
    let lo = group.reduce_vec(&local.lo, |a: f64, b| if a < b { a } else { b })?;
    let hi = group.reduce_vec(&local.hi, |a: f64, b| if a > b { a } else { b })?;
    let extent = Extent::new([lo[0], lo[1], lo[2]], [hi[0], hi[1], hi[2]]);

    let local_weight: f64 = active.iter().map(|&i| weights[i]).sum();
    let total_weight = group.parallel_sum(local_weight)?;

    let axis = extent.longest_axis();
    let mut below = extent.lo[axis];
    let mut above = extent.hi[axis];
    let mut cut = 0.5 * (below + above);
    if total_weight > 0.0 {
        for _ in 0..MAX_CUT_SEARCH_ITERATIONS {
            cut = 0.5 * (below + above);
            let local_below: f64 = active
                .iter()
                .filter(|&&i| points[i][axis] < cut)
                .map(|&i| weights[i])
                .sum();
            let fraction = group.parallel_sum(local_below)? / total_weight;
            if (fraction - target).abs() < tol {
                break;
            }
            if fraction < target {
                below = cut;
            } else {
                above = cut;
            }
        }
    }

    let (left, right): (Vec<usize>, Vec<usize>) =
        active.into_iter().partition(|&i| points[i][axis] < cut);
    bisect(group, points, weights, part, left, part_lo, part_lo + left_parts, tol)?;
    bisect(group, points, weights, part, right, part_lo + left_parts, part_hi, tol)
}
