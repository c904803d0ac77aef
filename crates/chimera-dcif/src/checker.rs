//! Consistency checks for assembled domain connectivity
//!
//! Structural checks need only the file contents; the linear-reconstruction
//! check additionally needs the node coordinates, and verifies that every
//! receptor's donor stencil recovers a linear field to interpolation
//! accuracy with weights summing to one.

use crate::error::{DcifError, Result};
use serde::Serialize;
use tracing::info;

pub const LINEAR_TOLERANCE: f64 = 1.0e-4;
pub const WEIGHT_SUM_TOLERANCE: f64 = 1.0e-6;

/// The reference field every valid stencil must reproduce.
pub fn linear_field(p: &[f64; 3]) -> f64 {
    2.3 * p[0] + 9.2 * p[1] + 3.9 * p[2] + 1.2
}

/// Interpolation-error statistics from a linear-reconstruction pass.
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct InterpolationError {
    pub rms: f64,
    pub min: f64,
    pub max: f64,
    pub samples: usize,
}

/// The number of `-1` entries in the blanking array must equal the number
/// of recorded receptors.
pub fn check_receptor_counts(iblank: &[i8], fringe_ids: &[i64]) -> Result<()> {
    let blanked = iblank.iter().filter(|&&b| b == -1).count();
    if blanked != fringe_ids.len() {
        return Err(DcifError::Invariant(format!(
            "{blanked} nodes blanked as receptors but {} fringes recorded",
            fringe_ids.len()
        )));
    }
    info!(count = blanked, "receptor counts match");
    Ok(())
}

/// Every fringe id must be a legal node index marked `-1` in the blanking
/// array.
pub fn check_receptor_ids(iblank: &[i8], fringe_ids: &[i64]) -> Result<()> {
    for &id in fringe_ids {
        if id < 0 {
            return Err(DcifError::Invariant(format!("negative receptor id {id}")));
        }
        if id as usize >= iblank.len() {
            return Err(DcifError::Invariant(format!(
                "receptor id {id} beyond the {} nodes",
                iblank.len()
            )));
        }
        if iblank[id as usize] != -1 {
            return Err(DcifError::Invariant(format!(
                "receptor {id} not marked in the blanking array"
            )));
        }
    }
    Ok(())
}

/// Check that every receptor's stencil recovers the linear reference field
/// within tolerance and that its weights sum to one.
pub fn check_linear_reconstruction(
    points: &[[f64; 3]],
    fringe_ids: &[i64],
    donor_counts: &[i8],
    donor_ids: &[i64],
    donor_weights: &[f64],
) -> Result<InterpolationError> {
    if fringe_ids.len() != donor_counts.len() {
        return Err(DcifError::Invariant(format!(
            "{} fringe ids but {} donor counts",
            fringe_ids.len(),
            donor_counts.len()
        )));
    }
    if donor_ids.len() != donor_weights.len() {
        return Err(DcifError::Invariant(format!(
            "{} donor ids but {} donor weights",
            donor_ids.len(),
            donor_weights.len()
        )));
    }

    let mut stats = InterpolationError {
        min: f64::MAX,
        ..Default::default()
    };
    let mut offset = 0usize;
    for (i, &id) in fringe_ids.iter().enumerate() {
        let p = points.get(id as usize).ok_or_else(|| {
            DcifError::NotFound(format!("no coordinates for receptor id {id}"))
        })?;
        let actual = linear_field(p);

        let n = donor_counts[i] as usize;
        let mut interpolated = 0.0;
        let mut weight_sum = 0.0;
        for j in 0..n {
            let donor = points.get(donor_ids[offset + j] as usize).ok_or_else(|| {
                DcifError::NotFound(format!(
                    "no coordinates for donor id {}",
                    donor_ids[offset + j]
                ))
            })?;
            let weight = donor_weights[offset + j];
            weight_sum += weight;
            interpolated += weight * linear_field(donor);
        }
        if (1.0 - weight_sum).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(DcifError::Invariant(format!(
                "receptor {id} weights sum to {weight_sum}, expected 1"
            )));
        }

        let delta = (interpolated - actual).abs();
        stats.rms += delta * delta;
        stats.min = stats.min.min(delta);
        stats.max = stats.max.max(delta);
        if delta > LINEAR_TOLERANCE {
            return Err(DcifError::Invariant(format!(
                "receptor {id} does not recover the linear field: error {delta:.3e}"
            )));
        }
        offset += n;
    }
    stats.samples = fringe_ids.len();
    if stats.samples > 0 {
        stats.rms = (stats.rms / stats.samples as f64).sqrt();
    } else {
        stats.min = 0.0;
    }
    info!(
        rms = stats.rms,
        max = stats.max,
        samples = stats.samples,
        "linear reconstruction verified"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tet_points() -> Vec<[f64; 3]> {
        vec![
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.0, 0.0, 1.0],
            [0.25, 0.25, 0.25], // the receptor at the centroid
        ]
    }

    #[test]
    fn test_counts_must_match() {
        assert!(check_receptor_counts(&[1, -1, 1], &[1]).is_ok());
        assert!(check_receptor_counts(&[1, -1, -1], &[1]).is_err());
    }

    #[test]
    fn test_ids_must_be_blanked_and_in_range() {
        let iblank = vec![1, -1, 1];
        assert!(check_receptor_ids(&iblank, &[1]).is_ok());
        assert!(check_receptor_ids(&iblank, &[0]).is_err());
        assert!(check_receptor_ids(&iblank, &[5]).is_err());
        assert!(check_receptor_ids(&iblank, &[-1]).is_err());
    }

    #[test]
    fn test_equal_weights_recover_centroid_value() {
        let stats = check_linear_reconstruction(
            &tet_points(),
            &[4],
            &[4],
            &[0, 1, 2, 3],
            &[0.25, 0.25, 0.25, 0.25],
        )
        .unwrap();
        assert!(stats.max < 1.0e-12);
        assert_eq!(stats.samples, 1);
    }

    #[test]
    fn test_bad_weight_sum_is_rejected() {
        let err = check_linear_reconstruction(
            &tet_points(),
            &[4],
            &[4],
            &[0, 1, 2, 3],
            &[0.3, 0.3, 0.3, 0.3],
        )
        .unwrap_err();
        assert!(matches!(err, DcifError::Invariant(_)));
    }

    #[test]
    fn test_wrong_stencil_fails_recovery() {
        // weights sum to one but interpolate the wrong location
        let err = check_linear_reconstruction(
            &tet_points(),
            &[4],
            &[4],
            &[0, 1, 2, 3],
            &[1.0, 0.0, 0.0, 0.0],
        )
        .unwrap_err();
        assert!(matches!(err, DcifError::Invariant(_)));
    }
}
