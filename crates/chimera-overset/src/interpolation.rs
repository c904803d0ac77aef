//! Geometric containment and shape-function weights
//!
//! Containment decomposes each cell into tetrahedra and tests signed
//! volumes. Interpolation weights are the minimum-norm least-squares
//! solution reproducing linear fields exactly, with the system centered on
//! the query point for conditioning.

use chimera_mesh::Point;

const VOLUME_TOLERANCE: f64 = 1.0e-12;

fn sub(a: &Point, b: &Point) -> Point {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn cross(a: &Point, b: &Point) -> Point {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

fn dot(a: &Point, b: &Point) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn tet_volume(a: &Point, b: &Point, c: &Point, d: &Point) -> f64 {
    dot(&cross(&sub(b, a), &sub(c, a)), &sub(d, a)) / 6.0
}

fn point_in_tet(a: &Point, b: &Point, c: &Point, d: &Point, p: &Point) -> bool {
    let whole = tet_volume(a, b, c, d);
    if whole.abs() < VOLUME_TOLERANCE {
        return false;
    }
    let sign = whole.signum();
    let slack = -VOLUME_TOLERANCE * whole.abs().max(1.0);
    sign * tet_volume(p, b, c, d) >= slack
        && sign * tet_volume(a, p, c, d) >= slack
        && sign * tet_volume(a, b, p, d) >= slack
        && sign * tet_volume(a, b, c, p) >= slack
}

/// Tetrahedra fanned around the cell interior, by corner count:
/// tet itself, pyramid 2, prism 3, hex 6 around the 0-6 diagonal.
fn tet_decomposition(corners: usize) -> &'static [[usize; 4]] {
    match corners {
        4 => &[[0, 1, 2, 3]],
        5 => &[[0, 1, 2, 4], [0, 2, 3, 4]],
        6 => &[[0, 1, 2, 3], [1, 2, 3, 4], [2, 3, 4, 5]],
        8 => &[
            [0, 1, 2, 6],
            [0, 2, 3, 6],
            [0, 3, 7, 6],
            [0, 7, 4, 6],
            [0, 4, 5, 6],
            [0, 5, 1, 6],
        ],
        _ => &[],
    }
}

/// Whether `p` lies inside the cell with the given corner vertices
/// (4 = tet, 5 = pyramid, 6 = prism, 8 = hex).
pub fn cell_contains(vertices: &[Point], p: &Point) -> bool {
    tet_decomposition(vertices.len()).iter().any(|tet| {
        point_in_tet(
            &vertices[tet[0]],
            &vertices[tet[1]],
            &vertices[tet[2]],
            &vertices[tet[3]],
            p,
        )
    })
}

/// Shape-function weights for interpolating vertex data to `p`: the
/// minimum-norm solution of the linear-reproduction constraints, so the
/// weights sum to one and recover any linear field exactly. Degenerate
/// vertex sets fall back to normalized inverse-distance weights.
pub fn least_squares_weights(vertices: &[Point], p: &Point) -> Vec<f64> {
    let n = vertices.len();
    // constraints centered on the query: sum w = 1, sum w (v - p) = 0
    let rows: Vec<[f64; 4]> = vertices
        .iter()
        .map(|v| [1.0, v[0] - p[0], v[1] - p[1], v[2] - p[2]])
        .collect();
    let mut normal = [[0.0f64; 4]; 4];
    for row in &rows {
        for r in 0..4 {
            for c in 0..4 {
                normal[r][c] += row[r] * row[c];
            }
        }
    }
    let rhs = [1.0, 0.0, 0.0, 0.0];
    match solve_4x4(normal, rhs) {
        Some(multipliers) => rows
            .iter()
            .map(|row| {
                row.iter()
                    .zip(&multipliers)
                    .map(|(a, m)| a * m)
                    .sum::<f64>()
            })
            .collect(),
        None => inverse_distance_weights(vertices, p, n),
    }
}

fn inverse_distance_weights(vertices: &[Point], p: &Point, n: usize) -> Vec<f64> {
    let mut weights: Vec<f64> = vertices
        .iter()
        .map(|v| {
            let d = sub(v, p);
            1.0 / dot(&d, &d).sqrt().max(1.0e-300)
        })
        .collect();
    let total: f64 = weights.iter().sum();
    if total > 0.0 {
        for w in &mut weights {
            *w /= total;
        }
    } else {
        weights = vec![1.0 / n as f64; n];
    }
    weights
}

fn solve_4x4(mut m: [[f64; 4]; 4], mut b: [f64; 4]) -> Option<[f64; 4]> {
    for col in 0..4 {
        let pivot_row = (col..4)
            .max_by(|&r, &s| {
                m[r][col]
                    .abs()
                    .partial_cmp(&m[s][col].abs())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .unwrap_or(col);
        if m[pivot_row][col].abs() < 1.0e-14 {
            return None;
        }
        m.swap(col, pivot_row);
        b.swap(col, pivot_row);
        for row in (col + 1)..4 {
            let factor = m[row][col] / m[col][col];
            for k in col..4 {
                m[row][k] -= factor * m[col][k];
            }
            b[row] -= factor * b[col];
        }
    }
    let mut x = [0.0f64; 4];
    for row in (0..4).rev() {
        let mut sum = b[row];
        for k in (row + 1)..4 {
            sum -= m[row][k] * x[k];
        }
        x[row] = sum / m[row][row];
    }
    Some(x)
}

/// Interpolate vertex values to `p` with the least-squares weights.
pub fn interpolate(vertices: &[Point], values: &[f64], p: &Point) -> f64 {
    least_squares_weights(vertices, p)
        .iter()
        .zip(values)
        .map(|(w, v)| w * v)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn unit_tet() -> Vec<Point> {
        vec![
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.0, 0.0, 1.0],
        ]
    }

    fn unit_hex() -> Vec<Point> {
        vec![
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [1.0, 1.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.0, 0.0, 1.0],
            [1.0, 0.0, 1.0],
            [1.0, 1.0, 1.0],
            [0.0, 1.0, 1.0],
        ]
    }

    fn linear(p: &Point) -> f64 {
        2.3 * p[0] + 9.2 * p[1] + 3.9 * p[2] + 1.2
    }

    #[test]
    fn test_tet_containment() {
        let tet = unit_tet();
        assert!(cell_contains(&tet, &[0.1, 0.1, 0.1]));
        assert!(cell_contains(&tet, &[0.0, 0.0, 0.0]));
        assert!(!cell_contains(&tet, &[0.5, 0.5, 0.5]));
        assert!(!cell_contains(&tet, &[-0.01, 0.1, 0.1]));
    }

    #[test]
    fn test_hex_containment_covers_whole_cube() {
        let hex = unit_hex();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let p = [rng.gen::<f64>(), rng.gen::<f64>(), rng.gen::<f64>()];
            assert!(cell_contains(&hex, &p), "missed interior point {p:?}");
        }
        assert!(!cell_contains(&hex, &[1.2, 0.5, 0.5]));
    }

    #[test]
    fn test_prism_and_pyramid_containment() {
        let prism = vec![
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.0, 0.0, 1.0],
            [1.0, 0.0, 1.0],
            [0.0, 1.0, 1.0],
        ];
        assert!(cell_contains(&prism, &[0.2, 0.2, 0.5]));
        assert!(!cell_contains(&prism, &[0.9, 0.9, 0.5]));

        let pyramid = vec![
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [1.0, 1.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.5, 0.5, 1.0],
        ];
        assert!(cell_contains(&pyramid, &[0.5, 0.5, 0.5]));
        assert!(!cell_contains(&pyramid, &[0.05, 0.05, 0.9]));
    }

    #[test]
    fn test_weights_sum_to_one_and_recover_linear_fields() {
        let mut rng = StdRng::seed_from_u64(42);
        for cell in [unit_tet(), unit_hex()] {
            for _ in 0..50 {
                let p = [
                    rng.gen::<f64>() * 0.8 + 0.05,
                    rng.gen::<f64>() * 0.8 + 0.05,
                    rng.gen::<f64>() * 0.8 + 0.05,
                ];
                let weights = least_squares_weights(&cell, &p);
                let sum: f64 = weights.iter().sum();
                assert!((sum - 1.0).abs() < 1.0e-10, "weights sum {sum}");
                let values: Vec<f64> = cell.iter().map(linear).collect();
                let interpolated = interpolate(&cell, &values, &p);
                assert!((interpolated - linear(&p)).abs() < 1.0e-9);
            }
        }
    }

    #[test]
    fn test_weights_reproduce_position() {
        let cell = unit_tet();
        let p = [0.25, 0.15, 0.3];
        let weights = least_squares_weights(&cell, &p);
        let mut reproduced = [0.0; 3];
        for (w, v) in weights.iter().zip(&cell) {
            for k in 0..3 {
                reproduced[k] += w * v[k];
            }
        }
        for k in 0..3 {
            assert!((reproduced[k] - p[k]).abs() < 1.0e-10);
        }
    }

    #[test]
    fn test_degenerate_cell_falls_back_gracefully() {
        // all vertices coincident: inverse distance cannot help either, so
        // the fallback hands back equal weights
        let cell = vec![[1.0, 1.0, 1.0]; 4];
        let weights = least_squares_weights(&cell, &[1.0, 1.0, 1.0]);
        let sum: f64 = weights.iter().sum();
        assert!((sum - 1.0).abs() < 1.0e-12);
    }
}
