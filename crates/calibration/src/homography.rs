//! Planar homography estimation

use nalgebra::{DMatrix, Matrix3, Point2, Vector3};

const EPS: f64 = 1e-12;

/// Estimate H with `dst ~ H * src` by normalized DLT
///
/// Needs at least four correspondences; returns `None` for degenerate
/// input (coincident or collinear points).
pub fn find_homography(src: &[Point2<f64>], dst: &[Point2<f64>]) -> Option<Matrix3<f64>> {
    if src.len() != dst.len() || src.len() < 4 {
        return None;
    }

    let (src_n, t_src) = normalize_points(src)?;
    let (dst_n, t_dst) = normalize_points(dst)?;

    // Pad to at least 9 rows so the null vector is part of V^T
    let rows = (2 * src.len()).max(9);
    let mut a = DMatrix::<f64>::zeros(rows, 9);
    for (i, (p, q)) in src_n.iter().zip(dst_n.iter()).enumerate() {
        let (x, y, u, v) = (p.x, p.y, q.x, q.y);
        let r0 = 2 * i;
        let r1 = r0 + 1;

        a[(r0, 0)] = -x;
        a[(r0, 1)] = -y;
        a[(r0, 2)] = -1.0;
        a[(r0, 6)] = u * x;
        a[(r0, 7)] = u * y;
        a[(r0, 8)] = u;

        a[(r1, 3)] = -x;
        a[(r1, 4)] = -y;
        a[(r1, 5)] = -1.0;
        a[(r1, 6)] = v * x;
        a[(r1, 7)] = v * y;
        a[(r1, 8)] = v;
    }

    let h = null_vector(a)?;
    let hn = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]);

    let t_dst_inv = t_dst.try_inverse()?;
    let hm = t_dst_inv * hn * t_src;
    let scale = hm[(2, 2)];
    if scale.abs() < EPS || !hm.iter().all(|v| v.is_finite()) {
        return None;
    }
    Some(hm / scale)
}

/// Map a point through a homography
pub fn apply_homography(h: &Matrix3<f64>, p: &Point2<f64>) -> Option<Point2<f64>> {
    let v = h * Vector3::new(p.x, p.y, 1.0);
    if !v.z.is_finite() || v.z.abs() < EPS {
        return None;
    }
    Some(Point2::new(v.x / v.z, v.y / v.z))
}

/// Right singular vector of the smallest singular value
pub(crate) fn null_vector(a: DMatrix<f64>) -> Option<Vec<f64>> {
    let cols = a.ncols();
    let svd = a.svd(false, true);
    let v_t = svd.v_t?;
    let (idx, _) = svd
        .singular_values
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))?;
    Some((0..cols).map(|c| v_t[(idx, c)]).collect())
}

/// Hartley normalization: centroid to origin, mean distance sqrt(2)
fn normalize_points(points: &[Point2<f64>]) -> Option<(Vec<Point2<f64>>, Matrix3<f64>)> {
    let n = points.len() as f64;
    let cx = points.iter().map(|p| p.x).sum::<f64>() / n;
    let cy = points.iter().map(|p| p.y).sum::<f64>() / n;
    let mean_dist = points
        .iter()
        .map(|p| ((p.x - cx).powi(2) + (p.y - cy).powi(2)).sqrt())
        .sum::<f64>()
        / n;
    if mean_dist < EPS {
        return None;
    }

    let s = std::f64::consts::SQRT_2 / mean_dist;
    let t = Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0);
    let normalized = points
        .iter()
        .map(|p| Point2::new(s * (p.x - cx), s * (p.y - cy)))
        .collect();
    Some((normalized, t))
}
