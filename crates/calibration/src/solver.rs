//! Multi-view camera calibration
//!
//! Closed-form initialization from per-view homographies, then joint
//! Levenberg-Marquardt refinement of intrinsics, distortion and poses
//! over the reprojection error.

use crate::homography::find_homography;
use crate::params::{CalibrationParameters, Intrinsics};
use crate::CalibrationError;
use nalgebra::{DMatrix, DVector, Matrix3, Point2, Point3, Rotation3, Vector3};
use tracing::{debug, info, warn};

/// Intrinsic parameter count: fx, fy, cx, cy, k1, k2, p1, p2, k3
const INTRINSIC_PARAMS: usize = 9;
const POSE_PARAMS: usize = 6;

/// Views needed to estimate the principal point and distortion
const MIN_FULL_VIEWS: usize = 3;

/// Residual used when a point projects behind the camera
const INVALID_RESIDUAL: f64 = 1.0e3;

/// Calibrate a camera from planar object/image correspondences
///
/// With fewer than three views the principal point stays at the image
/// centre and distortion at zero; only the focal lengths and poses are
/// refined.
pub fn calibrate_from_correspondences(
    object_points: &[Vec<Point3<f64>>],
    image_points: &[Vec<Point2<f64>>],
    image_size: (u32, u32),
    max_iterations: usize,
) -> Result<CalibrationParameters, CalibrationError> {
    if object_points.is_empty() || object_points.len() != image_points.len() {
        return Err(CalibrationError::Degenerate(format!(
            "{} object views vs {} image views",
            object_points.len(),
            image_points.len()
        )));
    }

    let mut views = Vec::new();
    for (idx, (obj, img)) in object_points.iter().zip(image_points).enumerate() {
        if obj.len() != img.len() || obj.len() < 4 {
            return Err(CalibrationError::Degenerate(format!(
                "view {} has {} object and {} image points",
                idx,
                obj.len(),
                img.len()
            )));
        }
        let planar: Vec<Point2<f64>> = obj.iter().map(|p| Point2::new(p.x, p.y)).collect();
        match find_homography(&planar, img) {
            Some(h) => views.push(View { object: obj, image: img, homography: h }),
            None => warn!("Skipping view {}: degenerate homography", idx),
        }
    }
    if views.is_empty() {
        return Err(CalibrationError::Degenerate("no usable view".to_string()));
    }

    let (width, height) = image_size;
    let full = views.len() >= MIN_FULL_VIEWS;
    let k = initial_intrinsics(&views, width, height, full);
    debug!(
        "Initial intrinsics fx={:.1} fy={:.1} cx={:.1} cy={:.1}",
        k[(0, 0)],
        k[(1, 1)],
        k[(0, 2)],
        k[(1, 2)]
    );

    let mut params = vec![k[(0, 0)], k[(1, 1)], k[(0, 2)], k[(1, 2)], 0.0, 0.0, 0.0, 0.0, 0.0];
    for view in &views {
        let (rvec, tvec) = initial_pose(&k, &view.homography)?;
        params.extend_from_slice(&[rvec.x, rvec.y, rvec.z, tvec.x, tvec.y, tvec.z]);
    }

    let free: Vec<usize> = (0..params.len())
        .filter(|&i| full || !(2..INTRINSIC_PARAMS).contains(&i))
        .collect();

    let problem = Problem { views: &views };
    let cost = problem.refine(&mut params, &free, max_iterations);

    let point_count: usize = views.iter().map(|v| v.object.len()).sum();
    let rms_error = (cost / point_count as f64).sqrt();

    let camera_matrix = [
        [params[0], 0.0, params[2]],
        [0.0, params[1], params[3]],
        [0.0, 0.0, 1.0],
    ];
    let det = params[0] * params[1];
    let success = rms_error.is_finite() && det.is_finite() && det.abs() > 1e-9;

    let mut rotation_vectors = Vec::with_capacity(views.len());
    let mut translation_vectors = Vec::with_capacity(views.len());
    for pose in params[INTRINSIC_PARAMS..].chunks_exact(POSE_PARAMS) {
        rotation_vectors.push([pose[0], pose[1], pose[2]]);
        translation_vectors.push([pose[3], pose[4], pose[5]]);
    }

    info!(
        "Calibration {} with {} view(s), rms {:.4}px",
        if success { "succeeded" } else { "failed" },
        views.len(),
        rms_error
    );

    Ok(CalibrationParameters {
        success,
        rms_error,
        camera_matrix,
        distortion: [params[4], params[5], params[6], params[7], params[8]],
        rotation_vectors,
        translation_vectors,
        image_width: width,
        image_height: height,
    })
}

struct View<'a> {
    object: &'a [Point3<f64>],
    image: &'a [Point2<f64>],
    homography: Matrix3<f64>,
}

/// Image normalization: centre to origin, longest side to unit length
fn normalization(width: u32, height: u32) -> Matrix3<f64> {
    let s = 1.0 / width.max(height).max(1) as f64;
    Matrix3::new(
        s, 0.0, -s * width as f64 / 2.0,
        0.0, s, -s * height as f64 / 2.0,
        0.0, 0.0, 1.0,
    )
}

fn initial_intrinsics(views: &[View<'_>], width: u32, height: u32, full: bool) -> Matrix3<f64> {
    let n = normalization(width, height);
    let normalized: Vec<Matrix3<f64>> = views
        .iter()
        .map(|v| {
            let h = n * v.homography;
            h / h.norm()
        })
        .collect();

    let estimate = if full {
        zhang_intrinsics(&normalized).or_else(|| centred_intrinsics(&normalized))
    } else {
        centred_intrinsics(&normalized)
    };

    let k_normalized = estimate.unwrap_or_else(|| {
        warn!("Closed-form intrinsics degenerate, assuming focal length of image size");
        Matrix3::new(1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0)
    });

    denormalize(&k_normalized, width, height)
}

/// Inverse of [`normalization`] applied to a normalized camera matrix
fn denormalize(k: &Matrix3<f64>, width: u32, height: u32) -> Matrix3<f64> {
    let scale = width.max(height).max(1) as f64;
    Matrix3::new(
        k[(0, 0)] * scale, 0.0, k[(0, 2)] * scale + width as f64 / 2.0,
        0.0, k[(1, 1)] * scale, k[(1, 2)] * scale + height as f64 / 2.0,
        0.0, 0.0, 1.0,
    )
}

/// Zhang's closed form (skew dropped)
fn zhang_intrinsics(homographies: &[Matrix3<f64>]) -> Option<Matrix3<f64>> {
    let mut a = DMatrix::<f64>::zeros(2 * homographies.len(), 6);
    for (i, h) in homographies.iter().enumerate() {
        let v12 = v_ij(h, 0, 1);
        let v11 = v_ij(h, 0, 0);
        let v22 = v_ij(h, 1, 1);
        for c in 0..6 {
            a[(2 * i, c)] = v12[c];
            a[(2 * i + 1, c)] = v11[c] - v22[c];
        }
    }

    let b = unique_null_vector(a)?;
    let (b11, b12, b22, b13, b23, b33) = (b[0], b[1], b[2], b[3], b[4], b[5]);

    let denom = b11 * b22 - b12 * b12;
    if denom.abs() < 1e-18 || b11.abs() < 1e-18 {
        return None;
    }
    let v0 = (b12 * b13 - b11 * b23) / denom;
    let lambda = b33 - (b13 * b13 + v0 * (b12 * b13 - b11 * b23)) / b11;
    let alpha = (lambda / b11).sqrt();
    let beta = (lambda * b11 / denom).sqrt();
    let gamma = -b12 * alpha * alpha * beta / lambda;
    let u0 = gamma * v0 / beta - b13 * alpha * alpha / lambda;

    plausible(alpha, beta, u0, v0)
}

/// Focal lengths with the principal point held at the origin
fn centred_intrinsics(homographies: &[Matrix3<f64>]) -> Option<Matrix3<f64>> {
    let mut a = DMatrix::<f64>::zeros(2 * homographies.len(), 3);
    for (i, h) in homographies.iter().enumerate() {
        for r in 0..3 {
            a[(2 * i, r)] = h[(r, 0)] * h[(r, 1)];
            a[(2 * i + 1, r)] = h[(r, 0)] * h[(r, 0)] - h[(r, 1)] * h[(r, 1)];
        }
    }

    let b = unique_null_vector(a)?;
    let alpha = (b[2] / b[0]).sqrt();
    let beta = (b[2] / b[1]).sqrt();
    plausible(alpha, beta, 0.0, 0.0)
}

/// Reject focal lengths far outside the image scale
fn plausible(alpha: f64, beta: f64, u0: f64, v0: f64) -> Option<Matrix3<f64>> {
    let in_range = |f: f64| f.is_finite() && (0.2..=10.0).contains(&f);
    if !in_range(alpha) || !in_range(beta) || !u0.is_finite() || !v0.is_finite() {
        return None;
    }
    if u0.abs() > 0.5 || v0.abs() > 0.5 {
        return None;
    }
    Some(Matrix3::new(alpha, 0.0, u0, 0.0, beta, v0, 0.0, 0.0, 1.0))
}

fn v_ij(h: &Matrix3<f64>, i: usize, j: usize) -> [f64; 6] {
    [
        h[(0, i)] * h[(0, j)],
        h[(0, i)] * h[(1, j)] + h[(1, i)] * h[(0, j)],
        h[(1, i)] * h[(1, j)],
        h[(2, i)] * h[(0, j)] + h[(0, i)] * h[(2, j)],
        h[(2, i)] * h[(1, j)] + h[(1, i)] * h[(2, j)],
        h[(2, i)] * h[(2, j)],
    ]
}

/// Null vector of `a`, or `None` when the null space is not one-dimensional
fn unique_null_vector(a: DMatrix<f64>) -> Option<Vec<f64>> {
    let cols = a.ncols();
    let a = if a.nrows() < cols {
        a.resize_vertically(cols, 0.0)
    } else {
        a
    };

    let svd = a.svd(false, true);
    let v_t = svd.v_t?;
    let sv = &svd.singular_values;
    let mut order: Vec<usize> = (0..sv.len()).collect();
    order.sort_by(|&x, &y| sv[x].total_cmp(&sv[y]));

    let largest = sv[*order.last()?];
    if largest <= 0.0 || sv[order[1]] < 1e-9 * largest {
        return None;
    }
    Some((0..cols).map(|c| v_t[(order[0], c)]).collect())
}

/// Pose of the board plane from its homography
fn initial_pose(k: &Matrix3<f64>, h: &Matrix3<f64>) -> Result<(Vector3<f64>, Vector3<f64>), CalibrationError> {
    let k_inv = k
        .try_inverse()
        .ok_or_else(|| CalibrationError::Degenerate("singular initial camera matrix".to_string()))?;

    let h1 = k_inv * h.column(0);
    let h2 = k_inv * h.column(1);
    let h3 = k_inv * h.column(2);
    let norm = h1.norm();
    if norm < 1e-12 {
        return Err(CalibrationError::Degenerate("zero homography column".to_string()));
    }

    let mut lambda = 1.0 / norm;
    if (h3 * lambda).z < 0.0 {
        lambda = -lambda;
    }
    let r1 = h1 * lambda;
    let r2 = h2 * lambda;
    let r3 = r1.cross(&r2);
    let t = h3 * lambda;

    // Nearest rotation in the Frobenius sense
    let q = Matrix3::from_columns(&[r1, r2, r3]);
    let svd = q.svd(true, true);
    let (Some(mut u), Some(v_t)) = (svd.u, svd.v_t) else {
        return Err(CalibrationError::Degenerate("pose decomposition failed".to_string()));
    };
    if (u * v_t).determinant() < 0.0 {
        u.column_mut(2).neg_mut();
    }
    let rotation = Rotation3::from_matrix_unchecked(u * v_t);
    Ok((rotation.scaled_axis(), t))
}

struct Problem<'a> {
    views: &'a [View<'a>],
}

impl Problem<'_> {
    fn residual_count(&self) -> usize {
        self.views.iter().map(|v| 2 * v.object.len()).sum()
    }

    fn residuals(&self, params: &[f64]) -> DVector<f64> {
        let intrinsics = Intrinsics {
            fx: params[0],
            fy: params[1],
            cx: params[2],
            cy: params[3],
            distortion: [params[4], params[5], params[6], params[7], params[8]],
        };

        let mut out = DVector::zeros(self.residual_count());
        let mut row = 0;
        for (view, pose) in self.views.iter().zip(params[INTRINSIC_PARAMS..].chunks_exact(POSE_PARAMS)) {
            let rotation = Rotation3::new(Vector3::new(pose[0], pose[1], pose[2]));
            let translation = Vector3::new(pose[3], pose[4], pose[5]);
            for (obj, img) in view.object.iter().zip(view.image) {
                let camera = rotation * obj.coords + translation;
                let (du, dv) = if camera.z > 1e-9 {
                    intrinsics
                        .project_camera_point(&camera)
                        .map(|(u, v)| (u - img.x, v - img.y))
                        .unwrap_or((INVALID_RESIDUAL, INVALID_RESIDUAL))
                } else {
                    (INVALID_RESIDUAL, INVALID_RESIDUAL)
                };
                out[row] = du;
                out[row + 1] = dv;
                row += 2;
            }
        }
        out
    }

    /// Central-difference Jacobian over the free parameters
    fn jacobian(&self, params: &[f64], free: &[usize]) -> DMatrix<f64> {
        let mut jac = DMatrix::zeros(self.residual_count(), free.len());
        let mut shifted = params.to_vec();
        for (col, &p) in free.iter().enumerate() {
            let step = 1e-6 * params[p].abs().max(1.0);
            shifted[p] = params[p] + step;
            let plus = self.residuals(&shifted);
            shifted[p] = params[p] - step;
            let minus = self.residuals(&shifted);
            shifted[p] = params[p];
            jac.set_column(col, &((plus - minus) / (2.0 * step)));
        }
        jac
    }

    /// Levenberg-Marquardt; returns the final sum of squared residuals
    fn refine(&self, params: &mut [f64], free: &[usize], max_iterations: usize) -> f64 {
        let mut residual = self.residuals(params);
        let mut cost = residual.norm_squared();
        let mut damping = 1e-3;

        for iteration in 0..max_iterations {
            let jac = self.jacobian(params, free);
            let jtj = jac.transpose() * &jac;
            let gradient = jac.transpose() * &residual;

            let mut accepted = None;
            for _ in 0..10 {
                let mut system = jtj.clone();
                for d in 0..free.len() {
                    system[(d, d)] += damping * jtj[(d, d)].max(1e-9);
                }
                let Some(delta) = system.cholesky().map(|c| c.solve(&(-&gradient))) else {
                    damping *= 10.0;
                    continue;
                };

                let mut candidate = params.to_vec();
                for (d, &p) in free.iter().enumerate() {
                    candidate[p] += delta[d];
                }
                let candidate_residual = self.residuals(&candidate);
                let candidate_cost = candidate_residual.norm_squared();
                if candidate_cost.is_finite() && candidate_cost < cost {
                    damping = (damping / 10.0).max(1e-12);
                    accepted = Some((candidate, candidate_residual, candidate_cost));
                    break;
                }
                damping *= 10.0;
            }

            let Some((candidate, candidate_residual, candidate_cost)) = accepted else {
                debug!("LM stalled after {} iteration(s)", iteration);
                break;
            };
            let decrease = cost - candidate_cost;
            params.copy_from_slice(&candidate);
            residual = candidate_residual;
            cost = candidate_cost;
            if decrease <= 1e-12 * cost.max(1e-12) {
                break;
            }
        }
        cost
    }
}
