//! Calibration parameters and the camera model

use nalgebra::{Matrix3, Point3, Rotation3, Vector3};
use serde::{Deserialize, Serialize};

/// Intrinsics, distortion and per-view extrinsics of a calibrated camera
///
/// Computed once at startup and shared read-only afterwards. This is also
/// the cache record persisted by a [`crate::CalibrationStore`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationParameters {
    /// Calibration converged to a usable camera matrix
    pub success: bool,

    /// RMS reprojection error (pixels)
    pub rms_error: f64,

    /// 3x3 intrinsic matrix, row-major
    pub camera_matrix: [[f64; 3]; 3],

    /// Distortion coefficients (k1, k2, p1, p2, k3)
    pub distortion: [f64; 5],

    /// Rodrigues rotation vector of each pattern view
    pub rotation_vectors: Vec<[f64; 3]>,

    /// Translation vector of each pattern view
    pub translation_vectors: Vec<[f64; 3]>,

    /// Size of the calibration images
    pub image_width: u32,
    pub image_height: u32,
}

impl CalibrationParameters {
    /// Distortion-free pinhole camera centred on the image
    pub fn ideal(width: u32, height: u32, focal: f64) -> Self {
        Self {
            success: true,
            rms_error: 0.0,
            camera_matrix: [
                [focal, 0.0, width as f64 / 2.0],
                [0.0, focal, height as f64 / 2.0],
                [0.0, 0.0, 1.0],
            ],
            distortion: [0.0; 5],
            rotation_vectors: Vec::new(),
            translation_vectors: Vec::new(),
            image_width: width,
            image_height: height,
        }
    }

    /// Intrinsic matrix as nalgebra type
    pub fn camera_matrix(&self) -> Matrix3<f64> {
        let m = &self.camera_matrix;
        Matrix3::new(
            m[0][0], m[0][1], m[0][2],
            m[1][0], m[1][1], m[1][2],
            m[2][0], m[2][1], m[2][2],
        )
    }

    pub fn intrinsics(&self) -> Intrinsics {
        Intrinsics::from_params(self)
    }
}

/// Pinhole + Brown-Conrady camera model
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Intrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    /// k1, k2, p1, p2, k3
    pub distortion: [f64; 5],
}

impl Intrinsics {
    pub fn from_params(params: &CalibrationParameters) -> Self {
        let m = &params.camera_matrix;
        Self {
            fx: m[0][0],
            fy: m[1][1],
            cx: m[0][2],
            cy: m[1][2],
            distortion: params.distortion,
        }
    }

    pub fn matrix(&self) -> Matrix3<f64> {
        Matrix3::new(self.fx, 0.0, self.cx, 0.0, self.fy, self.cy, 0.0, 0.0, 1.0)
    }

    /// Apply lens distortion to normalized image coordinates
    pub fn distort_normalized(&self, x: f64, y: f64) -> (f64, f64) {
        let [k1, k2, p1, p2, k3] = self.distortion;
        let r2 = x * x + y * y;
        let radial = 1.0 + r2 * (k1 + r2 * (k2 + r2 * k3));
        let xd = x * radial + 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x);
        let yd = y * radial + p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y;
        (xd, yd)
    }

    /// Project a camera-frame point to pixel coordinates
    pub fn project_camera_point(&self, p: &Vector3<f64>) -> Option<(f64, f64)> {
        if p.z.abs() < 1e-12 {
            return None;
        }
        let (xd, yd) = self.distort_normalized(p.x / p.z, p.y / p.z);
        Some((self.fx * xd + self.cx, self.fy * yd + self.cy))
    }

    /// Project an object-space point seen from pose (rvec, tvec)
    pub fn project(
        &self,
        rotation: &Rotation3<f64>,
        translation: &Vector3<f64>,
        point: &Point3<f64>,
    ) -> Option<(f64, f64)> {
        let camera = rotation * point.coords + translation;
        self.project_camera_point(&camera)
    }
}
