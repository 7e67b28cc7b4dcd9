//! Camera Calibration Unit
//!
//! Computes the camera intrinsic matrix and lens distortion once at
//! startup and corrects every frame afterwards:
//! - Chessboard corner detection (9x6 inner corners by default)
//! - Multi-view calibration (closed-form init + Levenberg-Marquardt)
//! - Undistortion with a precomputed remap table
//! - A persisted calibration cache so restarts skip recomputation

pub mod chessboard;
pub mod config;
pub mod homography;
pub mod params;
pub mod solver;
pub mod store;
pub mod undistort;

pub use chessboard::{find_chessboard_corners, BoardSize, ChessboardCorners};
pub use config::CalibrationConfig;
pub use params::CalibrationParameters;
pub use solver::calibrate_from_correspondences;
pub use store::{CalibrationStore, FileCalibrationStore, InMemoryCalibrationStore};
pub use undistort::{undistort, UndistortMap};

use image::GrayImage;
use nalgebra::{Point2, Point3};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Calibration error types
#[derive(Error, Debug)]
pub enum CalibrationError {
    #[error("No calibration pattern detected in any of {images} image(s)")]
    NoPatternDetected { images: usize },

    #[error("Failed to read calibration image {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Calibration cache error: {0}")]
    Cache(String),

    #[error("Degenerate calibration input: {0}")]
    Degenerate(String),
}

impl From<postcard::Error> for CalibrationError {
    fn from(e: postcard::Error) -> Self {
        CalibrationError::Cache(e.to_string())
    }
}

/// Calibration unit
pub struct Calibrator {
    config: CalibrationConfig,
}

impl Calibrator {
    /// Create a calibrator with configuration
    pub fn new(config: CalibrationConfig) -> Self {
        Self { config }
    }

    /// Board geometry in use
    pub fn board(&self) -> BoardSize {
        BoardSize::new(self.config.board_columns, self.config.board_rows)
    }

    /// Calibrate from a set of grayscale pattern views
    ///
    /// Views without a detectable board are skipped. Fails with
    /// [`CalibrationError::NoPatternDetected`] when none remain.
    pub fn calibrate(&self, pattern_images: &[GrayImage]) -> Result<CalibrationParameters, CalibrationError> {
        let board = self.board();
        let object_template = board.object_points(self.config.square_size);

        let mut object_points: Vec<Vec<Point3<f64>>> = Vec::new();
        let mut image_points: Vec<Vec<Point2<f64>>> = Vec::new();
        let mut image_size = None;

        for (idx, image) in pattern_images.iter().enumerate() {
            match find_chessboard_corners(image, board) {
                Some(corners) => {
                    debug!("Pattern found in view {}", idx);
                    image_size.get_or_insert(image.dimensions());
                    object_points.push(object_template.clone());
                    image_points.push(corners.points);
                }
                None => debug!("No pattern in view {}", idx),
            }
        }

        let Some((width, height)) = image_size else {
            warn!("Calibration failed: no pattern in {} image(s)", pattern_images.len());
            return Err(CalibrationError::NoPatternDetected {
                images: pattern_images.len(),
            });
        };

        info!(
            "Calibrating from {}/{} views ({}x{})",
            image_points.len(),
            pattern_images.len(),
            width,
            height
        );

        calibrate_from_correspondences(
            &object_points,
            &image_points,
            (width, height),
            self.config.max_iterations,
        )
    }

    /// Load pattern images from the configured directory and calibrate
    pub fn calibrate_from_dir(&self) -> Result<CalibrationParameters, CalibrationError> {
        let paths = pattern_image_paths(&self.config.pattern_dir, &self.config.file_prefix)?;
        info!("Found {} calibration image(s) in {}", paths.len(), self.config.pattern_dir.display());

        let mut images = Vec::with_capacity(paths.len());
        for path in paths {
            let image = image::open(&path)
                .map_err(|source| CalibrationError::Image { path: path.clone(), source })?
                .to_luma8();
            images.push(image);
        }

        self.calibrate(&images)
    }

    /// Load cached parameters, or calibrate and persist them
    pub fn load_or_compute(
        &self,
        store: &dyn CalibrationStore,
    ) -> Result<CalibrationParameters, CalibrationError> {
        if let Some(params) = store.load()? {
            info!("Loaded cached calibration (rms {:.4}px)", params.rms_error);
            return Ok(params);
        }

        info!("No cached calibration, recalibrating camera");
        let params = self.calibrate_from_dir()?;
        store.save(&params)?;
        Ok(params)
    }
}

impl Default for Calibrator {
    fn default() -> Self {
        Self::new(CalibrationConfig::default())
    }
}

/// Pattern images in `dir` whose file name starts with `prefix`, sorted
pub fn pattern_image_paths(dir: &Path, prefix: &str) -> Result<Vec<PathBuf>, CalibrationError> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let name_matches = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(prefix));
        let is_image = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| matches!(e.to_ascii_lowercase().as_str(), "jpg" | "jpeg" | "png" | "bmp"));
        if path.is_file() && name_matches && is_image {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chessboard::tests::render_board;

    #[test]
    fn test_no_pattern_fails() {
        let blank = GrayImage::from_pixel(320, 240, image::Luma([128]));
        let calibrator = Calibrator::default();
        let err = calibrator.calibrate(&[blank.clone(), blank]).unwrap_err();
        assert!(matches!(err, CalibrationError::NoPatternDetected { images: 2 }));
    }

    #[test]
    fn test_no_images_fails() {
        let calibrator = Calibrator::default();
        assert!(matches!(
            calibrator.calibrate(&[]),
            Err(CalibrationError::NoPatternDetected { images: 0 })
        ));
    }

    #[test]
    fn test_single_view_gives_invertible_matrix() {
        let board = render_board(640, 480, 40.0, 120.0, 100.0, 0.0);
        let calibrator = Calibrator::default();
        let params = calibrator.calibrate(&[board]).unwrap();
        assert!(params.success);
        assert!(params.camera_matrix().determinant().abs() > 1e-6);
        assert_eq!(params.rotation_vectors.len(), 1);
    }

    #[test]
    fn test_pattern_paths_filtered_and_sorted() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["calibration2.jpg", "calibration1.png", "other.jpg", "calibration3.txt"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        let paths = pattern_image_paths(dir.path(), "calibration").unwrap();
        let names: Vec<_> = paths
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["calibration1.png", "calibration2.jpg"]);
    }

    #[test]
    fn test_load_or_compute_uses_cache() {
        let store = InMemoryCalibrationStore::new();
        let cached = CalibrationParameters::ideal(640, 480, 500.0);
        store.save(&cached).unwrap();

        // Pattern dir does not exist, so only the cache can satisfy this
        let calibrator = Calibrator::new(CalibrationConfig {
            pattern_dir: PathBuf::from("/nonexistent/calibration"),
            ..Default::default()
        });
        let loaded = calibrator.load_or_compute(&store).unwrap();
        assert_eq!(loaded, cached);
        assert_eq!(store.write_count(), 1);
    }

    #[test]
    fn test_load_or_compute_persists_once() {
        let dir = tempfile::tempdir().unwrap();
        render_board(640, 480, 40.0, 120.0, 100.0, 0.0)
            .save(dir.path().join("calibration1.png"))
            .unwrap();

        let calibrator = Calibrator::new(CalibrationConfig {
            pattern_dir: dir.path().to_path_buf(),
            ..Default::default()
        });
        let store = InMemoryCalibrationStore::new();

        let first = calibrator.load_or_compute(&store).unwrap();
        let second = calibrator.load_or_compute(&store).unwrap();
        assert_eq!(first, second);
        assert_eq!(store.write_count(), 1);
    }
}
