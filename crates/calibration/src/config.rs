//! Calibration configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Calibration configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Directory holding the chessboard pattern images
    pub pattern_dir: PathBuf,

    /// File name prefix of pattern images
    pub file_prefix: String,

    /// Cache record written after the first successful calibration
    pub cache_path: PathBuf,

    /// Inner corners per board row
    pub board_columns: usize,

    /// Inner corners per board column
    pub board_rows: usize,

    /// Edge length of one board square (object-space units)
    pub square_size: f64,

    /// Levenberg-Marquardt iteration cap
    pub max_iterations: usize,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            pattern_dir: PathBuf::from("camera_cal"),
            file_prefix: "calibration".to_string(),
            cache_path: PathBuf::from("camera_cal/calibration_data.bin"),
            board_columns: 9,
            board_rows: 6,
            square_size: 1.0,
            max_iterations: 50,
        }
    }
}
