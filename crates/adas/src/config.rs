//! ADAS configuration

use serde::{Deserialize, Serialize};

/// ADAS configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AdasConfig {
    /// Sliding-window lane tracker
    pub lane: LaneTrackerConfig,

    /// Lateral position buckets
    pub position: LanePositionConfig,

    /// Object threat classification
    pub objects: ObjectThreatConfig,
}

/// Sliding-window search and fit parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LaneTrackerConfig {
    /// Horizontal bands, processed bottom to top
    pub windows: u32,

    /// Half-width of each search window (pixels)
    pub window_margin: u32,

    /// A band must yield more pixels than this to recenter its window
    pub min_pixels: usize,

    /// Rows excluded from the bottom of the base histogram
    pub histogram_bottom_margin: u32,

    /// Raw pixel sets kept per side
    pub pixel_history: usize,

    /// World-scaled fits kept per side
    pub fit_history: usize,

    /// Meters per pixel along x
    pub xm_per_pixel: f64,

    /// Meters per pixel along y
    pub ym_per_pixel: f64,
}

impl Default for LaneTrackerConfig {
    fn default() -> Self {
        Self {
            windows: 9,
            window_margin: 100,
            min_pixels: 50,
            histogram_bottom_margin: 30,
            pixel_history: 10,
            fit_history: 20,
            xm_per_pixel: 3.7 / 700.0,
            ym_per_pixel: 30.0 / 720.0,
        }
    }
}

/// Lane width sanity bounds and offset thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LanePositionConfig {
    /// Share of a side's maximum y that counts as near the vehicle
    pub near_region: f64,

    /// Narrowest plausible lane (pixels)
    pub min_lane_width: f64,

    /// Widest plausible lane (pixels)
    pub max_lane_width: f64,

    /// |offset| at or above this is FAR_LEFT/FAR_RIGHT
    pub far_offset: f64,

    /// |offset| above this is LEFT/RIGHT
    pub near_offset: f64,
}

impl Default for LanePositionConfig {
    fn default() -> Self {
        Self {
            near_region: 0.95,
            min_lane_width: 400.0,
            max_lane_width: 1100.0,
            far_offset: 75.0,
            near_offset: 50.0,
        }
    }
}

/// Object threat classifier parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectThreatConfig {
    /// Detections below this confidence are ignored
    pub confidence_threshold: f32,
}

impl Default for ObjectThreatConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.75,
        }
    }
}
