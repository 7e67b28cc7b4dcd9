//! Advanced Driver Assistance System (ADAS)
//!
//! Lane position estimation and object threat classification for a single
//! forward-facing camera:
//! - Lane-feature extraction (yellow, white and edge cues)
//! - Bird's-eye perspective rectification
//! - Sliding-window lane tracking with bounded histories
//! - Lateral position buckets
//! - Collision and category flags from external detections

pub mod analysis;
pub mod config;
pub mod features;
pub mod lane;
pub mod object;
pub mod perspective;
pub mod position;

pub use analysis::AdasAnalysis;
pub use config::{AdasConfig, LanePositionConfig, LaneTrackerConfig, ObjectThreatConfig};
pub use features::extract_mask;
pub use lane::{LaneBoundary, LaneState, LaneTracker, QuadraticFit};
pub use object::{DetectedObject, ObjectClass, ObjectThreatClassifier, ObjectThreats, RegionOfInterest};
pub use perspective::{to_birdseye, BirdseyeView};
pub use position::{LaneAssessment, LanePosition, LanePositionClassifier};

use thiserror::Error;
use tracing::debug;
use video_frame::{FrameError, VideoFrame};

/// Rows between lane polygon samples
const POLYGON_STEP: u32 = 20;

/// ADAS error types
#[derive(Error, Debug)]
pub enum AdasError {
    #[error("Invalid frame: {0}")]
    InvalidFrame(#[from] FrameError),

    #[error("Perspective transform failed: {0}")]
    Perspective(String),
}

/// ADAS module
///
/// Owns the lane tracker, so one instance serves one video stream.
pub struct AdasModule {
    tracker: LaneTracker,
    positions: LanePositionClassifier,
    objects: ObjectThreatClassifier,
}

impl AdasModule {
    /// Create new ADAS module
    pub fn new(config: AdasConfig) -> Self {
        Self {
            tracker: LaneTracker::new(config.lane),
            positions: LanePositionClassifier::new(config.position),
            objects: ObjectThreatClassifier::new(config.objects),
        }
    }

    /// Forget lane history, e.g. after the stream changes resolution
    pub fn reset(&mut self) {
        self.tracker.reset();
    }

    /// Analyze an undistorted frame and its detections
    pub fn analyze(&mut self, frame: &VideoFrame, detections: &[DetectedObject]) -> Result<AdasAnalysis, AdasError> {
        let (width, height) = (frame.width, frame.height);

        let mask = extract_mask(frame)?;
        let view = to_birdseye(&mask)?;
        let state = self.tracker.locate(&view.mask);

        let lane = self.positions.classify(state, width, height);
        let lane_polygon = state
            .polygon(&view.inverse, height, POLYGON_STEP)
            .map(|points| points.iter().map(|p| [p.x, p.y]).collect());
        let objects = self.objects.classify(detections, width, height);

        debug!(
            "Frame {}: lane {:?} (offset {:.1}, unknown {}), objects {:?}",
            frame.sequence, lane.position, lane.offset, lane.unknown, objects
        );

        Ok(AdasAnalysis {
            lane,
            lane_detected: state.lane_detected,
            curvature_radius_m: state.curvature_radius_m,
            center_offset_m: state.center_offset_m,
            lane_polygon,
            objects,
        })
    }
}

impl Default for AdasModule {
    fn default() -> Self {
        Self::new(AdasConfig::default())
    }
}
