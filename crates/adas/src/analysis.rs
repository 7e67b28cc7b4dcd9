//! ADAS analysis results

use serde::{Deserialize, Serialize};

use crate::object::ObjectThreats;
use crate::position::LaneAssessment;

/// Complete ADAS analysis of one frame
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdasAnalysis {
    /// Lateral position and its bucket
    pub lane: LaneAssessment,

    /// Both lane sides were fitted on this frame
    pub lane_detected: bool,

    /// Mean radius of curvature (m)
    pub curvature_radius_m: Option<f64>,

    /// Lane centre offset at the bottom row (m)
    pub center_offset_m: Option<f64>,

    /// Lane outline in camera pixels, for an external overlay renderer
    pub lane_polygon: Option<Vec<[f64; 2]>>,

    /// Flags raised by external detections
    pub objects: ObjectThreats,
}
