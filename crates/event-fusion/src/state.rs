//! Unified threat state and overlay policy

use adas::{LaneAssessment, LanePosition, ObjectThreats};
use serde::{Deserialize, Serialize};

/// Fused per-frame threat state
///
/// One boolean per object threat and a single lateral bucket. Built fresh
/// for every processed frame and handed to consumers unmodified.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThreatState {
    pub collision: bool,
    pub pedestrian: bool,
    pub stop_sign: bool,
    pub traffic_light: bool,
    pub vehicles: bool,
    pub bikes: bool,

    /// Lateral position bucket (CENTER when unknown)
    pub position: LanePosition,

    /// No trustworthy lane this frame
    pub unknown: bool,

    /// Aspect-scaled lateral offset behind `position`
    pub offset: f64,
}

impl Default for ThreatState {
    /// State before any frame: nothing flagged, lane unknown
    fn default() -> Self {
        Self::fuse(
            &LaneAssessment {
                offset: 0.0,
                position: LanePosition::Center,
                unknown: true,
            },
            &ObjectThreats::default(),
        )
    }
}

impl ThreatState {
    /// Merge lane and object results
    pub fn fuse(lane: &LaneAssessment, objects: &ObjectThreats) -> Self {
        Self {
            collision: objects.collision,
            pedestrian: objects.pedestrian,
            stop_sign: objects.stop_sign,
            traffic_light: objects.traffic_light,
            vehicles: objects.vehicles,
            bikes: objects.bikes,
            position: lane.position,
            unknown: lane.unknown,
            offset: lane.offset,
        }
    }

    /// Lane overlay colour, `None` when the lane is unknown
    pub fn overlay_color(&self) -> Option<OverlayColor> {
        if self.unknown {
            None
        } else if self.position.is_far() || self.collision {
            Some(OverlayColor::Red)
        } else if self.position.is_near() {
            Some(OverlayColor::Orange)
        } else {
            Some(OverlayColor::Green)
        }
    }

    /// Raised warnings, most urgent first
    pub fn active_warnings(&self) -> Vec<ThreatKind> {
        let mut warnings = Vec::new();
        if self.collision {
            warnings.push(ThreatKind::Collision);
        }
        if self.pedestrian {
            warnings.push(ThreatKind::Pedestrian);
        }
        if !self.unknown {
            match self.position {
                LanePosition::FarLeft => warnings.push(ThreatKind::FarLeft),
                LanePosition::FarRight => warnings.push(ThreatKind::FarRight),
                LanePosition::Left => warnings.push(ThreatKind::Left),
                LanePosition::Right => warnings.push(ThreatKind::Right),
                LanePosition::Center => {}
            }
        }
        if self.stop_sign {
            warnings.push(ThreatKind::StopSign);
        }
        if self.traffic_light {
            warnings.push(ThreatKind::TrafficLight);
        }
        if self.vehicles {
            warnings.push(ThreatKind::Vehicles);
        }
        if self.bikes {
            warnings.push(ThreatKind::Bikes);
        }
        warnings
    }
}

/// Lane overlay colour chosen by the fusion policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverlayColor {
    Red,
    Orange,
    Green,
}

/// Individual warning for a voice or alert consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ThreatKind {
    Collision,
    Pedestrian,
    FarLeft,
    FarRight,
    Left,
    Right,
    StopSign,
    TrafficLight,
    Vehicles,
    Bikes,
}
