//! Object threat classification from external detections
//!
//! Detections arrive from an external detector as COCO class ids with
//! normalized `[top, left, bottom, right]` boxes. Two zones are derived
//! from the frame size on every call:
//! - scan zone: middle half horizontally, bottom half vertically
//! - collision zone: middle quarter horizontally, bottom 1/12 vertically

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ObjectThreatConfig;

/// COCO class ids the classifier reacts to
pub mod class_id {
    pub const PEDESTRIAN: u32 = 1;
    pub const BIKES: [u32; 2] = [2, 4];
    pub const VEHICLES: [u32; 5] = [3, 6, 7, 8, 9];
    pub const TRAFFIC_LIGHT: u32 = 10;
    pub const STOP_SIGN: u32 = 13;
}

/// Detection from the external object detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedObject {
    /// COCO class id
    pub class_id: u32,

    /// Detection confidence [0, 1]
    pub confidence: f32,

    /// Normalized box [top, left, bottom, right]
    pub bbox: [f32; 4],
}

impl DetectedObject {
    pub fn new(class_id: u32, confidence: f32, bbox: [f32; 4]) -> Self {
        Self {
            class_id,
            confidence,
            bbox,
        }
    }
}

/// Object category of a class id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectClass {
    Pedestrian,
    Bike,
    Vehicle,
    TrafficLight,
    StopSign,
    Other,
}

impl ObjectClass {
    pub fn from_class_id(id: u32) -> Self {
        match id {
            class_id::PEDESTRIAN => ObjectClass::Pedestrian,
            class_id::TRAFFIC_LIGHT => ObjectClass::TrafficLight,
            class_id::STOP_SIGN => ObjectClass::StopSign,
            id if class_id::VEHICLES.contains(&id) => ObjectClass::Vehicle,
            id if class_id::BIKES.contains(&id) => ObjectClass::Bike,
            _ => ObjectClass::Other,
        }
    }
}

/// Object-origin threat flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectThreats {
    pub collision: bool,
    pub pedestrian: bool,
    pub stop_sign: bool,
    pub traffic_light: bool,
    pub vehicles: bool,
    pub bikes: bool,
}

/// Scan and collision zones in pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegionOfInterest {
    /// Scan zone top
    pub top: f64,
    pub left: f64,
    pub right: f64,
    /// Collision zone top
    pub collision_top: f64,
    pub collision_left: f64,
    pub collision_right: f64,
}

impl RegionOfInterest {
    pub fn for_frame(width: u32, height: u32) -> Self {
        let w = width as f64;
        let h = height as f64;
        Self {
            top: h / 2.0,
            left: w / 2.0 - w / 4.0,
            right: w / 2.0 + w / 4.0,
            collision_top: h - h / 12.0,
            collision_left: w / 2.0 - w / 8.0,
            collision_right: w / 2.0 + w / 8.0,
        }
    }

    /// Bottom below the collision top and the box touches or straddles
    /// the collision span
    pub fn is_collision(&self, left: f64, bottom: f64, right: f64) -> bool {
        let (cl, cr) = (self.collision_left, self.collision_right);
        let base = bottom > self.collision_top;
        let corner = (right < cr && right > cl) || (left < cr && left > cl);
        let straddles = left < cl && right > cr;
        base && (corner || straddles)
    }
}

/// Geometric classifier over external detections
#[derive(Debug, Clone, Default)]
pub struct ObjectThreatClassifier {
    config: ObjectThreatConfig,
}

impl ObjectThreatClassifier {
    pub fn new(config: ObjectThreatConfig) -> Self {
        Self { config }
    }

    /// Threat flags raised by `detections` on a `width`x`height` frame
    pub fn classify(&self, detections: &[DetectedObject], width: u32, height: u32) -> ObjectThreats {
        let roi = RegionOfInterest::for_frame(width, height);
        let mut threats = ObjectThreats::default();

        for det in detections
            .iter()
            .filter(|d| d.confidence >= self.config.confidence_threshold)
        {
            let [_, left, bottom, right] = det.bbox;
            let left = left as f64 * width as f64;
            let right = right as f64 * width as f64;
            let bottom = bottom as f64 * height as f64;
            debug!(
                "Detection class {} ({:.2}) x={:.1}..{:.1}px bottom={:.1}px",
                det.class_id, det.confidence, left, right, bottom
            );

            if roi.is_collision(left, bottom, right) {
                threats.collision = true;
            }

            let near = bottom > roi.top;
            match ObjectClass::from_class_id(det.class_id) {
                ObjectClass::Pedestrian => threats.pedestrian |= near,
                ObjectClass::StopSign => threats.stop_sign = true,
                ObjectClass::TrafficLight => threats.traffic_light = true,
                ObjectClass::Vehicle => threats.vehicles |= near,
                ObjectClass::Bike => threats.bikes |= near,
                ObjectClass::Other => {}
            }
        }

        threats
    }
}
