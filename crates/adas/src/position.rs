//! Lateral lane position classification

use serde::{Deserialize, Serialize};

use crate::config::LanePositionConfig;
use crate::lane::{LaneBoundary, LaneState};

/// Lateral position bucket
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LanePosition {
    FarLeft,
    Left,
    #[default]
    Center,
    Right,
    FarRight,
}

impl LanePosition {
    /// FAR_LEFT or FAR_RIGHT
    pub fn is_far(&self) -> bool {
        matches!(self, LanePosition::FarLeft | LanePosition::FarRight)
    }

    /// LEFT or RIGHT
    pub fn is_near(&self) -> bool {
        matches!(self, LanePosition::Left | LanePosition::Right)
    }
}

/// Lateral offset and its bucket for one frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LaneAssessment {
    /// Aspect-scaled offset of the lane centre from the image centre
    pub offset: f64,
    pub position: LanePosition,
    /// No trustworthy lane this frame
    pub unknown: bool,
}

impl LaneAssessment {
    fn unknown() -> Self {
        Self {
            offset: 0.0,
            position: LanePosition::Center,
            unknown: true,
        }
    }
}

/// Pure classifier from lane state to lateral position
#[derive(Debug, Clone, Default)]
pub struct LanePositionClassifier {
    config: LanePositionConfig,
}

impl LanePositionClassifier {
    pub fn new(config: LanePositionConfig) -> Self {
        Self { config }
    }

    /// Classify the vehicle's lateral position for a `width`x`height` frame
    pub fn classify(&self, state: &LaneState, width: u32, height: u32) -> LaneAssessment {
        if !state.lane_detected || width == 0 {
            return LaneAssessment::unknown();
        }

        let near = self.config.near_region;
        let (Some(left), Some(right)) = (near_boundary(&state.left, near), near_boundary(&state.right, near))
        else {
            return LaneAssessment::unknown();
        };

        let lane_width = right - left;
        if lane_width < self.config.min_lane_width || lane_width > self.config.max_lane_width {
            return LaneAssessment::unknown();
        }

        let center = width as f64 / 2.0;
        let offset = ((left + lane_width / 2.0) - center) * (height as f64 / width as f64);
        LaneAssessment {
            offset,
            position: self.bucket(offset),
            unknown: false,
        }
    }

    /// Bucket an offset by the configured literal thresholds
    pub fn bucket(&self, offset: f64) -> LanePosition {
        let far = self.config.far_offset;
        let near = self.config.near_offset;
        if offset >= far {
            LanePosition::FarRight
        } else if offset <= -far {
            LanePosition::FarLeft
        } else if offset > near {
            LanePosition::Right
        } else if offset < -near {
            LanePosition::Left
        } else {
            LanePosition::Center
        }
    }
}

/// Mean x of the samples below `near` times the deepest sample row
fn near_boundary(boundary: &LaneBoundary, near: f64) -> Option<f64> {
    let pixels = boundary.pixels();
    let max_y = pixels.iter().map(|&(_, y)| y).max()? as f64;
    let cutoff = near * max_y;

    let (sum, count) = pixels
        .iter()
        .filter(|&&(_, y)| y as f64 > cutoff)
        .fold((0.0, 0usize), |(s, n), &(x, _)| (s + x as f64, n + 1));
    (count > 0).then(|| sum / count as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LaneTrackerConfig;
    use crate::lane::tests::stripes;
    use crate::lane::LaneTracker;
    use proptest::prelude::*;

    fn classifier() -> LanePositionClassifier {
        LanePositionClassifier::default()
    }

    /// Tracked lane with stripes at `left` and `right` on a 1280x720 mask
    fn tracked(left: u32, right: u32) -> LaneState {
        let mut tracker = LaneTracker::new(LaneTrackerConfig::default());
        tracker.locate(&stripes(1280, 720, &[left, right], 0)).clone()
    }

    #[test]
    fn test_bucket_boundaries_are_literal() {
        let c = classifier();
        assert_eq!(c.bucket(74.9), LanePosition::Right);
        assert_eq!(c.bucket(-74.9), LanePosition::Left);
        assert_eq!(c.bucket(75.0), LanePosition::FarRight);
        assert_eq!(c.bucket(-75.0), LanePosition::FarLeft);
        assert_eq!(c.bucket(-50.1), LanePosition::Left);
        assert_eq!(c.bucket(50.0), LanePosition::Center);
        assert_eq!(c.bucket(-50.0), LanePosition::Center);
        assert_eq!(c.bucket(0.0), LanePosition::Center);
    }

    #[test]
    fn test_lane_width_sanity() {
        let c = classifier();
        // Centred lanes of a given width on a 1280 frame
        let check = |width: u32| {
            let left = 640 - width / 2;
            let right = left + width;
            c.classify(&tracked(left, right), 1280, 720).unknown
        };
        assert!(check(399));
        assert!(!check(400));
        assert!(!check(1100));
        assert!(check(1101));
    }

    #[test]
    fn test_centered_lane_is_center() {
        let assessment = classifier().classify(&tracked(340, 940), 1280, 720);
        assert!(!assessment.unknown);
        assert_eq!(assessment.position, LanePosition::Center);
        assert!(assessment.offset.abs() < 1e-9);
    }

    #[test]
    fn test_offset_uses_aspect_ratio() {
        // Lane centre 160px right of image centre: 160 * 720/1280 = 90
        let assessment = classifier().classify(&tracked(500, 1100), 1280, 720);
        assert!((assessment.offset - 90.0).abs() < 1e-9);
        assert_eq!(assessment.position, LanePosition::FarRight);
    }

    #[test]
    fn test_undetected_lane_is_unknown_center() {
        let mut tracker = LaneTracker::new(LaneTrackerConfig::default());
        let state = tracker.locate(&stripes(1280, 720, &[340], 0)).clone();
        let assessment = classifier().classify(&state, 1280, 720);
        assert_eq!(assessment, LaneAssessment::unknown());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn test_classify_is_pure(left in 100u32..600, width in 300u32..700) {
            let state = tracked(left, left + width);
            let c = classifier();
            prop_assert_eq!(c.classify(&state, 1280, 720), c.classify(&state, 1280, 720));
        }

        #[test]
        fn test_bucket_is_monotonic(a in -200.0f64..200.0, b in -200.0f64..200.0) {
            let c = classifier();
            let rank = |p: LanePosition| match p {
                LanePosition::FarLeft => 0,
                LanePosition::Left => 1,
                LanePosition::Center => 2,
                LanePosition::Right => 3,
                LanePosition::FarRight => 4,
            };
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(rank(c.bucket(lo)) <= rank(c.bucket(hi)));
        }
    }
}
