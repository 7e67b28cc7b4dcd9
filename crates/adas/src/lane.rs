//! Sliding-window lane tracking
//!
//! Works on a bird's-eye binary mask. A column histogram of the lower half
//! seeds one window per side; nine bands are then searched bottom to top,
//! each window recentering on the pixels found in its own band. Every side
//! gets a quadratic `x = a*y^2 + b*y + c` in pixel and world units, with
//! bounded histories of raw pixels and world fits.

use calibration::homography::apply_homography;
use image::GrayImage;
use nalgebra::{Matrix3, Point2, Vector3};
use ndarray::{s, ArrayView1, ArrayView2, Axis};
use ring_buffer::RingBuffer;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::LaneTrackerConfig;

/// Foreground pixel coordinate (x, y)
pub type Pixel = (u32, u32);

/// Quadratic `x = a*y^2 + b*y + c`
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct QuadraticFit {
    pub a: f64,
    pub b: f64,
    pub c: f64,
}

impl QuadraticFit {
    pub fn new(a: f64, b: f64, c: f64) -> Self {
        Self { a, b, c }
    }

    pub fn x_at(&self, y: f64) -> f64 {
        (self.a * y + self.b) * y + self.c
    }

    /// Least-squares fit through `(x, y)` points
    ///
    /// Needs at least three distinct y values.
    pub fn fit<I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = (f64, f64)> + Clone,
    {
        let mut distinct = Vec::with_capacity(3);
        let mut y_max = 0.0f64;
        for (_, y) in points.clone() {
            y_max = y_max.max(y.abs());
            if distinct.len() < 3 && !distinct.contains(&y) {
                distinct.push(y);
            }
        }
        if distinct.len() < 3 {
            return None;
        }

        // Normal equations in t = y / scale to keep them well conditioned
        let scale = if y_max > 0.0 { y_max } else { 1.0 };
        let mut t_pow = [0.0f64; 5];
        let mut xt = [0.0f64; 3];
        for (x, y) in points {
            let t = y / scale;
            let mut p = 1.0;
            for (k, acc) in t_pow.iter_mut().enumerate() {
                *acc += p;
                if k < 3 {
                    xt[k] += x * p;
                }
                p *= t;
            }
        }

        let normal = Matrix3::new(
            t_pow[4], t_pow[3], t_pow[2],
            t_pow[3], t_pow[2], t_pow[1],
            t_pow[2], t_pow[1], t_pow[0],
        );
        let rhs = Vector3::new(xt[2], xt[1], xt[0]);
        let solution = normal.lu().solve(&rhs)?;
        if !solution.iter().all(|v| v.is_finite()) {
            return None;
        }

        Some(Self {
            a: solution[0] / (scale * scale),
            b: solution[1] / scale,
            c: solution[2],
        })
    }

    /// Radius of curvature at `y`; `None` for a straight line
    pub fn curvature_radius(&self, y: f64) -> Option<f64> {
        if self.a.abs() < 1e-12 {
            return None;
        }
        let slope = 2.0 * self.a * y + self.b;
        Some((1.0 + slope * slope).powf(1.5) / (2.0 * self.a).abs())
    }
}

/// One side of the lane
#[derive(Debug, Clone)]
pub struct LaneBoundary {
    pixels: Vec<Pixel>,
    pixel_fit: Option<QuadraticFit>,
    world_fit: Option<QuadraticFit>,
    pixel_history: RingBuffer<Vec<Pixel>>,
    fit_history: RingBuffer<QuadraticFit>,
    detected: bool,
}

impl LaneBoundary {
    pub fn new(config: &LaneTrackerConfig) -> Self {
        Self {
            pixels: Vec::new(),
            pixel_fit: None,
            world_fit: None,
            pixel_history: RingBuffer::new(config.pixel_history),
            fit_history: RingBuffer::new(config.fit_history),
            detected: false,
        }
    }

    /// Candidate pixels of the latest frame
    pub fn pixels(&self) -> &[Pixel] {
        &self.pixels
    }

    /// Latest pixel-space fit (reused on frames without a detection)
    pub fn pixel_fit(&self) -> Option<&QuadraticFit> {
        self.pixel_fit.as_ref()
    }

    /// Latest world-space fit (meters)
    pub fn world_fit(&self) -> Option<&QuadraticFit> {
        self.world_fit.as_ref()
    }

    pub fn pixel_history(&self) -> &RingBuffer<Vec<Pixel>> {
        &self.pixel_history
    }

    pub fn fit_history(&self) -> &RingBuffer<QuadraticFit> {
        &self.fit_history
    }

    /// Fitted on the latest frame
    pub fn detected(&self) -> bool {
        self.detected
    }

    /// Mean of the world-fit history
    pub fn smoothed_world_fit(&self) -> Option<QuadraticFit> {
        let n = self.fit_history.len();
        if n == 0 {
            return None;
        }
        let (a, b, c) = self
            .fit_history
            .iter()
            .fold((0.0, 0.0, 0.0), |(a, b, c), f| (a + f.a, b + f.b, c + f.c));
        Some(QuadraticFit::new(a / n as f64, b / n as f64, c / n as f64))
    }

    /// Radius of curvature (m) of the smoothed fit at `y_m`
    pub fn curvature_radius_m(&self, y_m: f64) -> Option<f64> {
        self.smoothed_world_fit()?.curvature_radius(y_m)
    }

    /// Fit this frame's pixels; keeps the previous fit on failure
    fn update(&mut self, pixels: Vec<Pixel>, config: &LaneTrackerConfig) -> bool {
        let fits = if pixels.is_empty() {
            None
        } else {
            let pixel_space = pixels.iter().map(|&(x, y)| (x as f64, y as f64));
            let world_space = pixels
                .iter()
                .map(|&(x, y)| (x as f64 * config.xm_per_pixel, y as f64 * config.ym_per_pixel));
            QuadraticFit::fit(pixel_space).zip(QuadraticFit::fit(world_space))
        };

        self.detected = fits.is_some();
        match fits {
            Some((pixel_fit, world_fit)) => {
                self.pixel_fit = Some(pixel_fit);
                self.world_fit = Some(world_fit);
                self.pixel_history.push(pixels.clone());
                self.fit_history.push(world_fit);
            }
            None => {
                self.world_fit = self.fit_history.latest().copied();
            }
        }
        self.pixels = pixels;
        self.detected
    }
}

/// Lane tracker output for the latest frame
#[derive(Debug, Clone)]
pub struct LaneState {
    pub left: LaneBoundary,
    pub right: LaneBoundary,

    /// Both sides were fitted on the latest frame
    pub lane_detected: bool,

    /// Mean radius of curvature of both sides (m)
    pub curvature_radius_m: Option<f64>,

    /// Lane centre minus image centre at the bottom row (m), positive to
    /// the right like [`crate::LanePosition`]
    pub center_offset_m: Option<f64>,
}

impl LaneState {
    pub fn new(config: &LaneTrackerConfig) -> Self {
        Self {
            left: LaneBoundary::new(config),
            right: LaneBoundary::new(config),
            lane_detected: false,
            curvature_radius_m: None,
            center_offset_m: None,
        }
    }

    /// Closed lane outline projected back into the camera image
    ///
    /// Left curve top to bottom, then right curve bottom to top, sampled
    /// every `step` rows of a bird's-eye frame of `height`.
    pub fn polygon(&self, inverse: &Matrix3<f64>, height: u32, step: u32) -> Option<Vec<Point2<f64>>> {
        let left = self.left.pixel_fit()?;
        let right = self.right.pixel_fit()?;

        let mut rows: Vec<f64> = (0..height).step_by(step.max(1) as usize).map(f64::from).collect();
        rows.push(height.saturating_sub(1) as f64);
        rows.dedup();

        let left_side = rows.iter().map(|&y| Point2::new(left.x_at(y), y));
        let right_side = rows.iter().rev().map(|&y| Point2::new(right.x_at(y), y));
        left_side
            .chain(right_side)
            .map(|p| apply_homography(inverse, &p))
            .collect()
    }
}

/// Stateful sliding-window tracker; callers keep one per video stream
#[derive(Debug, Clone)]
pub struct LaneTracker {
    config: LaneTrackerConfig,
    state: LaneState,
}

impl LaneTracker {
    pub fn new(config: LaneTrackerConfig) -> Self {
        let state = LaneState::new(&config);
        Self { config, state }
    }

    pub fn state(&self) -> &LaneState {
        &self.state
    }

    /// Drop all fits and histories
    pub fn reset(&mut self) {
        self.state = LaneState::new(&self.config);
    }

    /// Search a bird's-eye mask and update the lane state
    pub fn locate(&mut self, warped: &GrayImage) -> &LaneState {
        let (width, height) = warped.dimensions();
        let (left_base, right_base) =
            lane_bases(warped, self.config.histogram_bottom_margin).unwrap_or((0, width / 2));
        let (left_pixels, right_pixels) = self.window_search(warped, left_base, right_base);

        debug!(
            "Lane bases {}/{}, candidates {}/{}",
            left_base,
            right_base,
            left_pixels.len(),
            right_pixels.len()
        );

        let left_ok = self.state.left.update(left_pixels, &self.config);
        let right_ok = self.state.right.update(right_pixels, &self.config);
        self.state.lane_detected = left_ok && right_ok;
        if !self.state.lane_detected {
            warn!(
                "Lane not detected (left: {}, right: {}), reusing last fit",
                left_ok, right_ok
            );
        }

        // Curvature and offset are both taken at the bottom image row
        let y_bottom = height.saturating_sub(1) as f64;
        let y_bottom_m = y_bottom * self.config.ym_per_pixel;
        self.state.curvature_radius_m = match (
            self.state.left.curvature_radius_m(y_bottom_m),
            self.state.right.curvature_radius_m(y_bottom_m),
        ) {
            (Some(l), Some(r)) => Some((l + r) / 2.0),
            (l, r) => l.or(r),
        };

        self.state.center_offset_m = match (self.state.left.pixel_fit(), self.state.right.pixel_fit()) {
            (Some(l), Some(r)) => {
                let lane_center = (l.x_at(y_bottom) + r.x_at(y_bottom)) / 2.0;
                Some((lane_center - width as f64 / 2.0) * self.config.xm_per_pixel)
            }
            _ => None,
        };

        &self.state
    }

    fn window_search(&self, mask: &GrayImage, left_base: u32, right_base: u32) -> (Vec<Pixel>, Vec<Pixel>) {
        let (width, height) = mask.dimensions();
        let windows = self.config.windows.max(1);
        let window_height = height / windows;
        let margin = self.config.window_margin as i64;

        let mut sliders = [left_base as i64, right_base as i64];
        let mut found: [Vec<Pixel>; 2] = [Vec::new(), Vec::new()];

        for band in 0..windows {
            let y_low = height - (band + 1) * window_height;
            let y_high = height - band * window_height;

            for (slider, side) in sliders.iter_mut().zip(found.iter_mut()) {
                let x_low = (*slider - margin).max(0) as u32;
                let x_high = (*slider + margin).clamp(0, width as i64) as u32;

                let mut band_pixels = Vec::new();
                for y in y_low..y_high {
                    for x in x_low..x_high {
                        if mask.get_pixel(x, y)[0] > 0 {
                            band_pixels.push((x, y));
                        }
                    }
                }

                if band_pixels.len() > self.config.min_pixels {
                    let sum: u64 = band_pixels.iter().map(|&(x, _)| x as u64).sum();
                    *slider = (sum / band_pixels.len() as u64) as i64;
                }
                side.extend(band_pixels);
            }
        }

        let [left, right] = found;
        (left, right)
    }
}

/// Left and right lane base columns from the lower-half histogram
///
/// Rows from `height / 2` up to `height - bottom_margin` are summed; the
/// first maximum of each half wins.
pub fn lane_bases(mask: &GrayImage, bottom_margin: u32) -> Option<(u32, u32)> {
    let (width, height) = mask.dimensions();
    if width < 2 {
        return None;
    }
    let view = ArrayView2::from_shape((height as usize, width as usize), mask.as_raw().as_slice()).ok()?;

    let start = (height / 2) as usize;
    let end = (height.saturating_sub(bottom_margin) as usize).max(start);
    let histogram = view
        .slice(s![start..end, ..])
        .mapv(|v| u32::from(v > 0))
        .sum_axis(Axis(0));

    let mid = (width / 2) as usize;
    let left = first_argmax(histogram.slice(s![..mid]));
    let right = first_argmax(histogram.slice(s![mid..])) + mid;
    Some((left as u32, right as u32))
}

fn first_argmax(values: ArrayView1<'_, u32>) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate() {
        if v > values[best] {
            best = i;
        }
    }
    best
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::features::MASK_ON;
    use image::Luma;
    use proptest::prelude::*;

    /// Bird's-eye mask with one vertical stripe per centre
    pub(crate) fn stripes(width: u32, height: u32, centers: &[u32], half_width: u32) -> GrayImage {
        GrayImage::from_fn(width, height, |x, _| {
            let on = centers
                .iter()
                .any(|&c| x + half_width >= c && x <= c + half_width);
            Luma([if on { MASK_ON } else { 0 }])
        })
    }

    /// Bird's-eye mask with stripes following `x = fit(y) + shift`
    fn curved(width: u32, height: u32, fit: QuadraticFit, shifts: &[f64], half_width: f64) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| {
            let on = shifts
                .iter()
                .any(|shift| (x as f64 - fit.x_at(y as f64) - shift).abs() <= half_width);
            Luma([if on { MASK_ON } else { 0 }])
        })
    }

    #[test]
    fn test_histogram_finds_stripe_centers() {
        let mask = stripes(1280, 720, &[300, 980], 0);
        let (left, right) = lane_bases(&mask, 30).unwrap();
        assert!(left.abs_diff(300) <= 1);
        assert!(right.abs_diff(980) <= 1);
    }

    #[test]
    fn test_histogram_ignores_bottom_margin() {
        let mut mask = stripes(640, 360, &[150, 470], 0);
        for y in 340..360 {
            for x in 0..640 {
                mask.put_pixel(x, y, Luma([MASK_ON]));
            }
        }
        assert_eq!(lane_bases(&mask, 30), Some((150, 470)));
    }

    #[test]
    fn test_recovers_quadratic_curve() {
        let truth = QuadraticFit::new(2.0e-4, -0.1, 400.0);
        let mask = curved(1280, 720, truth, &[0.0, 500.0], 6.0);

        let mut tracker = LaneTracker::new(LaneTrackerConfig::default());
        let state = tracker.locate(&mask);
        assert!(state.lane_detected);

        let fit = state.left.pixel_fit().unwrap();
        let rel = |got: f64, want: f64| ((got - want) / want).abs();
        assert!(rel(fit.a, truth.a) < 0.02, "a = {}", fit.a);
        assert!(rel(fit.b, truth.b) < 0.02, "b = {}", fit.b);
        assert!(rel(fit.c, truth.c) < 0.02, "c = {}", fit.c);
    }

    #[test]
    fn test_window_follows_curve() {
        // Drifts ~230px over the frame, beyond a single window
        let truth = QuadraticFit::new(8.0e-4, -0.9, 500.0);
        let mask = curved(1280, 720, truth, &[0.0, 560.0], 5.0);

        let mut tracker = LaneTracker::new(LaneTrackerConfig::default());
        let state = tracker.locate(&mask);
        let top_rows = state.left.pixels().iter().filter(|&&(_, y)| y < 80).count();
        assert!(top_rows > 0);
    }

    #[test]
    fn test_fallback_reuses_last_fit() {
        let mut tracker = LaneTracker::new(LaneTrackerConfig::default());
        tracker.locate(&stripes(1280, 720, &[340, 940], 8));
        let previous = *tracker.state().left.pixel_fit().unwrap();

        let state = tracker.locate(&GrayImage::new(1280, 720));
        assert!(!state.lane_detected);
        assert!(!state.left.detected());
        assert_eq!(state.left.pixel_fit(), Some(&previous));
        assert_eq!(state.left.fit_history().len(), 1);
        assert!(state.left.pixels().is_empty());
    }

    #[test]
    fn test_cold_start_without_lane() {
        let mut tracker = LaneTracker::new(LaneTrackerConfig::default());
        let state = tracker.locate(&GrayImage::new(640, 360));
        assert!(!state.lane_detected);
        assert!(state.left.pixel_fit().is_none());
        assert!(state.center_offset_m.is_none());
    }

    #[test]
    fn test_one_side_missing_is_not_detected() {
        let mut tracker = LaneTracker::new(LaneTrackerConfig::default());
        let state = tracker.locate(&stripes(1280, 720, &[340], 8));
        assert!(state.left.detected());
        assert!(!state.right.detected());
        assert!(!state.lane_detected);
    }

    #[test]
    fn test_histories_are_bounded() {
        let mut tracker = LaneTracker::new(LaneTrackerConfig::default());
        let mask = stripes(640, 360, &[150, 470], 6);
        for _ in 0..25 {
            tracker.locate(&mask);
        }
        let left = &tracker.state().left;
        assert_eq!(left.pixel_history().len(), 10);
        assert_eq!(left.fit_history().len(), 20);
        assert_eq!(left.fit_history().total_written(), 25);
    }

    #[test]
    fn test_straight_lane_has_no_curvature_and_centered_offset() {
        let mut tracker = LaneTracker::new(LaneTrackerConfig::default());
        let state = tracker.locate(&stripes(1280, 720, &[340, 940], 8));
        assert!(state.lane_detected);
        let offset = state.center_offset_m.unwrap();
        assert!(offset.abs() < 0.01, "offset {offset}");
        assert!(state.curvature_radius_m.map_or(true, |r| r > 1.0e4));
    }

    #[test]
    fn test_curvature_taken_at_bottom_row() {
        let config = LaneTrackerConfig::default();
        let mut tracker = LaneTracker::new(config.clone());
        let mask = curved(1280, 720, QuadraticFit::new(2.0e-4, -0.1, 400.0), &[0.0, 500.0], 6.0);
        let state = tracker.locate(&mask);

        let y_m = 719.0 * config.ym_per_pixel;
        let left = state.left.curvature_radius_m(y_m).unwrap();
        let right = state.right.curvature_radius_m(y_m).unwrap();
        let radius = state.curvature_radius_m.unwrap();
        assert!((radius - (left + right) / 2.0).abs() < 1e-9 * radius);
    }

    #[test]
    fn test_reset_forgets_fits_and_histories() {
        let mut tracker = LaneTracker::new(LaneTrackerConfig::default());
        tracker.locate(&stripes(1280, 720, &[340, 940], 8));
        assert!(tracker.state().left.pixel_fit().is_some());

        tracker.reset();
        let state = tracker.locate(&GrayImage::new(1280, 720));
        assert!(!state.lane_detected);
        assert!(state.left.pixel_fit().is_none());
        assert!(state.right.fit_history().is_empty());
    }

    #[test]
    fn test_polygon_outline() {
        let mut tracker = LaneTracker::new(LaneTrackerConfig::default());
        tracker.locate(&stripes(1280, 720, &[340, 940], 8));
        let polygon = tracker.state().polygon(&Matrix3::identity(), 720, 80).unwrap();
        // 9 sampled rows plus the bottom row, per side
        assert_eq!(polygon.len(), 20);
        assert!((polygon[0].x - 340.0).abs() < 1.0);
        assert!((polygon[19].x - 940.0).abs() < 1.0);
    }

    #[test]
    fn test_curvature_radius_of_circle_approximation() {
        let fit = QuadraticFit::new(0.5 / 1000.0, 0.0, 0.0);
        let r = fit.curvature_radius(0.0).unwrap();
        assert!((r - 1000.0).abs() < 1e-9);
    }

    #[test]
    fn test_fit_needs_three_rows() {
        let points = [(1.0, 5.0), (2.0, 5.0), (3.0, 6.0)];
        assert!(QuadraticFit::fit(points).is_none());
    }

    proptest! {
        #[test]
        fn test_fit_recovers_exact_quadratic(
            a in -1.0e-3f64..1.0e-3,
            b in -1.0f64..1.0,
            c in 0.0f64..1000.0,
        ) {
            let truth = QuadraticFit::new(a, b, c);
            let points: Vec<(f64, f64)> = (0..50)
                .map(|i| {
                    let y = i as f64 * 14.0;
                    (truth.x_at(y), y)
                })
                .collect();
            let fit = QuadraticFit::fit(points.iter().copied()).unwrap();
            for &(x, y) in &points {
                prop_assert!((fit.x_at(y) - x).abs() < 1e-6);
            }
        }
    }
}
