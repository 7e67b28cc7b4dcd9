//! Lane-feature extraction
//!
//! Three independent cues are combined into one binary mask:
//! - yellow paint by an HSV band
//! - near-white pixels after histogram equalization
//! - Canny edges with thresholds around the median intensity
//!
//! A 3x3 closing then bridges small gaps so dashed paint reads as solid.

use image::{GrayImage, Luma, RgbImage};
use imageproc::contrast::equalize_histogram;
use imageproc::distance_transform::Norm;
use imageproc::edges::canny;
use imageproc::filter::gaussian_blur_f32;
use imageproc::morphology::close;
use tracing::debug;
use video_frame::VideoFrame;

use crate::AdasError;

/// Foreground value of a mask
pub const MASK_ON: u8 = 255;

/// HSV band for yellow paint, exclusive on both ends (H in 0..180)
const YELLOW_LOW: [f32; 3] = [0.0, 70.0, 70.0];
const YELLOW_HIGH: [f32; 3] = [50.0, 255.0, 255.0];

/// Equalized intensity above this counts as white paint
const WHITE_THRESHOLD: u8 = 250;

const EDGE_BLUR_SIGMA: f32 = 0.8;
const EDGE_SIGMA: f32 = 0.33;
const EDGE_LOW_FLOOR: f32 = 10.0;
const EDGE_HIGH_FLOOR: f32 = 20.0;

/// Binary lane-feature mask (0 or 255) of a frame
pub fn extract_mask(frame: &VideoFrame) -> Result<GrayImage, AdasError> {
    let rgb = frame.to_rgb_image()?;
    let gray = frame.to_grayscale();

    let yellow = yellow_mask(&rgb);
    let white = white_mask(&gray);
    let edges = edge_mask(&gray);

    let mut combined = GrayImage::new(frame.width, frame.height);
    for (((out, y), w), e) in combined
        .pixels_mut()
        .zip(yellow.pixels())
        .zip(white.pixels())
        .zip(edges.pixels())
    {
        if y[0] > 0 || w[0] > 0 || e[0] > 0 {
            *out = Luma([MASK_ON]);
        }
    }

    let closed = close(&combined, Norm::LInf, 1);
    debug!(
        "Feature mask for frame {}: {} px",
        frame.sequence,
        closed.pixels().filter(|p| p[0] > 0).count()
    );
    Ok(closed)
}

/// Pixels inside the yellow HSV band
pub fn yellow_mask(rgb: &RgbImage) -> GrayImage {
    let mut mask = GrayImage::new(rgb.width(), rgb.height());
    for (out, px) in mask.pixels_mut().zip(rgb.pixels()) {
        let hsv = to_hsv(px[0], px[1], px[2]);
        let inside = (0..3).all(|i| hsv[i] > YELLOW_LOW[i] && hsv[i] < YELLOW_HIGH[i]);
        if inside {
            *out = Luma([MASK_ON]);
        }
    }
    mask
}

/// Near-white pixels of the equalized intensity image
///
/// A single-intensity image has nothing to equalize and yields no pixels.
pub fn white_mask(gray: &GrayImage) -> GrayImage {
    let first = gray.pixels().next().map(|p| p[0]);
    if gray.pixels().all(|p| Some(p[0]) == first) {
        return GrayImage::new(gray.width(), gray.height());
    }

    let mut mask = equalize_histogram(gray);
    for p in mask.pixels_mut() {
        p[0] = if p[0] > WHITE_THRESHOLD { MASK_ON } else { 0 };
    }
    mask
}

/// Canny edges with median-derived hysteresis thresholds
pub fn edge_mask(gray: &GrayImage) -> GrayImage {
    let blurred = gaussian_blur_f32(gray, EDGE_BLUR_SIGMA);
    let median = median_intensity(&blurred) as f32;
    let low = ((1.0 - EDGE_SIGMA) * median).max(EDGE_LOW_FLOOR);
    let high = ((1.0 + EDGE_SIGMA) * median).clamp(EDGE_HIGH_FLOOR, 255.0).max(low);
    canny(&blurred, low, high)
}

/// OpenCV-style 8-bit HSV: H in [0, 180), S and V in [0, 255]
fn to_hsv(r: u8, g: u8, b: u8) -> [f32; 3] {
    let (r, g, b) = (r as f32, g as f32, b as f32);
    let v = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = v - min;

    let s = if v > 0.0 { delta / v * 255.0 } else { 0.0 };
    let h = if delta == 0.0 {
        0.0
    } else if v == r {
        60.0 * (g - b) / delta
    } else if v == g {
        120.0 + 60.0 * (b - r) / delta
    } else {
        240.0 + 60.0 * (r - g) / delta
    };
    let h = if h < 0.0 { h + 360.0 } else { h };

    [h / 2.0, s, v]
}

fn median_intensity(gray: &GrayImage) -> u8 {
    let mut histogram = [0usize; 256];
    for p in gray.pixels() {
        histogram[p[0] as usize] += 1;
    }
    let half = (gray.width() as usize * gray.height() as usize).div_ceil(2);
    let mut seen = 0;
    for (value, count) in histogram.iter().enumerate() {
        seen += count;
        if seen >= half {
            return value as u8;
        }
    }
    0
}
