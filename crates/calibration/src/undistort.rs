//! Frame undistortion

use crate::params::{CalibrationParameters, Intrinsics};
use video_frame::VideoFrame;

/// Precomputed source coordinate of every destination pixel
///
/// The corrected image keeps the original camera matrix as its own, so
/// only lens distortion is removed.
#[derive(Debug, Clone)]
pub struct UndistortMap {
    width: u32,
    height: u32,
    map: Vec<(f32, f32)>,
}

impl UndistortMap {
    pub fn new(params: &CalibrationParameters, width: u32, height: u32) -> Self {
        let intrinsics = params.intrinsics();
        let mut map = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            for x in 0..width {
                map.push(source_coordinate(&intrinsics, x as f64, y as f64));
            }
        }
        Self { width, height, map }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Frame size this map was built for
    pub fn matches(&self, frame: &VideoFrame) -> bool {
        frame.width == self.width && frame.height == self.height
    }

    /// Resample `frame` through the map (bilinear)
    ///
    /// Samples falling outside the source read as black.
    pub fn apply(&self, frame: &VideoFrame) -> VideoFrame {
        let mut data = vec![0u8; self.map.len() * 3];
        for (out, &(sx, sy)) in data.chunks_exact_mut(3).zip(&self.map) {
            out.copy_from_slice(&bilinear(frame, sx, sy));
        }
        VideoFrame::new(data, self.width, self.height, frame.timestamp_ns, frame.sequence)
    }
}

/// Undistort a single frame
///
/// Builds a fresh map each call; reuse an [`UndistortMap`] for video.
pub fn undistort(frame: &VideoFrame, params: &CalibrationParameters) -> VideoFrame {
    UndistortMap::new(params, frame.width, frame.height).apply(frame)
}

fn source_coordinate(intrinsics: &Intrinsics, x: f64, y: f64) -> (f32, f32) {
    let xn = (x - intrinsics.cx) / intrinsics.fx;
    let yn = (y - intrinsics.cy) / intrinsics.fy;
    let (xd, yd) = intrinsics.distort_normalized(xn, yn);
    (
        (intrinsics.fx * xd + intrinsics.cx) as f32,
        (intrinsics.fy * yd + intrinsics.cy) as f32,
    )
}

fn bilinear(frame: &VideoFrame, x: f32, y: f32) -> [u8; 3] {
    if !x.is_finite() || !y.is_finite() {
        return [0; 3];
    }
    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;
    let (x0, y0) = (x0 as i64, y0 as i64);

    let sample = |px: i64, py: i64| -> [f32; 3] {
        if px < 0 || py < 0 || px >= frame.width as i64 || py >= frame.height as i64 {
            return [0.0; 3];
        }
        frame
            .get_pixel(px as u32, py as u32)
            .map(|p| [p[0] as f32, p[1] as f32, p[2] as f32])
            .unwrap_or([0.0; 3])
    };

    let p00 = sample(x0, y0);
    let p10 = sample(x0 + 1, y0);
    let p01 = sample(x0, y0 + 1);
    let p11 = sample(x0 + 1, y0 + 1);

    let mut out = [0u8; 3];
    for c in 0..3 {
        let top = p00[c] * (1.0 - fx) + p10[c] * fx;
        let bottom = p01[c] * (1.0 - fx) + p11[c] * fx;
        out[c] = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
    }
    out
}
