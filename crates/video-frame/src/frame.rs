//! Video frame types and conversions

use image::{GrayImage, Luma, RgbImage};
use tracing::debug;

use crate::FrameError;

/// Smallest width or height the lane pipeline accepts
pub const MIN_FRAME_DIMENSION: u32 = 64;

/// Decoded RGB video frame
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFrame {
    /// RGB pixel data (width * height * 3)
    pub data: Vec<u8>,
    /// Frame width
    pub width: u32,
    /// Frame height
    pub height: u32,
    /// Capture timestamp (nanoseconds)
    pub timestamp_ns: u64,
    /// Frame sequence number
    pub sequence: u32,
}

impl VideoFrame {
    /// Create a new video frame from raw RGB data
    pub fn new(data: Vec<u8>, width: u32, height: u32, timestamp_ns: u64, sequence: u32) -> Self {
        Self {
            data,
            width,
            height,
            timestamp_ns,
            sequence,
        }
    }

    /// Wrap a decoded RGB image
    pub fn from_rgb_image(image: RgbImage, timestamp_ns: u64, sequence: u32) -> Self {
        let (width, height) = image.dimensions();
        Self {
            data: image.into_raw(),
            width,
            height,
            timestamp_ns,
            sequence,
        }
    }

    /// Check dimensions and buffer length
    pub fn validate(&self) -> Result<(), FrameError> {
        if self.width < MIN_FRAME_DIMENSION || self.height < MIN_FRAME_DIMENSION {
            return Err(FrameError::InvalidDimensions {
                width: self.width,
                height: self.height,
            });
        }

        let expected = self.width as usize * self.height as usize * 3;
        if self.data.len() != expected {
            return Err(FrameError::BufferSize {
                expected,
                actual: self.data.len(),
            });
        }

        Ok(())
    }

    /// Validate and additionally require a fixed capture size
    pub fn validate_size(&self, width: u32, height: u32) -> Result<(), FrameError> {
        self.validate()?;
        if self.width != width || self.height != height {
            debug!(
                "Frame {} rejected: {}x{} != {}x{}",
                self.sequence, self.width, self.height, width, height
            );
            return Err(FrameError::UnexpectedSize {
                expected_width: width,
                expected_height: height,
                actual_width: self.width,
                actual_height: self.height,
            });
        }
        Ok(())
    }

    /// Get pixel at (x, y)
    pub fn get_pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = ((y * self.width + x) * 3) as usize;
        self.data.get(idx..idx + 3).map(|p| [p[0], p[1], p[2]])
    }

    /// Copy into an `RgbImage`
    pub fn to_rgb_image(&self) -> Result<RgbImage, FrameError> {
        let expected = self.width as usize * self.height as usize * 3;
        RgbImage::from_raw(self.width, self.height, self.data.clone()).ok_or(
            FrameError::BufferSize {
                expected,
                actual: self.data.len(),
            },
        )
    }

    /// Convert to grayscale
    pub fn to_grayscale(&self) -> GrayImage {
        let mut gray = GrayImage::new(self.width, self.height);
        for (dst, pixel) in gray.pixels_mut().zip(self.data.chunks_exact(3)) {
            *dst = Luma([luminance(pixel[0], pixel[1], pixel[2])]);
        }
        gray
    }
}

/// Luminance formula: 0.299*R + 0.587*G + 0.114*B, rounded
pub fn luminance(r: u8, g: u8, b: u8) -> u8 {
    (r as f32 * 0.299 + g as f32 * 0.587 + b as f32 * 0.114)
        .round()
        .clamp(0.0, 255.0) as u8
}
