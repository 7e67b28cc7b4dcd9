//! Video Frame Library for the Lane Assist Pipeline
//!
//! Frames arrive from an external capture source as packed 8-bit RGB
//! buffers. This crate owns the frame type and rejects malformed input
//! at the boundary, before any pipeline stage touches it.

pub mod frame;

pub use frame::{VideoFrame, MIN_FRAME_DIMENSION};

use thiserror::Error;

/// Frame error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Invalid frame dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("Buffer size mismatch: expected {expected} bytes, got {actual}")]
    BufferSize { expected: usize, actual: usize },

    #[error("Unexpected frame size {actual_width}x{actual_height}, expected {expected_width}x{expected_height}")]
    UnexpectedSize {
        expected_width: u32,
        expected_height: u32,
        actual_width: u32,
        actual_height: u32,
    },
}
