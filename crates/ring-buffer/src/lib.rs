//! Bounded Ring Buffer
//!
//! Fixed-capacity history that evicts the oldest entry on overflow.
//! Used by the lane tracker for the recent pixel sets and fits of each
//! lane boundary.

mod buffer;

pub use buffer::RingBuffer;
