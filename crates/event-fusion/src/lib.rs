//! Threat Fusion Engine
//!
//! Merges the lane position and object threat results of each frame into
//! one fixed-schema threat state:
//! - Collision, pedestrian, stop sign, traffic light, vehicle and bike flags
//! - One lateral position bucket plus an unknown flag
//! - Overlay colour policy exposed as data
//!
//! Sampled records go to registered [`ThreatSink`]s.

pub mod sink;
pub mod state;

pub use sink::{JsonLinesSink, ThreatRecord, ThreatSink};
pub use state::{OverlayColor, ThreatKind, ThreatState};

use adas::AdasAnalysis;
use ring_buffer::RingBuffer;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Fusion error types
#[derive(Error, Debug)]
pub enum FusionError {
    #[error("Sink I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Record encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Fusion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Publish a record every N fused frames (0 disables records)
    pub record_every_n_frames: u64,

    /// Recent states kept for consumers
    pub history_len: usize,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            record_every_n_frames: 10,
            history_len: 30,
        }
    }
}

/// Threat fusion engine
pub struct ThreatFusion {
    config: FusionConfig,

    /// Recent fused states (10s @ 3fps by default)
    history: RingBuffer<ThreatState>,

    sinks: Vec<Box<dyn ThreatSink>>,

    frames: u64,
}

impl ThreatFusion {
    /// Create new fusion engine
    pub fn new(config: FusionConfig) -> Self {
        Self {
            history: RingBuffer::new(config.history_len),
            config,
            sinks: Vec::new(),
            frames: 0,
        }
    }

    /// Register a record consumer
    pub fn add_sink(&mut self, sink: Box<dyn ThreatSink>) {
        self.sinks.push(sink);
    }

    /// Fuse one frame's analysis
    ///
    /// The first frame and every Nth after it are published to the sinks.
    /// A failing sink is logged and skipped; the fused state is returned
    /// regardless.
    pub fn fuse(&mut self, analysis: &AdasAnalysis, frame: u32) -> ThreatState {
        let state = ThreatState::fuse(&analysis.lane, &analysis.objects);
        self.history.push(state);

        let n = self.config.record_every_n_frames;
        let sampled = n > 0 && self.frames % n == 0;
        self.frames += 1;

        if sampled && !self.sinks.is_empty() {
            let record = ThreatRecord::new(frame, state);
            debug!("Publishing threat record for frame {}", frame);
            for sink in &mut self.sinks {
                if let Err(e) = sink.publish(&record) {
                    warn!("Dropping threat record for frame {}: {}", frame, e);
                }
            }
        }

        state
    }

    /// Most recent fused state
    pub fn last(&self) -> Option<&ThreatState> {
        self.history.latest()
    }

    pub fn history(&self) -> &RingBuffer<ThreatState> {
        &self.history
    }
}

impl Default for ThreatFusion {
    fn default() -> Self {
        Self::new(FusionConfig::default())
    }
}
