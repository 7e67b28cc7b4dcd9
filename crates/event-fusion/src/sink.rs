//! Threat consumers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;

use crate::state::{OverlayColor, ThreatKind, ThreatState};
use crate::FusionError;

/// Sampled threat record for logging consumers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreatRecord {
    pub timestamp: DateTime<Utc>,

    /// Sequence number of the source frame
    pub frame: u32,

    #[serde(flatten)]
    pub state: ThreatState,

    pub overlay: Option<OverlayColor>,
    pub warnings: Vec<ThreatKind>,
}

impl ThreatRecord {
    pub fn new(frame: u32, state: ThreatState) -> Self {
        Self {
            timestamp: Utc::now(),
            frame,
            overlay: state.overlay_color(),
            warnings: state.active_warnings(),
            state,
        }
    }
}

/// Receives sampled threat records
pub trait ThreatSink: Send {
    fn publish(&mut self, record: &ThreatRecord) -> Result<(), FusionError>;
}

/// Writes one JSON object per line
pub struct JsonLinesSink<W: Write + Send> {
    writer: W,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> ThreatSink for JsonLinesSink<W> {
    fn publish(&mut self, record: &ThreatRecord) -> Result<(), FusionError> {
        serde_json::to_writer(&mut self.writer, record)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}
