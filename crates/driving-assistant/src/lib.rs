//! Driving Assistant Pipeline
//!
//! Wires the stages into one synchronous per-frame pass:
//! validate → undistort → lane features → bird's-eye → lane tracker →
//! lane position + object threats → fused threat state.
//!
//! Calibration is loaded (or computed and cached) once at construction.

pub mod config;

pub use config::{AssistantConfig, LoggingConfig};

use adas::{AdasAnalysis, AdasError, AdasModule, DetectedObject};
use calibration::{CalibrationError, CalibrationParameters, CalibrationStore, Calibrator, UndistortMap};
use event_fusion::{ThreatFusion, ThreatSink, ThreatState};
use thiserror::Error;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use video_frame::{FrameError, VideoFrame};

/// Pipeline error types
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Calibration failed: {0}")]
    Calibration(#[from] CalibrationError),

    #[error("Calibration unusable (rms {rms_error:.4}px)")]
    UnusableCalibration { rms_error: f64 },

    #[error("Frame rejected: {0}")]
    InvalidFrame(#[from] FrameError),

    #[error("ADAS error: {0}")]
    Adas(#[from] AdasError),
}

/// Initialize logging
pub fn init_logging(config: &LoggingConfig) {
    let level = config.level.parse::<Level>().unwrap_or(Level::INFO);
    let builder = FmtSubscriber::builder().with_max_level(level).with_target(true);

    if config.json {
        tracing::subscriber::set_global_default(builder.json().finish())
            .expect("Failed to set tracing subscriber");
    } else {
        tracing::subscriber::set_global_default(builder.finish())
            .expect("Failed to set tracing subscriber");
    }
}

/// Per-stream driving assistant
pub struct DrivingAssistant {
    calibration: CalibrationParameters,
    frame_size: Option<(u32, u32)>,
    undistort: Option<UndistortMap>,
    adas: AdasModule,
    fusion: ThreatFusion,
    last_analysis: Option<AdasAnalysis>,
}

impl DrivingAssistant {
    /// Load or compute calibration, then build the pipeline
    pub fn new(config: &AssistantConfig, store: &dyn CalibrationStore) -> Result<Self, PipelineError> {
        let calibrator = Calibrator::new(config.calibration.clone());
        let params = calibrator.load_or_compute(store)?;
        Self::with_calibration(params, config)
    }

    /// Build the pipeline around known calibration parameters
    ///
    /// Parameters flagged unsuccessful are refused.
    pub fn with_calibration(calibration: CalibrationParameters, config: &AssistantConfig) -> Result<Self, PipelineError> {
        if !calibration.success {
            warn!("Refusing failed calibration (rms {:.4}px)", calibration.rms_error);
            return Err(PipelineError::UnusableCalibration {
                rms_error: calibration.rms_error,
            });
        }
        info!(
            "Driving assistant ready: calibrated at {}x{}, rms {:.4}px",
            calibration.image_width, calibration.image_height, calibration.rms_error
        );

        Ok(Self {
            calibration,
            frame_size: config.frame_size,
            undistort: None,
            adas: AdasModule::new(config.adas.clone()),
            fusion: ThreatFusion::new(config.fusion.clone()),
            last_analysis: None,
        })
    }

    /// Register a threat record consumer
    pub fn add_sink(&mut self, sink: Box<dyn ThreatSink>) {
        self.fusion.add_sink(sink);
    }

    /// Run one frame through the pipeline
    ///
    /// A rejected frame leaves the previous threat state in place.
    pub fn process(&mut self, frame: &VideoFrame, detections: &[DetectedObject]) -> Result<ThreatState, PipelineError> {
        let checked = match self.frame_size {
            Some((width, height)) => frame.validate_size(width, height),
            None => frame.validate(),
        };
        if let Err(e) = checked {
            warn!("Rejecting frame {}: {}", frame.sequence, e);
            return Err(e.into());
        }

        let map = match self.undistort.take() {
            Some(map) if map.matches(frame) => map,
            previous => {
                if previous.is_some() {
                    info!("Stream resolution changed to {}x{}, resetting lane history", frame.width, frame.height);
                    self.adas.reset();
                }
                debug!("Building undistortion map for {}x{}", frame.width, frame.height);
                UndistortMap::new(&self.calibration, frame.width, frame.height)
            }
        };
        let corrected = map.apply(frame);
        self.undistort = Some(map);

        let analysis = self.adas.analyze(&corrected, detections)?;
        let state = self.fusion.fuse(&analysis, frame.sequence);

        self.last_analysis = Some(analysis);
        Ok(state)
    }

    /// Threat state of the last accepted frame (lane unknown before any)
    pub fn last_state(&self) -> ThreatState {
        self.fusion.last().copied().unwrap_or_default()
    }

    /// Full analysis of the last accepted frame (lane polygon, curvature)
    pub fn last_analysis(&self) -> Option<&AdasAnalysis> {
        self.last_analysis.as_ref()
    }

    pub fn calibration(&self) -> &CalibrationParameters {
        &self.calibration
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adas::perspective::birdseye_transforms;
    use adas::LanePosition;
    use calibration::homography::apply_homography;
    use calibration::InMemoryCalibrationStore;
    use event_fusion::{FusionError, ThreatRecord};
    use nalgebra::Point2;
    use std::path::PathBuf;

    fn cached_store() -> InMemoryCalibrationStore {
        let store = InMemoryCalibrationStore::new();
        store.save(&CalibrationParameters::ideal(320, 240, 300.0)).unwrap();
        store
    }

    fn config() -> AssistantConfig {
        let mut config = AssistantConfig::default();
        config.calibration.pattern_dir = PathBuf::from("/nonexistent/calibration");
        config
    }

    fn gray_frame(width: u32, height: u32, sequence: u32) -> VideoFrame {
        VideoFrame::new(vec![90; (width * height * 3) as usize], width, height, 0, sequence)
    }

    /// Road frame whose bird's-eye view holds stripes at x = 340 and 940
    fn lane_frame(sequence: u32) -> VideoFrame {
        let (width, height) = (1280, 720);
        let (forward, _) = birdseye_transforms(width, height).unwrap();
        let horizon = height as f64 * 2.0 / 3.0;
        let mut data = Vec::with_capacity((width * height * 3) as usize);
        for v in 0..height {
            let road = (120 - v * 100 / height) as u8;
            for u in 0..width {
                let mut value = road;
                if v as f64 >= horizon {
                    if let Some(p) = apply_homography(&forward, &Point2::new(u as f64, v as f64)) {
                        if (p.x - 340.0).abs() <= 10.0 || (p.x - 940.0).abs() <= 10.0 {
                            value = 255;
                        }
                    }
                }
                data.extend_from_slice(&[value, value, value]);
            }
        }
        VideoFrame::new(data, width, height, 0, sequence)
    }

    struct BrokenSink;

    impl ThreatSink for BrokenSink {
        fn publish(&mut self, _record: &ThreatRecord) -> Result<(), FusionError> {
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "logger gone").into())
        }
    }

    #[test]
    fn test_uses_cached_calibration() {
        let store = cached_store();
        let assistant = DrivingAssistant::new(&config(), &store).unwrap();
        assert_eq!(assistant.calibration().image_width, 320);
        assert_eq!(store.write_count(), 1);
    }

    #[test]
    fn test_missing_calibration_fails_fast() {
        let store = InMemoryCalibrationStore::new();
        let result = DrivingAssistant::new(&config(), &store);
        assert!(matches!(result, Err(PipelineError::Calibration(_))));
    }

    #[test]
    fn test_failed_calibration_is_refused() {
        let mut params = CalibrationParameters::ideal(320, 240, 300.0);
        params.success = false;
        params.rms_error = f64::NAN;
        let result = DrivingAssistant::with_calibration(params, &config());
        assert!(matches!(result, Err(PipelineError::UnusableCalibration { .. })));
    }

    #[test]
    fn test_blank_frame_gives_unknown_lane() {
        let store = cached_store();
        let mut assistant = DrivingAssistant::new(&config(), &store).unwrap();
        let state = assistant.process(&gray_frame(320, 240, 0), &[]).unwrap();
        assert!(state.unknown);
        assert_eq!(state.position, LanePosition::Center);
        assert_eq!(state.overlay_color(), None);
        assert!(assistant.last_analysis().is_some());
    }

    #[test]
    fn test_collision_reported() {
        let store = cached_store();
        let mut assistant = DrivingAssistant::new(&config(), &store).unwrap();
        let car = DetectedObject::new(3, 0.9, [0.5, 0.3, 0.95, 0.7]);
        let state = assistant.process(&gray_frame(320, 240, 1), &[car]).unwrap();
        assert!(state.collision);
        assert!(state.vehicles);
        assert_eq!(assistant.last_state(), state);
    }

    #[test]
    fn test_state_before_any_frame_is_unknown() {
        let store = cached_store();
        let assistant = DrivingAssistant::new(&config(), &store).unwrap();
        assert_eq!(assistant.last_state(), ThreatState::default());
        assert!(assistant.last_analysis().is_none());
    }

    #[test]
    fn test_rejected_frame_keeps_previous_state() {
        let store = cached_store();
        let mut assistant = DrivingAssistant::new(&config(), &store).unwrap();
        let car = DetectedObject::new(3, 0.9, [0.5, 0.3, 0.95, 0.7]);
        let before = assistant.process(&gray_frame(320, 240, 0), &[car]).unwrap();

        let truncated = VideoFrame::new(vec![0; 100], 320, 240, 0, 1);
        let result = assistant.process(&truncated, &[]);
        assert!(matches!(result, Err(PipelineError::InvalidFrame(_))));
        assert_eq!(assistant.last_state(), before);
    }

    #[test]
    fn test_unexpected_frame_size_rejected() {
        let store = cached_store();
        let mut config = config();
        config.frame_size = Some((320, 240));
        let mut assistant = DrivingAssistant::new(&config, &store).unwrap();
        let car = DetectedObject::new(3, 0.9, [0.5, 0.3, 0.95, 0.7]);
        let before = assistant.process(&gray_frame(320, 240, 0), &[car]).unwrap();

        let result = assistant.process(&gray_frame(160, 120, 1), &[]);
        assert!(matches!(
            result,
            Err(PipelineError::InvalidFrame(FrameError::UnexpectedSize { .. }))
        ));
        assert_eq!(assistant.last_state(), before);
    }

    #[test]
    fn test_failing_sink_keeps_frame() {
        let store = cached_store();
        let mut config = config();
        config.fusion.record_every_n_frames = 1;
        let mut assistant = DrivingAssistant::new(&config, &store).unwrap();
        assistant.add_sink(Box::new(BrokenSink));

        let car = DetectedObject::new(3, 0.9, [0.5, 0.3, 0.95, 0.7]);
        let state = assistant.process(&gray_frame(320, 240, 0), &[car]).unwrap();
        assert!(state.collision);
        assert_eq!(assistant.last_state(), state);
        assert!(assistant.last_analysis().is_some());

        // The pipeline keeps going on later frames
        assert!(assistant.process(&gray_frame(320, 240, 1), &[]).is_ok());
    }

    #[test]
    fn test_resolution_change_resets_lane_history() {
        let store = cached_store();
        let mut assistant = DrivingAssistant::new(&config(), &store).unwrap();

        assistant.process(&lane_frame(0), &[]).unwrap();
        assert!(assistant.last_analysis().unwrap().center_offset_m.is_some());

        // Without a reset the previous fits would be reused here
        assistant.process(&gray_frame(640, 360, 1), &[]).unwrap();
        let analysis = assistant.last_analysis().unwrap();
        assert!(!analysis.lane_detected);
        assert!(analysis.center_offset_m.is_none());

        let map = assistant.undistort.as_ref().unwrap();
        assert_eq!((map.width(), map.height()), (640, 360));
    }
}
