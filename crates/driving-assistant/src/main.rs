//! Driving Assistant - Main Entry Point
//!
//! ```bash
//! driving-assistant <frames_dir> [detections.jsonl] [config.toml]
//! ```
//!
//! Frames are the image files of `frames_dir` in name order. Each line of
//! the detections file is a JSON array of detections for the frame with
//! the same index. Sampled threat records are written to stdout as JSON
//! lines.

use adas::DetectedObject;
use anyhow::{bail, Context, Result};
use calibration::FileCalibrationStore;
use driving_assistant::{init_logging, AssistantConfig, DrivingAssistant, PipelineError};
use event_fusion::JsonLinesSink;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};
use video_frame::VideoFrame;

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(frames_dir) = args.first().map(PathBuf::from) else {
        bail!("usage: driving-assistant <frames_dir> [detections.jsonl] [config.toml]");
    };
    let detections_path = args.get(1).map(PathBuf::from);
    let config_path = args.get(2).map(PathBuf::from);

    let config = AssistantConfig::load(config_path.as_deref()).context("Failed to load configuration")?;
    init_logging(&config.logging);

    info!("=== Driving Assistant v{} ===", env!("CARGO_PKG_VERSION"));

    let store = FileCalibrationStore::new(config.calibration.cache_path.clone());
    let mut assistant = DrivingAssistant::new(&config, &store).context("Camera calibration failed")?;
    assistant.add_sink(Box::new(JsonLinesSink::new(std::io::stdout())));

    let frames = frame_paths(&frames_dir)?;
    let detections = match detections_path {
        Some(path) => load_detections(&path)?,
        None => Vec::new(),
    };
    info!("Processing {} frame(s) from {}", frames.len(), frames_dir.display());

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown requested");
                stop.store(true, Ordering::SeqCst);
            }
        });
    }

    let mut processed = 0usize;
    for (index, path) in frames.iter().enumerate() {
        if stop.load(Ordering::SeqCst) {
            break;
        }

        let frame = match read_frame(path, index as u32) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Skipping {}: {:#}", path.display(), e);
                continue;
            }
        };
        let objects = detections.get(index).map(Vec::as_slice).unwrap_or(&[]);

        match assistant.process(&frame, objects) {
            Ok(_) => processed += 1,
            Err(PipelineError::InvalidFrame(e)) => warn!("Skipping {}: {}", path.display(), e),
            Err(e) => return Err(e.into()),
        }

        // Let the signal task run between frames
        tokio::task::yield_now().await;
    }

    info!("Processed {}/{} frame(s)", processed, frames.len());
    Ok(())
}

/// Image files of a directory in name order
fn frame_paths(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("Failed to list {}", dir.display()))? {
        let path = entry?.path();
        let is_image = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| matches!(e.to_ascii_lowercase().as_str(), "jpg" | "jpeg" | "png" | "bmp"));
        if path.is_file() && is_image {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

/// Decode one image file into an RGB frame
fn read_frame(path: &Path, sequence: u32) -> Result<VideoFrame> {
    let image = image::open(path)
        .with_context(|| format!("Failed to read frame {}", path.display()))?
        .to_rgb8();
    Ok(VideoFrame::from_rgb_image(image, 0, sequence))
}

/// One JSON array of detections per line; blank lines mean no detections
fn load_detections(path: &Path) -> Result<Vec<Vec<DetectedObject>>> {
    let file = std::fs::File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut frames = Vec::new();
    for (number, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            frames.push(Vec::new());
            continue;
        }
        let objects: Vec<DetectedObject> = serde_json::from_str(&line)
            .with_context(|| format!("Bad detections on line {}", number + 1))?;
        frames.push(objects);
    }
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unreadable_frame_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame_000.png");
        std::fs::write(&path, b"not a png").unwrap();
        assert!(read_frame(&path, 0).is_err());
    }

    #[test]
    fn test_frame_files_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["frame_002.png", "frame_001.PNG", "notes.txt", "frame_000.jpg"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        let names: Vec<String> = frame_paths(dir.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["frame_000.jpg", "frame_001.PNG", "frame_002.png"]);
    }

    #[test]
    fn test_readable_frame_keeps_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.png");
        image::RgbImage::from_pixel(4, 3, image::Rgb([10, 20, 30])).save(&path).unwrap();

        let frame = read_frame(&path, 7).unwrap();
        assert_eq!((frame.width, frame.height, frame.sequence), (4, 3, 7));
        assert!(frame.validate().is_ok());
    }
}
