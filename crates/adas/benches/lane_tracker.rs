//! Lane tracker benchmarks
//!
//! ```bash
//! cargo bench --package adas --bench lane_tracker
//! ```

use adas::{extract_mask, to_birdseye, LaneTracker, LaneTrackerConfig};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use image::{GrayImage, Luma};
use std::time::Duration;
use video_frame::VideoFrame;

/// Bird's-eye mask with two gently curving stripes
fn lane_mask(width: u32, height: u32) -> GrayImage {
    let left = width as f64 * 0.27;
    let right = width as f64 * 0.73;
    GrayImage::from_fn(width, height, |x, y| {
        let bend = 1.5e-4 * (y as f64 - height as f64).powi(2);
        let x = x as f64;
        let on = (x - left - bend).abs() <= 8.0 || (x - right - bend).abs() <= 8.0;
        Luma([if on { 255 } else { 0 }])
    })
}

fn road_frame(width: u32, height: u32) -> VideoFrame {
    let mask = lane_mask(width, height);
    let mut data = Vec::with_capacity((width * height * 3) as usize);
    for (_, y, p) in mask.enumerate_pixels() {
        let road = (120 - y * 100 / height) as u8;
        let v = if p[0] > 0 { 240 } else { road };
        data.extend_from_slice(&[v, v, v]);
    }
    VideoFrame::new(data, width, height, 0, 0)
}

fn bench_locate(c: &mut Criterion) {
    let mut group = c.benchmark_group("lane_locate");
    group.measurement_time(Duration::from_secs(5));

    for (width, height) in [(1280, 720), (640, 360)] {
        let mask = lane_mask(width, height);
        let mut tracker = LaneTracker::new(LaneTrackerConfig::default());

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}x{}", width, height)),
            &mask,
            |b, mask| b.iter(|| tracker.locate(black_box(mask)).lane_detected),
        );
    }
    group.finish();
}

fn bench_feature_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("feature_pipeline");
    group.sample_size(20);
    group.measurement_time(Duration::from_secs(10));

    let frame = road_frame(1280, 720);
    group.bench_function("extract_and_warp_1280x720", |b| {
        b.iter(|| {
            let mask = extract_mask(black_box(&frame)).ok()?;
            to_birdseye(&mask).ok()
        })
    });
    group.finish();
}

criterion_group!(benches, bench_locate, bench_feature_pipeline);
criterion_main!(benches);
