//! Bird's-eye perspective rectification

use calibration::homography::find_homography;
use image::{GrayImage, Luma};
use imageproc::geometric_transformations::{warp, Interpolation, Projection};
use nalgebra::{Matrix3, Point2};

use crate::features::MASK_ON;
use crate::AdasError;

/// Bilinear samples at or above this stay foreground
const REBINARIZE_THRESHOLD: u8 = 128;

/// Rectified mask and the transforms between camera and bird's-eye space
#[derive(Debug, Clone)]
pub struct BirdseyeView {
    pub mask: GrayImage,
    /// Camera image to bird's-eye
    pub forward: Matrix3<f64>,
    /// Bird's-eye to camera image
    pub inverse: Matrix3<f64>,
}

/// Source trapezoid and destination rectangle for a frame size
///
/// Points are ordered bottom-right, bottom-left, top-left, top-right.
pub fn birdseye_points(width: u32, height: u32) -> ([Point2<f64>; 4], [Point2<f64>; 4]) {
    let w = width as f64;
    let h = height as f64;
    let src = [
        Point2::new(w, h),
        Point2::new(0.0, h),
        Point2::new(w / 3.0, h * 2.0 / 3.0),
        Point2::new(w / 2.0, h * 2.0 / 3.0),
    ];
    let dst = [
        Point2::new(w, h),
        Point2::new(0.0, h),
        Point2::new(0.0, 0.0),
        Point2::new(w, 0.0),
    ];
    (src, dst)
}

/// Forward and inverse perspective transforms for a frame size
pub fn birdseye_transforms(width: u32, height: u32) -> Result<(Matrix3<f64>, Matrix3<f64>), AdasError> {
    let (src, dst) = birdseye_points(width, height);
    let forward = find_homography(&src, &dst)
        .ok_or_else(|| AdasError::Perspective(format!("no forward transform for {}x{}", width, height)))?;
    let inverse = find_homography(&dst, &src)
        .ok_or_else(|| AdasError::Perspective(format!("no inverse transform for {}x{}", width, height)))?;
    Ok((forward, inverse))
}

/// Warp a binary mask into bird's-eye view
pub fn to_birdseye(mask: &GrayImage) -> Result<BirdseyeView, AdasError> {
    let (width, height) = mask.dimensions();
    let (forward, inverse) = birdseye_transforms(width, height)?;
    let warped = warp_mask(mask, &forward)?;
    Ok(BirdseyeView {
        mask: warped,
        forward,
        inverse,
    })
}

/// Bilinear warp followed by re-binarization
pub fn warp_mask(mask: &GrayImage, transform: &Matrix3<f64>) -> Result<GrayImage, AdasError> {
    let projection = projection(transform)?;
    let mut warped = warp(mask, &projection, Interpolation::Bilinear, Luma([0u8]));
    for p in warped.pixels_mut() {
        p[0] = if p[0] >= REBINARIZE_THRESHOLD { MASK_ON } else { 0 };
    }
    Ok(warped)
}

fn projection(transform: &Matrix3<f64>) -> Result<Projection, AdasError> {
    let mut m = [0.0f32; 9];
    for r in 0..3 {
        for c in 0..3 {
            m[r * 3 + c] = transform[(r, c)] as f32;
        }
    }
    Projection::from_matrix(m).ok_or_else(|| AdasError::Perspective("non-invertible projection".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use calibration::homography::apply_homography;

    #[test]
    fn test_trapezoid_maps_to_frame_corners() {
        let (forward, _) = birdseye_transforms(1280, 720).unwrap();
        let (src, dst) = birdseye_points(1280, 720);
        for (s, d) in src.iter().zip(dst.iter()) {
            let mapped = apply_homography(&forward, s).unwrap();
            assert!((mapped - d).norm() < 1e-6);
        }
    }

    #[test]
    fn test_inverse_undoes_forward() {
        let (forward, inverse) = birdseye_transforms(640, 360).unwrap();
        let p = Point2::new(300.0, 320.0);
        let there = apply_homography(&forward, &p).unwrap();
        let back = apply_homography(&inverse, &there).unwrap();
        assert!((back - p).norm() < 1e-6);
    }

    #[test]
    fn test_warped_mask_is_binary() {
        let mut mask = GrayImage::new(320, 180);
        for y in 120..180 {
            for x in 100..110 {
                mask.put_pixel(x, y, Luma([MASK_ON]));
            }
        }
        let view = to_birdseye(&mask).unwrap();
        assert_eq!(view.mask.dimensions(), (320, 180));
        assert!(view.mask.pixels().all(|p| p[0] == 0 || p[0] == MASK_ON));
        assert!(view.mask.pixels().any(|p| p[0] == MASK_ON));
    }

    #[test]
    fn test_sky_is_dropped() {
        let mut mask = GrayImage::new(320, 180);
        for x in 0..320 {
            mask.put_pixel(x, 10, Luma([MASK_ON]));
        }
        let view = to_birdseye(&mask).unwrap();
        assert!(view.mask.pixels().all(|p| p[0] == 0));
    }
}
