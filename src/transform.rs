use image::{GrayImage, Luma};
use imageproc::filter::box_filter;
use tracing::debug;

use crate::bitmap::{BinaryImage, BACKGROUND};
use crate::error::{Error, Result};
use crate::geometry::{rotation_about_center, transform_point};

/// Subpixel divisions per pixel used by the area-map rotation
const AREA_MAP_SUBPIXELS: f64 = 16.0;

/// Smooth with a `(2 * radius + 1)` square block mean.
///
/// Softens the stair-steps of binary edges so the rotation has gray levels to
/// average instead of hard transitions.
pub fn block_convolve(gray: &GrayImage, radius: u32) -> GrayImage {
    if radius == 0 {
        return gray.clone();
    }
    box_filter(gray, radius, radius)
}

fn check_rotatable(width: u32, height: u32, angle: f64) -> Result<()> {
    if !angle.is_finite() {
        return Err(Error::RotationFailed(format!("angle {} is not finite", angle)));
    }
    if width < 2 || height < 2 {
        return Err(Error::RotationFailed(format!(
            "image too small to rotate ({}x{})",
            width, height
        )));
    }
    Ok(())
}

/// Rotate a gray image about its center by `angle` radians using area mapping.
///
/// Each destination pixel is mapped back into the source on a 1/16 pixel grid
/// and takes the area-weighted average of the four source pixels it overlaps.
/// The canvas keeps the input size; corners rotated out are clipped and the
/// uncovered area is filled with `fill`.
pub fn rotate_area_map(gray: &GrayImage, angle: f64, fill: u8) -> Result<GrayImage> {
    let (width, height) = gray.dimensions();
    check_rotatable(width, height, angle)?;

    let center = (width as f64 / 2.0, height as f64 / 2.0);
    let forward = rotation_about_center(angle, center);
    let inverse = forward
        .try_inverse()
        .ok_or_else(|| Error::RotationFailed("rotation matrix is singular".to_string()))?;

    let max_x = width as i64 - 2;
    let max_y = height as i64 - 2;
    let mut output = GrayImage::from_pixel(width, height, Luma([fill]));

    for out_y in 0..height {
        for out_x in 0..width {
            let (src_x, src_y) = transform_point(&inverse, out_x as f64, out_y as f64);

            let x16 = (src_x * AREA_MAP_SUBPIXELS).floor() as i64;
            let y16 = (src_y * AREA_MAP_SUBPIXELS).floor() as i64;
            let xp = x16 >> 4;
            let yp = y16 >> 4;
            if xp < 0 || yp < 0 || xp > max_x || yp > max_y {
                continue;
            }

            let xf = (x16 & 0x0f) as u32;
            let yf = (y16 & 0x0f) as u32;
            let (xp, yp) = (xp as u32, yp as u32);

            let v00 = gray.get_pixel(xp, yp)[0] as u32;
            let v10 = gray.get_pixel(xp + 1, yp)[0] as u32;
            let v01 = gray.get_pixel(xp, yp + 1)[0] as u32;
            let v11 = gray.get_pixel(xp + 1, yp + 1)[0] as u32;

            let value = ((16 - xf) * (16 - yf) * v00
                + xf * (16 - yf) * v10
                + (16 - xf) * yf * v01
                + xf * yf * v11
                + 128)
                / 256;

            output.put_pixel(out_x, out_y, Luma([value.min(255) as u8]));
        }
    }

    debug!(width, height, angle, "Rotated gray image by area map");
    Ok(output)
}

/// Rotate a binary image directly by nearest-pixel sampling.
///
/// This is the naive route the grayscale pipeline replaces; at some angles it
/// shows one-pixel horizontal jumps in the middle of strokes. Kept as the
/// comparison baseline for threshold sweeps.
pub fn rotate_binary_sampled(img: &BinaryImage, angle: f64) -> Result<BinaryImage> {
    let (width, height) = img.dimensions();
    check_rotatable(width, height, angle)?;

    let center = (width as f64 / 2.0, height as f64 / 2.0);
    let inverse = rotation_about_center(angle, center)
        .try_inverse()
        .ok_or_else(|| Error::RotationFailed("rotation matrix is singular".to_string()))?;

    let rotated = BinaryImage::from_fn(width, height, |out_x, out_y| {
        let (src_x, src_y) = transform_point(&inverse, out_x as f64, out_y as f64);
        let sx = src_x.round();
        let sy = src_y.round();
        if sx < 0.0 || sy < 0.0 || sx >= width as f64 || sy >= height as f64 {
            return false;
        }
        img.is_foreground(sx as u32, sy as u32)
    });

    debug!(width, height, angle, "Rotated binary image by sampling");
    Ok(rotated)
}

/// Area-map rotation with white brought in at the uncovered corners
pub fn rotate_gray_bringing_in_white(gray: &GrayImage, angle: f64) -> Result<GrayImage> {
    rotate_area_map(gray, angle, BACKGROUND)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_rotation() {
        let gray = GrayImage::from_fn(10, 10, |x, y| Luma([((x * 20 + y) % 256) as u8]));
        let rotated = rotate_area_map(&gray, 0.0, 255).unwrap();

        assert_eq!(rotated.dimensions(), (10, 10));
        // Interior is copied exactly; the last row and column fall outside the
        // 2x2 sampling window and take the fill value
        for y in 0..9 {
            for x in 0..9 {
                assert_eq!(rotated.get_pixel(x, y), gray.get_pixel(x, y));
            }
        }
        assert_eq!(rotated.get_pixel(9, 9)[0], 255);
    }

    #[test]
    fn test_rotation_brings_in_white() {
        let gray = GrayImage::from_pixel(40, 40, Luma([0]));
        let rotated = rotate_gray_bringing_in_white(&gray, 30f64.to_radians()).unwrap();

        assert_eq!(rotated.dimensions(), (40, 40));
        assert_eq!(rotated.get_pixel(0, 0)[0], 255);
        assert_eq!(rotated.get_pixel(20, 20)[0], 0);
    }

    #[test]
    fn test_rotation_produces_intermediate_grays() {
        let gray = GrayImage::from_fn(60, 60, |_, y| Luma([if y < 30 { 0 } else { 255 }]));
        let rotated = rotate_area_map(&gray, 3f64.to_radians(), 255).unwrap();
        let mid_tones = rotated
            .pixels()
            .filter(|p| p[0] > 0 && p[0] < 255)
            .count();
        assert!(mid_tones > 0);
    }

    #[test]
    fn test_rotation_rejects_bad_input() {
        let gray = GrayImage::new(1, 10);
        assert!(matches!(
            rotate_area_map(&gray, 0.1, 255),
            Err(Error::RotationFailed(_))
        ));
        let gray = GrayImage::new(10, 10);
        assert!(matches!(
            rotate_area_map(&gray, f64::NAN, 255),
            Err(Error::RotationFailed(_))
        ));
    }

    #[test]
    fn test_block_convolve_flat_image_unchanged() {
        let gray = GrayImage::from_pixel(8, 8, Luma([200]));
        let smoothed = block_convolve(&gray, 1);
        assert!(smoothed.pixels().all(|p| p[0] == 200));
    }

    #[test]
    fn test_block_convolve_softens_edge() {
        let gray = GrayImage::from_fn(9, 9, |x, _| Luma([if x < 4 { 0 } else { 255 }]));
        let smoothed = block_convolve(&gray, 1);
        let edge = smoothed.get_pixel(4, 4)[0];
        assert!(edge > 0 && edge < 255);
        assert_eq!(smoothed.get_pixel(0, 4)[0], 0);
        assert_eq!(smoothed.get_pixel(8, 4)[0], 255);
    }

    #[test]
    fn test_sampled_rotation_keeps_size() {
        let img = BinaryImage::from_fn(30, 20, |x, y| x > 10 && x < 20 && y > 5 && y < 15);
        let rotated = rotate_binary_sampled(&img, 0.0).unwrap();
        assert_eq!(rotated, img);
    }
}
