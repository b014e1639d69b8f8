use image::GrayImage;
use tracing::{info, instrument, warn};

use crate::bitmap::{convert_to_gray, threshold_to_binary, BinaryImage, Bitmap};
use crate::error::Result;
use crate::skew::{estimate_skew, SkewEstimate, SkewSearchParams};
use crate::transform::{block_convolve, rotate_gray_bringing_in_white};

/// Radius of the block convolution applied before rotating
pub const SMOOTHING_RADIUS: u32 = 1;

/// Thresholds used by the multi-threshold sample
pub const DEFAULT_THRESHOLDS: [u8; 4] = [130, 150, 170, 200];

/// Deskew policy and estimator tuning
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeskewConfig {
    pub search: SkewSearchParams,
    /// Skews smaller than this (degrees) are left alone
    pub min_angle: f64,
    /// Estimates with less confidence than this are not acted on
    pub min_confidence: f64,
    /// Hold on to the gray and smoothed stages for inspection
    pub keep_intermediates: bool,
}

impl Default for DeskewConfig {
    fn default() -> Self {
        Self {
            search: SkewSearchParams::default(),
            min_angle: 0.1,
            min_confidence: 3.0,
            keep_intermediates: false,
        }
    }
}

/// Why an image was left as is
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NotDeskewedReason {
    /// Estimated skew (degrees) is negligible
    LowAngle(f64),
    /// Estimate is not reliable enough
    LowConfidence(f64),
}

impl std::fmt::Display for NotDeskewedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotDeskewedReason::LowAngle(angle) => {
                write!(f, "Skew angle only {:.3}, image not deskewed", angle)
            }
            NotDeskewedReason::LowConfidence(conf) => {
                write!(f, "Skew angle confidence only {:.1}, image not deskewed", conf)
            }
        }
    }
}

/// Outcome of a single-threshold deskew
#[derive(Debug, Clone)]
pub enum DeskewOutcome {
    Deskewed {
        image: BinaryImage,
        estimate: SkewEstimate,
        intermediates: Option<Intermediates>,
    },
    NotDeskewed(NotDeskewedReason),
}

/// Gray stages of the pipeline before binarization, kept when `keep_intermediates` is set
#[derive(Debug, Clone)]
pub struct Intermediates {
    /// The binary input as 8-bit gray
    pub gray: GrayImage,
    /// `gray` after block smoothing
    pub smoothed: GrayImage,
    /// `smoothed` after rotation, before any threshold
    pub rotated: GrayImage,
}

/// The rotated, still-gray intermediate shared by every threshold of a sweep
#[derive(Debug, Clone)]
pub struct RotatedGray {
    pub gray: GrayImage,
    pub estimate: SkewEstimate,
    pub intermediates: Option<Intermediates>,
}

impl RotatedGray {
    /// Re-binarize the rotated intermediate
    pub fn binarize(&self, threshold: u8) -> BinaryImage {
        threshold_to_binary(&self.gray, threshold)
    }
}

/// Outcome of the shared estimate-and-rotate stage
#[derive(Debug, Clone)]
pub enum RotateOutcome {
    Rotated(RotatedGray),
    NotDeskewed(NotDeskewedReason),
}

/// Decide whether an estimate is worth acting on
pub fn check_estimate(estimate: &SkewEstimate, config: &DeskewConfig) -> Option<NotDeskewedReason> {
    if estimate.angle_degrees.abs() < config.min_angle {
        return Some(NotDeskewedReason::LowAngle(estimate.angle_degrees));
    }
    if estimate.confidence < config.min_confidence {
        return Some(NotDeskewedReason::LowConfidence(estimate.confidence));
    }
    None
}

/// Estimate the skew and, if it is actionable, produce the rotated gray
/// intermediate: grayscale, block-smoothed, area-map rotated with white
/// brought in at the corners.
#[instrument(skip(img, config), fields(width = img.width(), height = img.height()))]
pub fn rotate_to_gray(
    img: &BinaryImage,
    config: &DeskewConfig,
) -> Result<RotateOutcome> {
    let estimate = estimate_skew(img, &config.search)?;

    if let Some(reason) = check_estimate(&estimate, config) {
        warn!("{}", reason);
        return Ok(RotateOutcome::NotDeskewed(reason));
    }
    info!(
        angle = estimate.angle_degrees,
        confidence = estimate.confidence,
        "Skew angle (confidence)"
    );

    let gray = convert_to_gray(img)?;
    let smoothed = block_convolve(&gray, SMOOTHING_RADIUS);
    let rotated = rotate_gray_bringing_in_white(&smoothed, estimate.angle_degrees.to_radians())?;

    let intermediates = config
        .keep_intermediates
        .then(|| Intermediates {
            gray,
            smoothed,
            rotated: rotated.clone(),
        });

    Ok(RotateOutcome::Rotated(RotatedGray {
        gray: rotated,
        estimate,
        intermediates,
    }))
}

/// Deskew a binary image and re-binarize it at `threshold`
pub fn deskew(img: &BinaryImage, threshold: u8, config: &DeskewConfig) -> Result<DeskewOutcome> {
    Ok(match rotate_to_gray(img, config)? {
        RotateOutcome::Rotated(rotated) => DeskewOutcome::Deskewed {
            image: rotated.binarize(threshold),
            estimate: rotated.estimate,
            intermediates: rotated.intermediates,
        },
        RotateOutcome::NotDeskewed(reason) => DeskewOutcome::NotDeskewed(reason),
    })
}

/// Deskew a loaded bitmap, which must be 1 bpp
pub fn deskew_bitmap(bitmap: &Bitmap, threshold: u8, config: &DeskewConfig) -> Result<DeskewOutcome> {
    deskew(bitmap.as_binary()?, threshold, config)
}

/// Results of deskewing once and binarizing at several thresholds
#[derive(Debug, Clone)]
pub enum SweepOutcome {
    /// One image per threshold, in the order the thresholds were given
    Deskewed {
        images: Vec<(u8, BinaryImage)>,
        estimate: SkewEstimate,
        intermediates: Option<Intermediates>,
    },
    NotDeskewed(NotDeskewedReason),
}

/// Deskew once and binarize the shared rotated intermediate at each threshold
pub fn deskew_sweep(img: &BinaryImage, thresholds: &[u8], config: &DeskewConfig) -> Result<SweepOutcome> {
    Ok(match rotate_to_gray(img, config)? {
        RotateOutcome::Rotated(rotated) => SweepOutcome::Deskewed {
            images: thresholds
                .iter()
                .map(|&t| (t, rotated.binarize(t)))
                .collect(),
            estimate: rotated.estimate,
            intermediates: rotated.intermediates,
        },
        RotateOutcome::NotDeskewed(reason) => SweepOutcome::NotDeskewed(reason),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::skew::tests::skewed_text;

    #[test]
    fn test_straight_image_not_deskewed() {
        let img = skewed_text(800, 600, 0.0);
        let outcome = deskew(&img, 130, &DeskewConfig::default()).unwrap();
        assert!(matches!(outcome, DeskewOutcome::NotDeskewed(_)));
    }

    #[test]
    fn test_deskew_keeps_size_and_straightens() {
        let img = skewed_text(800, 600, 2.0);
        let config = DeskewConfig::default();

        let outcome = deskew(&img, 150, &config).unwrap();
        let (corrected, estimate) = match outcome {
            DeskewOutcome::Deskewed { image, estimate, .. } => (image, estimate),
            DeskewOutcome::NotDeskewed(reason) => panic!("not deskewed: {}", reason),
        };
        assert_eq!(corrected.dimensions(), img.dimensions());
        assert!(estimate.angle_degrees < 0.0);
        assert!(corrected.count_foreground() > 0);

        // Running again on the corrected output finds nothing more to do
        let again = deskew(&corrected, 150, &config).unwrap();
        assert!(matches!(again, DeskewOutcome::NotDeskewed(_)));
    }

    #[test]
    fn test_sweep_keeps_threshold_order_and_thickens() {
        let img = skewed_text(800, 600, -2.0);
        let thresholds = [200, 130, 170];

        let outcome = deskew_sweep(&img, &thresholds, &DeskewConfig::default()).unwrap();
        let images = match outcome {
            SweepOutcome::Deskewed { images, .. } => images,
            SweepOutcome::NotDeskewed(reason) => panic!("not deskewed: {}", reason),
        };

        let order: Vec<u8> = images.iter().map(|(t, _)| *t).collect();
        assert_eq!(order, vec![200, 130, 170]);

        let count = |t: u8| {
            images
                .iter()
                .find(|(th, _)| *th == t)
                .map(|(_, img)| img.count_foreground())
                .unwrap()
        };
        assert!(count(130) <= count(170));
        assert!(count(170) <= count(200));
    }

    #[test]
    fn test_small_skew_is_deskewed() {
        let img = skewed_text(800, 600, 0.3);
        match deskew(&img, 150, &DeskewConfig::default()).unwrap() {
            DeskewOutcome::Deskewed { estimate, .. } => {
                assert!((estimate.angle_degrees + 0.3).abs() <= 0.05, "angle {}", estimate.angle_degrees)
            }
            DeskewOutcome::NotDeskewed(reason) => panic!("not deskewed: {}", reason),
        }
    }

    #[test]
    fn test_skew_at_range_edge_not_deskewed() {
        let img = skewed_text(800, 600, 4.6);
        let outcome = deskew(&img, 150, &DeskewConfig::default()).unwrap();
        assert!(matches!(
            outcome,
            DeskewOutcome::NotDeskewed(NotDeskewedReason::LowConfidence(c)) if c == 0.0
        ));
    }

    #[test]
    fn test_sweep_keeps_intermediates_on_request() {
        let img = skewed_text(400, 300, 2.0);
        let config = DeskewConfig {
            keep_intermediates: true,
            ..Default::default()
        };

        match deskew_sweep(&img, &[150], &config).unwrap() {
            SweepOutcome::Deskewed {
                images,
                intermediates,
                ..
            } => {
                let stages = intermediates.expect("intermediates kept");
                assert_eq!(stages.gray.dimensions(), (400, 300));
                assert_eq!(stages.smoothed.dimensions(), (400, 300));
                assert_eq!(stages.rotated.dimensions(), (400, 300));
                assert_eq!(images[0].1, threshold_to_binary(&stages.rotated, 150));
                // Smoothing leaves gray levels between ink and paper
                assert!(stages.gray.pixels().all(|p| p[0] == 0 || p[0] == 255));
                assert!(stages.smoothed.pixels().any(|p| p[0] > 0 && p[0] < 255));
            }
            SweepOutcome::NotDeskewed(reason) => panic!("not deskewed: {}", reason),
        }

        match deskew_sweep(&img, &[150], &DeskewConfig::default()).unwrap() {
            SweepOutcome::Deskewed { intermediates, .. } => assert!(intermediates.is_none()),
            SweepOutcome::NotDeskewed(reason) => panic!("not deskewed: {}", reason),
        }
    }

    #[test]
    fn test_low_confidence_policy() {
        let estimate = SkewEstimate {
            angle_degrees: 2.0,
            confidence: 1.5,
            max_score: 1.0,
            min_score: 1.0,
        };
        assert_eq!(
            check_estimate(&estimate, &DeskewConfig::default()),
            Some(NotDeskewedReason::LowConfidence(1.5))
        );
    }

    #[test]
    fn test_deskew_bitmap_rejects_color() {
        let bitmap = Bitmap::Color(image::RgbaImage::new(10, 10));
        assert!(matches!(
            deskew_bitmap(&bitmap, 130, &DeskewConfig::default()),
            Err(Error::UnsupportedDepth { found: 32, .. })
        ));
    }
}
