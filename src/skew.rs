//! Skew angle estimation for binary images.
//!
//! The score for a candidate angle is the differential square sum of the
//! row projection after a vertical shear by that angle: text lines that are
//! aligned with the rows produce sharp jumps between neighboring rows, which
//! the sum of squared differences rewards. A coarse sweep finds the peak and an
//! angle-splitting search refines it.

use tracing::{debug, instrument, warn};

use crate::bitmap::{BinaryImage, Bitmap, FOREGROUND};
use crate::error::{Error, Result};

/// Scores below `MIN_SCORE_FACTOR * w * w * h` are too weak to divide by
const MIN_SCORE_FACTOR: f64 = 0.000002;

/// A peak score below this is not trusted
const MIN_VALID_MAX_SCORE: f64 = 10000.0;

/// Upper bound on swept angles and on search halvings
const MAX_SWEEP_ANGLES: f64 = 10000.0;
const MAX_SEARCH_STEPS: f64 = 40.0;

/// Tuning for the sweep-then-search angle finder
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkewSearchParams {
    /// Half-width of the swept range, degrees
    pub sweep_range: f64,
    /// Spacing of swept angles, degrees
    pub sweep_delta: f64,
    /// Downscale factor for the sweep: 1, 2, 4 or 8
    pub sweep_reduction: u32,
    /// Downscale factor for the search: 1, 2, 4 or 8
    pub search_reduction: u32,
    /// Search stops once the angle step drops below this, degrees
    pub search_min_delta: f64,
}

impl Default for SkewSearchParams {
    fn default() -> Self {
        Self {
            sweep_range: 5.0,
            sweep_delta: 1.0,
            sweep_reduction: 2,
            search_reduction: 2,
            search_min_delta: 0.01,
        }
    }
}

impl SkewSearchParams {
    fn validate(&self) -> Result<()> {
        for (name, factor) in [
            ("sweep_reduction", self.sweep_reduction),
            ("search_reduction", self.search_reduction),
        ] {
            if !matches!(factor, 1 | 2 | 4 | 8) {
                return Err(Error::InvalidParameter(format!(
                    "{} must be 1, 2, 4 or 8 (got {})",
                    name, factor
                )));
            }
        }
        if !(self.sweep_range > 0.0 && self.sweep_delta > 0.0 && self.search_min_delta > 0.0) {
            return Err(Error::InvalidParameter(format!(
                "sweep range, sweep delta and search delta must be positive (got {}, {}, {})",
                self.sweep_range, self.sweep_delta, self.search_min_delta
            )));
        }
        let sweep_angles = 2.0 * self.sweep_range / self.sweep_delta;
        if !sweep_angles.is_finite() || sweep_angles > MAX_SWEEP_ANGLES {
            return Err(Error::InvalidParameter(format!(
                "sweep of {} degrees in steps of {} needs too many angles",
                2.0 * self.sweep_range,
                self.sweep_delta
            )));
        }
        let search_steps = (self.sweep_delta / self.search_min_delta).log2();
        if !search_steps.is_finite() || search_steps > MAX_SEARCH_STEPS {
            return Err(Error::InvalidParameter(format!(
                "search delta {} is too small for sweep delta {}",
                self.search_min_delta, self.sweep_delta
            )));
        }
        Ok(())
    }
}

/// Result of a skew search
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkewEstimate {
    /// Rotation that straightens the image, degrees.
    /// Positive turns clockwise in y-down image coordinates.
    pub angle_degrees: f64,
    /// Ratio of the peak score to the weakest swept score, or 0 when untrusted
    pub confidence: f64,
    /// Differential square sum at the refined angle
    pub max_score: f64,
    /// Lowest differential square sum seen during the sweep
    pub min_score: f64,
}

/// Foreground pixel coordinates of a (reduced) image, cached across angles
struct Projection {
    width: u32,
    height: u32,
    points: Vec<(u32, u32)>,
}

impl Projection {
    fn new(img: &BinaryImage) -> Self {
        let (width, height) = img.dimensions();
        let points = img
            .as_gray()
            .enumerate_pixels()
            .filter(|(_, _, p)| p[0] == FOREGROUND)
            .map(|(x, y, _)| (x, y))
            .collect();
        Self {
            width,
            height,
            points,
        }
    }

    /// Row projection after a vertical shear about the center column.
    ///
    /// Column `x` moves up by `(x - cx) * tan(angle)` rounded to whole rows, so
    /// every angle is scored on an unblurred projection. Pixels sheared off the
    /// canvas are dropped.
    fn sheared_rows(&self, angle_degrees: f64) -> Vec<u64> {
        let tan = angle_degrees.to_radians().tan();
        let cx = self.width as f64 / 2.0;
        let shifts: Vec<i64> = (0..self.width)
            .map(|x| ((x as f64 - cx) * tan).round() as i64)
            .collect();

        let height = self.height as i64;
        let mut rows = vec![0u64; self.height as usize];
        for &(x, y) in &self.points {
            let row = y as i64 - shifts[x as usize];
            if (0..height).contains(&row) {
                rows[row as usize] += 1;
            }
        }

        rows
    }

    fn score(&self, angle_degrees: f64) -> f64 {
        differential_square_sum(&self.sheared_rows(angle_degrees), self.width)
    }
}

/// Sum of squared differences between adjacent row counts.
///
/// A band at the top and bottom is skipped so that content sheared in from
/// the edges does not dominate.
pub fn differential_square_sum(rows: &[u64], width: u32) -> f64 {
    let n = rows.len();
    let skip_w = (0.05 * width as f64) as usize;
    let skip = ((n / 10).min(skip_w) / 2).max(1);
    if n <= 2 * skip {
        return 0.0;
    }

    (skip..n - skip)
        .map(|i| {
            let diff = rows[i] as f64 - rows[i - 1] as f64;
            diff * diff
        })
        .sum()
}

/// Downscale by 2 in each direction; a reduced pixel is set if any of its
/// four source pixels is set
fn reduce_by_two(img: &BinaryImage) -> BinaryImage {
    let (width, height) = img.dimensions();
    let (new_width, new_height) = (width / 2, height / 2);
    BinaryImage::from_fn(new_width, new_height, |x, y| {
        let (sx, sy) = (2 * x, 2 * y);
        img.is_foreground(sx, sy)
            || img.is_foreground(sx + 1, sy)
            || img.is_foreground(sx, sy + 1)
            || img.is_foreground(sx + 1, sy + 1)
    })
}

/// Reduce by a factor of 1, 2, 4 or 8 with a 2x OR cascade
pub fn reduce_binary(img: &BinaryImage, factor: u32) -> BinaryImage {
    let mut reduced = img.clone();
    let mut remaining = factor;
    while remaining > 1 {
        reduced = reduce_by_two(&reduced);
        remaining /= 2;
    }
    reduced
}

fn projection_at(img: &BinaryImage, factor: u32) -> Result<Projection> {
    let reduced = reduce_binary(img, factor);
    let projection = Projection::new(&reduced);
    if projection.height < 3 || projection.width < 1 {
        return Err(Error::NoValidSkew(format!(
            "image too small after {}x reduction ({}x{})",
            factor, projection.width, projection.height
        )));
    }
    if projection.points.is_empty() {
        return Err(Error::NoValidSkew("image has no foreground pixels".to_string()));
    }
    Ok(projection)
}

/// Vertex of the parabola through the peak sample and its two neighbors
fn interpolate_peak(angles: &[f64], scores: &[f64], best: usize) -> f64 {
    if best == 0 || best + 1 >= scores.len() {
        return angles[best];
    }
    let (left, mid, right) = (scores[best - 1], scores[best], scores[best + 1]);
    let denom = left - 2.0 * mid + right;
    if denom >= 0.0 {
        return angles[best];
    }
    let step = angles[best + 1] - angles[best];
    let offset = 0.5 * (left - right) / denom;
    angles[best] + offset.clamp(-0.5, 0.5) * step
}

/// Estimate the skew of a binary image by sweep and search
#[instrument(skip(img), fields(width = img.width(), height = img.height()))]
pub fn estimate_skew(img: &BinaryImage, params: &SkewSearchParams) -> Result<SkewEstimate> {
    params.validate()?;

    // Sweep
    let sweep = projection_at(img, params.sweep_reduction)?;
    let steps = (2.0 * params.sweep_range / params.sweep_delta).round() as usize;
    let angles: Vec<f64> = (0..=steps)
        .map(|i| -params.sweep_range + i as f64 * params.sweep_delta)
        .collect();
    let scores: Vec<f64> = angles.iter().map(|&a| sweep.score(a)).collect();

    let (best, sweep_max) = scores
        .iter()
        .copied()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |acc, (i, s)| if s > acc.1 { (i, s) } else { acc });
    let min_score = scores.iter().copied().fold(f64::INFINITY, f64::min);

    if sweep_max <= 0.0 {
        return Err(Error::NoValidSkew(
            "differential score is zero at every swept angle".to_string(),
        ));
    }

    let sweep_angle = interpolate_peak(&angles, &scores, best);
    debug!(
        sweep_angle,
        sweep_max,
        min_score,
        "Sweep finished over {} angles",
        angles.len()
    );

    // Search
    let search = if params.search_reduction == params.sweep_reduction {
        sweep
    } else {
        projection_at(img, params.search_reduction)?
    };

    let mut center = sweep_angle;
    let mut center_score = search.score(center);
    let mut delta = params.sweep_delta / 2.0;
    while delta >= params.search_min_delta {
        let left = search.score(center - delta);
        let right = search.score(center + delta);
        if left > center_score && left >= right {
            center -= delta;
            center_score = left;
        } else if right > center_score {
            center += delta;
            center_score = right;
        }
        delta /= 2.0;
    }

    if !center.is_finite() || center_score <= 0.0 {
        return Err(Error::NoValidSkew(format!(
            "search did not converge (angle {}, score {})",
            center, center_score
        )));
    }

    // Confidence
    let min_thresh = MIN_SCORE_FACTOR
        * search.width as f64
        * search.width as f64
        * search.height as f64;
    let mut confidence = if min_score > min_thresh {
        center_score / min_score
    } else {
        0.0
    };
    if center > params.sweep_range - params.sweep_delta
        || center < -params.sweep_range + params.sweep_delta
    {
        warn!(angle = center, "Skew peak is at the edge of the swept range");
        confidence = 0.0;
    }
    if center_score < MIN_VALID_MAX_SCORE {
        confidence = 0.0;
    }

    let estimate = SkewEstimate {
        angle_degrees: -center,
        confidence,
        max_score: center_score,
        min_score,
    };
    debug!(
        angle = estimate.angle_degrees,
        confidence = estimate.confidence,
        "Skew estimated"
    );
    Ok(estimate)
}

/// Estimate skew of a loaded bitmap, which must be 1 bpp
pub fn estimate_bitmap_skew(bitmap: &Bitmap, params: &SkewSearchParams) -> Result<SkewEstimate> {
    estimate_skew(bitmap.as_binary()?, params)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::GrayImage;

    /// Text-like rows of "words" whose baselines slope down to the right by
    /// `angle_degrees`.
    pub(crate) fn skewed_text(width: u32, height: u32, angle_degrees: f64) -> BinaryImage {
        let tan = angle_degrees.to_radians().tan();
        let cx = width as f64 / 2.0;
        let margin = 40;
        BinaryImage::from_fn(width, height, |x, y| {
            if x < margin || x >= width - margin || y < margin || y >= height - margin {
                return false;
            }
            let line_pos = (y as f64 - (x as f64 - cx) * tan).rem_euclid(24.0);
            let in_word = (x / 16) % 6 != 5;
            line_pos < 8.0 && in_word
        })
    }

    fn assert_recovers(width: u32, height: u32, applied: f64) {
        let img = skewed_text(width, height, applied);
        let estimate = estimate_skew(&img, &SkewSearchParams::default()).unwrap();

        // Straightening undoes the applied tilt
        assert!(
            (estimate.angle_degrees + applied).abs() <= 0.05,
            "applied {}, estimated {}",
            applied,
            estimate.angle_degrees
        );
        assert!(
            estimate.confidence >= 3.0,
            "applied {}, confidence {}",
            applied,
            estimate.confidence
        );
    }

    #[test]
    fn test_recovers_applied_skew() {
        for applied in [0.3, -0.5, 1.0, -1.5, 2.0, -3.0] {
            assert_recovers(800, 600, applied);
        }
    }

    #[test]
    fn test_recovers_small_skew_on_wide_page() {
        // At half resolution an 800 pixel page cannot show a shear below about
        // 0.14 degrees, so small tilts need page-sized widths
        for applied in [0.1, -0.12, 0.15, -0.2] {
            assert_recovers(2400, 800, applied);
        }
    }

    #[test]
    fn test_peak_near_range_edge_has_no_confidence() {
        let img = skewed_text(800, 600, 4.6);
        let estimate = estimate_skew(&img, &SkewSearchParams::default()).unwrap();
        assert!((estimate.angle_degrees + 4.6).abs() < 0.1, "angle {}", estimate.angle_degrees);
        assert_eq!(estimate.confidence, 0.0);
    }

    #[test]
    fn test_weak_peak_has_no_confidence() {
        let img = BinaryImage::from_fn(200, 200, |x, y| (90..110).contains(&x) && (100..102).contains(&y));
        let estimate = estimate_skew(&img, &SkewSearchParams::default()).unwrap();
        assert!(estimate.max_score < MIN_VALID_MAX_SCORE);
        assert_eq!(estimate.confidence, 0.0);
    }

    #[test]
    fn test_straight_text_near_zero() {
        let img = skewed_text(800, 600, 0.0);
        let estimate = estimate_skew(&img, &SkewSearchParams::default()).unwrap();
        assert!(estimate.angle_degrees.abs() < 0.1, "angle {}", estimate.angle_degrees);
    }

    #[test]
    fn test_blank_image_has_no_valid_skew() {
        let img = BinaryImage::new(200, 200);
        assert!(matches!(
            estimate_skew(&img, &SkewSearchParams::default()),
            Err(Error::NoValidSkew(_))
        ));
    }

    #[test]
    fn test_rejects_gray_bitmap() {
        let bitmap = Bitmap::Gray(GrayImage::new(50, 50));
        assert!(matches!(
            estimate_bitmap_skew(&bitmap, &SkewSearchParams::default()),
            Err(Error::UnsupportedDepth { found: 8, .. })
        ));
    }

    #[test]
    fn test_rejects_bad_reduction() {
        let img = skewed_text(200, 200, 1.0);
        let params = SkewSearchParams {
            sweep_reduction: 3,
            ..Default::default()
        };
        assert!(matches!(
            estimate_skew(&img, &params),
            Err(Error::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_rejects_unbounded_sweep() {
        let img = skewed_text(200, 200, 1.0);
        for params in [
            SkewSearchParams {
                sweep_delta: 1e-12,
                ..Default::default()
            },
            SkewSearchParams {
                sweep_range: f64::INFINITY,
                ..Default::default()
            },
            SkewSearchParams {
                search_min_delta: 1e-300,
                ..Default::default()
            },
        ] {
            assert!(matches!(
                estimate_skew(&img, &params),
                Err(Error::InvalidParameter(_))
            ));
        }
    }

    #[test]
    fn test_reduce_binary_or_cascade() {
        let img = BinaryImage::from_fn(8, 8, |x, y| x == 7 && y == 0);
        let reduced = reduce_binary(&img, 4);
        assert_eq!(reduced.dimensions(), (2, 2));
        assert!(reduced.is_foreground(1, 0));
        assert_eq!(reduced.count_foreground(), 1);
    }

    #[test]
    fn test_differential_square_sum() {
        let rows = vec![0u64; 40];
        assert_eq!(differential_square_sum(&rows, 100), 0.0);

        // Stripes of 4 rows: transitions at rows 4, 8, ..., 36, minus the
        // 2-row band skipped at each end
        let striped: Vec<u64> = (0..40).map(|i| if (i / 4) % 2 == 0 { 10 } else { 0 }).collect();
        assert_eq!(differential_square_sum(&striped, 100), 9.0 * 100.0);
    }
}
