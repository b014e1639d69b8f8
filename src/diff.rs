use std::path::Path;

use tracing::{debug, instrument};

use crate::bitmap::{load_bitmap, BinaryImage, Bitmap};
use crate::error::{Error, Result};

/// Pixel-level comparison of two binary images
#[derive(Debug, Clone)]
pub struct DiffResult {
    /// Set in the original, clear in the updated image
    pub removed_mask: BinaryImage,
    /// Set in the updated image, clear in the original
    pub added_mask: BinaryImage,
    pub removed_fraction: f64,
    pub added_fraction: f64,
    pub removed_pixel_count: u64,
    pub added_pixel_count: u64,
}

impl DiffResult {
    pub fn is_identical(&self) -> bool {
        self.removed_pixel_count == 0 && self.added_pixel_count == 0
    }
}

/// `minuend AND NOT subtrahend`, with its foreground count
fn subtract(minuend: &BinaryImage, subtrahend: &BinaryImage) -> (BinaryImage, u64) {
    let (width, height) = minuend.dimensions();
    let mut count = 0u64;
    let mask = BinaryImage::from_fn(width, height, |x, y| {
        let on = minuend.is_foreground(x, y) && !subtrahend.is_foreground(x, y);
        if on {
            count += 1;
        }
        on
    });
    (mask, count)
}

/// Compare two binary images of the same size.
///
/// Removed and added pixels are kept apart rather than merged into one XOR
/// mask, so callers can render them differently.
#[instrument(skip_all, fields(width = original.width(), height = original.height()))]
pub fn diff(original: &BinaryImage, updated: &BinaryImage) -> Result<DiffResult> {
    if original.dimensions() != updated.dimensions() {
        return Err(Error::DimensionMismatch {
            original_width: original.width(),
            original_height: original.height(),
            updated_width: updated.width(),
            updated_height: updated.height(),
        });
    }

    let (removed_mask, removed_pixel_count) = subtract(original, updated);
    let (added_mask, added_pixel_count) = subtract(updated, original);

    let total = original.width() as f64 * original.height() as f64;
    let fraction = |count: u64| if total > 0.0 { count as f64 / total } else { 0.0 };

    let result = DiffResult {
        removed_fraction: fraction(removed_pixel_count),
        added_fraction: fraction(added_pixel_count),
        removed_mask,
        added_mask,
        removed_pixel_count,
        added_pixel_count,
    };
    debug!(
        removed = result.removed_pixel_count,
        added = result.added_pixel_count,
        "Binary diff computed"
    );
    Ok(result)
}

/// Diff two loaded bitmaps, both of which must be 1 bpp
pub fn diff_bitmaps(original: &Bitmap, updated: &Bitmap) -> Result<DiffResult> {
    diff(original.as_binary()?, updated.as_binary()?)
}

/// Load two files and diff them
pub fn diff_files(original: impl AsRef<Path>, updated: impl AsRef<Path>) -> Result<DiffResult> {
    let original = load_bitmap(original)?;
    let updated = load_bitmap(updated)?;
    diff_bitmaps(&original, &updated)
}
