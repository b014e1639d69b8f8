use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failures of the deskew and diff pipeline.
///
/// "Nothing to do" results are not errors: see [`crate::DeskewOutcome::NotDeskewed`]
/// and [`crate::AnnotationOutcome::Skipped`].
#[derive(Debug, Error)]
pub enum Error {
    #[error("Unsupported bit depth: expected {expected} bpp, found {found} bpp")]
    UnsupportedDepth { expected: u8, found: u8 },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("No valid skew angle: {0}")]
    NoValidSkew(String),

    #[error("Couldn't convert to grayscale: {0}")]
    GrayscaleConversionFailed(String),

    #[error("Couldn't rotate gray by area map: {0}")]
    RotationFailed(String),

    #[error("Dimension mismatch: original {original_width}x{original_height}, updated {updated_width}x{updated_height}")]
    DimensionMismatch {
        original_width: u32,
        original_height: u32,
        updated_width: u32,
        updated_height: u32,
    },

    #[error("Failed to load image {path:?}")]
    Load {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Failed to save image {path:?}")]
    Save {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Failed to encode TIFF {path:?}")]
    Encode {
        path: PathBuf,
        #[source]
        source: tiff::TiffError,
    },

    #[error("Failed to write report {path:?}")]
    Report {
        path: PathBuf,
        #[source]
        source: tiff::TiffError,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
