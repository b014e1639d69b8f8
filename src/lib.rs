pub mod annotate;
pub mod bitmap;
pub mod cli;
pub mod deskew;
pub mod diff;
pub mod error;
pub mod geometry;
pub mod report;
pub mod skew;
pub mod tiff_pages;
pub mod transform;

pub use annotate::{annotate, AnnotationOutcome, BorderSides, MarkerStyle};
pub use bitmap::{bit_depth, load_bitmap, BinaryImage, Bitmap};
pub use cli::Cli;
pub use deskew::{
    deskew, deskew_sweep, DeskewConfig, DeskewOutcome, Intermediates, NotDeskewedReason,
    SweepOutcome,
};
pub use diff::{diff, diff_files, DiffResult};
pub use error::{Error, Result};
pub use geometry::BoundingBox;
pub use report::DiffReport;
pub use skew::{estimate_skew, SkewEstimate, SkewSearchParams};
