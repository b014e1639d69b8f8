//! Multi-page diff reports.
//!
//! A report is an LZW-compressed TIFF with five pages, each carrying an
//! ImageDescription: the annotated composite, the updated image, the original
//! image, the added-pixel mask and the erased-pixel mask. Binary pages are
//! stored at 1 bpp.

use std::path::Path;

use image::{Rgba, RgbaImage};
use tracing::{info, instrument};

use crate::annotate::{annotate, AnnotationOutcome, BorderSides, MarkerStyle};
use crate::bitmap::{binary_to_color, BinaryImage};
use crate::diff::{diff, DiffResult};
use crate::error::{Error, Result};
use crate::tiff_pages::{write_pages, PageData};

/// Color of pixels present only in the original
pub const ERASED_COLOR: [u8; 3] = [0, 192, 0];
/// Color of pixels present only in the updated image
pub const ADDED_COLOR: [u8; 3] = [255, 0, 0];

/// Pixel data of one report page
#[derive(Debug, Clone)]
pub enum PageImage {
    Color(RgbaImage),
    Binary(BinaryImage),
}

#[derive(Debug, Clone)]
pub struct ReportPage {
    pub image: PageImage,
    pub description: String,
}

/// Caption of the composite page
pub fn summary_caption(tag: &str, erased: AnnotationOutcome, added: AnnotationOutcome) -> String {
    format!(
        "{}({}, {}) changed marks. (erased=green, added=red)",
        tag,
        erased.count(),
        added.count()
    )
}

pub fn added_caption(marks: usize, pixels: u64, fraction: f64) -> String {
    format!("Marks added: {}, Pixels {} ({:10.6}).", marks, pixels, fraction)
}

pub fn erased_caption(marks: usize, pixels: u64, fraction: f64) -> String {
    format!("Marks erased: {}, Pixels {} ({:10.6}).", marks, pixels, fraction)
}

/// Original drawn black on white with erased pixels green and added pixels red
pub fn diff_composite(original: &BinaryImage, result: &DiffResult) -> RgbaImage {
    let mut composite = binary_to_color(original);
    for (x, y, pixel) in composite.enumerate_pixels_mut() {
        if result.removed_mask.is_foreground(x, y) {
            let [r, g, b] = ERASED_COLOR;
            *pixel = Rgba([r, g, b, 255]);
        } else if result.added_mask.is_foreground(x, y) {
            let [r, g, b] = ADDED_COLOR;
            *pixel = Rgba([r, g, b, 255]);
        }
    }
    composite
}

/// Everything needed to write one diff report
#[derive(Debug, Clone)]
pub struct DiffReport {
    pub diff: DiffResult,
    pub erased: AnnotationOutcome,
    pub added: AnnotationOutcome,
    pub pages: Vec<ReportPage>,
}

impl DiffReport {
    /// Diff `original` against `updated` and lay out the report pages
    #[instrument(skip(original, updated))]
    pub fn from_pair(
        original: &BinaryImage,
        updated: &BinaryImage,
        tag: &str,
        sides: BorderSides,
    ) -> Result<Self> {
        let result = diff(original, updated)?;

        let mut composite = diff_composite(original, &result);
        let erased = annotate(
            &mut composite,
            &result.removed_mask,
            &MarkerStyle::new(ERASED_COLOR).with_sides(sides),
        );
        let added = annotate(
            &mut composite,
            &result.added_mask,
            &MarkerStyle::new(ADDED_COLOR).with_sides(sides),
        );

        let pages = vec![
            ReportPage {
                image: PageImage::Color(composite),
                description: summary_caption(tag, erased, added),
            },
            ReportPage {
                image: PageImage::Binary(updated.clone()),
                description: "New image".to_string(),
            },
            ReportPage {
                image: PageImage::Binary(original.clone()),
                description: "Original image".to_string(),
            },
            ReportPage {
                image: PageImage::Binary(result.added_mask.clone()),
                description: added_caption(
                    added.count(),
                    result.added_pixel_count,
                    result.added_fraction,
                ),
            },
            ReportPage {
                image: PageImage::Binary(result.removed_mask.clone()),
                description: erased_caption(
                    erased.count(),
                    result.removed_pixel_count,
                    result.removed_fraction,
                ),
            },
        ];

        Ok(Self {
            diff: result,
            erased,
            added,
            pages,
        })
    }

    /// Caption of the composite page
    pub fn summary(&self) -> &str {
        self.pages
            .first()
            .map(|p| p.description.as_str())
            .unwrap_or_default()
    }

    /// Write all pages to one multi-page TIFF, replacing any existing file
    pub fn write_tiff(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let pages = self.pages.iter().map(|page| {
            let data = match &page.image {
                PageImage::Color(img) => PageData::Color(img),
                PageImage::Binary(img) => PageData::Binary(img),
            };
            (data, Some(page.description.as_str()))
        });
        write_pages(path, pages).map_err(|source| Error::Report {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), pages = self.pages.len(), "Diff report written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_captions() {
        let summary = summary_caption(
            "Threshold 130 ",
            AnnotationOutcome::Rendered(2),
            AnnotationOutcome::Skipped(1500),
        );
        assert_eq!(
            summary,
            "Threshold 130 (2, 1500) changed marks. (erased=green, added=red)"
        );
        assert_eq!(
            added_caption(1, 100, 0.01),
            "Marks added: 1, Pixels 100 (  0.010000)."
        );
        assert_eq!(
            erased_caption(0, 0, 0.0),
            "Marks erased: 0, Pixels 0 (  0.000000)."
        );
    }

    #[test]
    fn test_composite_colors() {
        let original = BinaryImage::from_fn(10, 10, |x, _| x < 5);
        let updated = BinaryImage::from_fn(10, 10, |x, _| x >= 2 && x < 7);
        let result = diff(&original, &updated).unwrap();
        let composite = diff_composite(&original, &result);

        assert_eq!(*composite.get_pixel(0, 0), Rgba([0, 192, 0, 255]));
        assert_eq!(*composite.get_pixel(3, 0), Rgba([0, 0, 0, 255]));
        assert_eq!(*composite.get_pixel(6, 0), Rgba([255, 0, 0, 255]));
        assert_eq!(*composite.get_pixel(9, 0), Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn test_report_pages() {
        let original = BinaryImage::new(100, 100);
        let updated =
            BinaryImage::from_fn(100, 100, |x, y| (40..50).contains(&x) && (40..50).contains(&y));

        let report = DiffReport::from_pair(&original, &updated, "Test ", BorderSides::All).unwrap();
        assert_eq!(report.pages.len(), 5);
        assert_eq!(report.added, AnnotationOutcome::Rendered(1));
        assert_eq!(report.erased, AnnotationOutcome::Rendered(0));
        assert_eq!(
            report.summary(),
            "Test (0, 1) changed marks. (erased=green, added=red)"
        );
        assert_eq!(report.pages[1].description, "New image");
        assert_eq!(report.pages[2].description, "Original image");
        assert_eq!(
            report.pages[3].description,
            "Marks added: 1, Pixels 100 (  0.010000)."
        );
    }

    #[test]
    fn test_write_tiff() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.tif");

        let original = BinaryImage::from_fn(40, 30, |x, y| x == 10 && y > 5);
        let updated = BinaryImage::from_fn(40, 30, |x, y| x == 12 && y > 5);
        let report = DiffReport::from_pair(&original, &updated, "", BorderSides::All).unwrap();
        report.write_tiff(&path).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert!(bytes.len() > 8);
        assert!(bytes.starts_with(b"II*\0") || bytes.starts_with(b"MM\0*"));

        // First page decodes back to the composite size
        let first = image::open(&path).unwrap();
        assert_eq!((first.width(), first.height()), (40, 30));
    }

    #[test]
    fn test_report_pages_are_lzw_with_captions() {
        use tiff::decoder::Decoder;
        use tiff::tags::Tag;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.tif");
        let original = BinaryImage::from_fn(40, 30, |x, y| x == 10 && y > 5);
        let updated = BinaryImage::from_fn(40, 30, |x, y| x == 12 && y > 5);
        let report = DiffReport::from_pair(&original, &updated, "", BorderSides::All).unwrap();
        report.write_tiff(&path).unwrap();

        let file = std::io::BufReader::new(std::fs::File::open(&path).unwrap());
        let mut decoder = Decoder::new(file).unwrap();
        let mut descriptions = Vec::new();
        let mut bits = Vec::new();
        loop {
            // 5 = LZW
            assert_eq!(decoder.get_tag_u32(Tag::Compression).unwrap(), 5);
            descriptions.push(decoder.get_tag_ascii_string(Tag::ImageDescription).unwrap());
            bits.push(decoder.get_tag_u32(Tag::BitsPerSample).unwrap_or(0));
            if !decoder.more_images() {
                break;
            }
            decoder.next_image().unwrap();
        }

        assert_eq!(descriptions.len(), 5);
        assert_eq!(descriptions[1], "New image");
        assert_eq!(descriptions[2], "Original image");
        assert_eq!(&bits[1..], &[1, 1, 1, 1]);
    }
}
