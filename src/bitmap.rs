use std::fs::File;
use std::io::Read;
use std::path::Path;

use image::{
    DynamicImage, ExtendedColorType, GrayImage, ImageDecoder, ImageError, ImageFormat,
    ImageReader, Luma, Rgba, RgbaImage,
};
use tracing::debug;

use crate::error::{Error, Result};
use crate::tiff_pages::{write_pages, PageData};

/// Gray value of a foreground (ink) pixel in a binary image
pub const FOREGROUND: u8 = 0;
/// Gray value of a background (paper) pixel in a binary image
pub const BACKGROUND: u8 = 255;

/// A 1 bpp image.
///
/// Stored as an 8-bit buffer restricted to [`FOREGROUND`] and [`BACKGROUND`] so it
/// can be handed to `imageproc` and the `image` encoders without repacking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryImage {
    pixels: GrayImage,
}

impl BinaryImage {
    /// All-background image
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            pixels: GrayImage::from_pixel(width, height, Luma([BACKGROUND])),
        }
    }

    /// Build an image from a predicate returning `true` for foreground pixels
    pub fn from_fn(width: u32, height: u32, mut is_foreground: impl FnMut(u32, u32) -> bool) -> Self {
        let pixels = GrayImage::from_fn(width, height, |x, y| {
            if is_foreground(x, y) {
                Luma([FOREGROUND])
            } else {
                Luma([BACKGROUND])
            }
        });
        Self { pixels }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }

    pub fn is_foreground(&self, x: u32, y: u32) -> bool {
        self.pixels.get_pixel(x, y)[0] == FOREGROUND
    }

    /// Number of foreground pixels
    pub fn count_foreground(&self) -> u64 {
        self.pixels.pixels().filter(|p| p[0] == FOREGROUND).count() as u64
    }

    pub fn as_gray(&self) -> &GrayImage {
        &self.pixels
    }
}

/// An owned image with one of the three supported depths
#[derive(Debug, Clone)]
pub enum Bitmap {
    Binary(BinaryImage),
    Gray(GrayImage),
    Color(RgbaImage),
}

impl Bitmap {
    /// Bits per pixel: 1, 8 or 32
    pub fn depth(&self) -> u8 {
        match self {
            Bitmap::Binary(_) => 1,
            Bitmap::Gray(_) => 8,
            Bitmap::Color(_) => 32,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Bitmap::Binary(img) => img.dimensions(),
            Bitmap::Gray(img) => img.dimensions(),
            Bitmap::Color(img) => img.dimensions(),
        }
    }

    /// Borrow as a binary image, failing for any other depth
    pub fn as_binary(&self) -> Result<&BinaryImage> {
        match self {
            Bitmap::Binary(img) => Ok(img),
            other => Err(Error::UnsupportedDepth {
                expected: 1,
                found: other.depth(),
            }),
        }
    }

    pub fn into_binary(self) -> Result<BinaryImage> {
        match self {
            Bitmap::Binary(img) => Ok(img),
            other => Err(Error::UnsupportedDepth {
                expected: 1,
                found: other.depth(),
            }),
        }
    }

    /// Classify a decoded image given the bit depth of its source file.
    ///
    /// Decoders widen 1 bpp sources (to luma or, for palette formats, to RGB),
    /// so a 1 bpp source is thresholded back to binary at mid gray. Anything
    /// else keeps its decoded depth: gray stays 8 bpp even when it happens to
    /// hold only black and white.
    pub fn from_decoded(img: DynamicImage, source_depth: u8) -> Self {
        if source_depth == 1 {
            let gray = img.to_luma8();
            let (width, height) = gray.dimensions();
            return Bitmap::Binary(BinaryImage::from_fn(width, height, |x, y| {
                gray.get_pixel(x, y)[0] < 128
            }));
        }
        match img {
            DynamicImage::ImageLuma8(gray) => Bitmap::Gray(gray),
            DynamicImage::ImageLumaA8(_)
            | DynamicImage::ImageLuma16(_)
            | DynamicImage::ImageLumaA16(_) => Bitmap::Gray(img.to_luma8()),
            other => Bitmap::Color(other.to_rgba8()),
        }
    }

    fn page_data(&self) -> PageData<'_> {
        match self {
            Bitmap::Binary(img) => PageData::Binary(img),
            Bitmap::Gray(img) => PageData::Gray(img),
            Bitmap::Color(img) => PageData::Color(img),
        }
    }

    /// Save to `path`.
    ///
    /// `.tif`/`.tiff` files are encoded directly and keep binary images at
    /// 1 bpp. Other extensions go through `image`, which stores binary images
    /// as 8-bit gray.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if ImageFormat::from_path(path).ok() == Some(ImageFormat::Tiff) {
            write_pages(path, [(self.page_data(), None)]).map_err(|source| Error::Encode {
                path: path.to_path_buf(),
                source,
            })?;
        } else {
            let saved = match self {
                Bitmap::Binary(img) => img.as_gray().save(path),
                Bitmap::Gray(img) => img.save(path),
                Bitmap::Color(img) => img.save(path),
            };
            saved.map_err(|source| Error::Save {
                path: path.to_path_buf(),
                source,
            })?;
        }
        debug!(path = %path.display(), depth = self.depth(), "Bitmap saved");
        Ok(())
    }
}

/// Depth class (1, 8 or 32) of a source color type
fn depth_of(color: ExtendedColorType) -> u8 {
    use ExtendedColorType::*;
    match color {
        L1 | La1 => 1,
        A8 | L2 | La2 | L4 | La4 | L8 | La8 | L16 | La16 => 8,
        _ => 32,
    }
}

/// Bits per pixel recorded in a PNG or BMP header.
///
/// The `image` decoders for these formats report the widened color type, so
/// the stored depth is read from the header itself.
fn header_bits_per_pixel(path: &Path, format: Option<ImageFormat>) -> Option<u16> {
    let mut header = [0u8; 30];
    let mut file = File::open(path).ok()?;
    file.read_exact(&mut header).ok()?;

    match format? {
        // IHDR: bit depth at 24, color type at 25
        ImageFormat::Png => {
            let samples = match header[25] {
                0 | 3 => 1,
                4 => 2,
                2 => 3,
                6 => 4,
                _ => return None,
            };
            Some(u16::from(header[24]) * samples)
        }
        // BITMAPINFOHEADER biBitCount
        ImageFormat::Bmp => Some(u16::from_le_bytes([header[28], header[29]])),
        _ => None,
    }
}

fn open_decoder(path: &Path) -> Result<(impl ImageDecoder, u8)> {
    let load_error = |source| Error::Load {
        path: path.to_path_buf(),
        source,
    };
    let reader = ImageReader::open(path)
        .and_then(|r| r.with_guessed_format())
        .map_err(|e| load_error(ImageError::IoError(e)))?;
    let format = reader.format();
    let decoder = reader.into_decoder().map_err(load_error)?;

    let depth = match header_bits_per_pixel(path, format) {
        Some(1) => 1,
        _ => depth_of(decoder.original_color_type()),
    };
    Ok((decoder, depth))
}

/// Load an image file and classify it by the depth stored in the file
pub fn load_bitmap(path: impl AsRef<Path>) -> Result<Bitmap> {
    let path = path.as_ref();
    let (decoder, source_depth) = open_decoder(path)?;
    let img = DynamicImage::from_decoder(decoder).map_err(|source| Error::Load {
        path: path.to_path_buf(),
        source,
    })?;
    let bitmap = Bitmap::from_decoded(img, source_depth);
    let (width, height) = bitmap.dimensions();
    debug!(
        path = %path.display(),
        width,
        height,
        depth = bitmap.depth(),
        "Bitmap loaded"
    );
    Ok(bitmap)
}

/// Report the bit depth stored in an image file without decoding its pixels
pub fn bit_depth(path: impl AsRef<Path>) -> Result<u8> {
    let (_, depth) = open_decoder(path.as_ref())?;
    Ok(depth)
}

/// Expand a binary image to 8-bit gray, foreground staying black
pub fn convert_to_gray(img: &BinaryImage) -> Result<GrayImage> {
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return Err(Error::GrayscaleConversionFailed(format!(
            "empty image ({}x{})",
            width, height
        )));
    }
    Ok(img.as_gray().clone())
}

/// Binarize a gray image: values strictly below `threshold` become foreground.
///
/// Higher thresholds therefore keep more of the anti-aliased stroke edges.
pub fn threshold_to_binary(gray: &GrayImage, threshold: u8) -> BinaryImage {
    let (width, height) = gray.dimensions();
    BinaryImage::from_fn(width, height, |x, y| gray.get_pixel(x, y)[0] < threshold)
}

/// Render a binary image as opaque black-on-white color
pub fn binary_to_color(img: &BinaryImage) -> RgbaImage {
    let (width, height) = img.dimensions();
    RgbaImage::from_fn(width, height, |x, y| {
        if img.is_foreground(x, y) {
            Rgba([0, 0, 0, 255])
        } else {
            Rgba([255, 255, 255, 255])
        }
    })
}
