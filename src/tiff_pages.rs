//! TIFF pages encoded directly with the `tiff` crate.
//!
//! `image` widens 1 bpp images to 8 bits when writing and has no way to attach
//! an ImageDescription, so binary images and diff reports are written here.
//! Every page is LZW compressed.

use std::fs::File;
use std::io::{BufWriter, Seek, Write};
use std::path::Path;

use image::{GrayImage, RgbaImage};
use tiff::encoder::colortype::{self, ColorType};
use tiff::encoder::compression::Lzw;
use tiff::encoder::TiffEncoder;
use tiff::tags::{PhotometricInterpretation, SampleFormat, Tag};
use tiff::{TiffError, TiffResult};

use crate::bitmap::BinaryImage;

/// One bit per pixel, 0 is black
pub struct Bilevel;

impl ColorType for Bilevel {
    type Inner = u8;
    const TIFF_VALUE: PhotometricInterpretation = PhotometricInterpretation::BlackIsZero;
    const BITS_PER_SAMPLE: &'static [u16] = &[1];
    const SAMPLE_FORMAT: &'static [SampleFormat] = &[SampleFormat::Uint];
}

/// Pixel data of one page, borrowed for the duration of the write
#[derive(Debug, Clone, Copy)]
pub enum PageData<'a> {
    Color(&'a RgbaImage),
    Gray(&'a GrayImage),
    Binary(&'a BinaryImage),
}

/// Pack a binary image MSB first, one byte-padded row at a time.
/// Background pixels are 1 bits.
pub fn pack_bilevel(img: &BinaryImage) -> Vec<u8> {
    let (width, height) = img.dimensions();
    let row_bytes = width.div_ceil(8) as usize;
    let mut packed = vec![0u8; row_bytes * height as usize];
    if row_bytes == 0 {
        return packed;
    }

    for (y, row) in packed.chunks_exact_mut(row_bytes).enumerate() {
        for x in 0..width {
            if !img.is_foreground(x, y as u32) {
                row[(x / 8) as usize] |= 0x80 >> (x % 8);
            }
        }
    }
    packed
}

/// Append one LZW-compressed page, with an optional ImageDescription
pub fn write_page<W: Write + Seek>(
    encoder: &mut TiffEncoder<W>,
    page: PageData<'_>,
    description: Option<&str>,
) -> TiffResult<()> {
    match page {
        PageData::Color(img) => {
            let (width, height) = img.dimensions();
            let mut tiff_page =
                encoder.new_image_with_compression::<colortype::RGB8, _>(width, height, Lzw)?;
            if let Some(text) = description {
                tiff_page.encoder().write_tag(Tag::ImageDescription, text)?;
            }
            let rgb: Vec<u8> = img.pixels().flat_map(|p| [p[0], p[1], p[2]]).collect();
            tiff_page.write_data(&rgb)
        }
        PageData::Gray(img) => {
            let (width, height) = img.dimensions();
            let mut tiff_page =
                encoder.new_image_with_compression::<colortype::Gray8, _>(width, height, Lzw)?;
            if let Some(text) = description {
                tiff_page.encoder().write_tag(Tag::ImageDescription, text)?;
            }
            tiff_page.write_data(img.as_raw())
        }
        PageData::Binary(img) => {
            let (width, height) = img.dimensions();
            // The encoder sizes rows in samples, so it is given whole bytes per
            // row and the width tag is corrected to pixels afterwards
            let mut tiff_page = encoder.new_image_with_compression::<Bilevel, _>(
                width.div_ceil(8),
                height,
                Lzw,
            )?;
            tiff_page.encoder().write_tag(Tag::ImageWidth, width)?;
            if let Some(text) = description {
                tiff_page.encoder().write_tag(Tag::ImageDescription, text)?;
            }
            tiff_page.write_data(&pack_bilevel(img))
        }
    }
}

/// Write `pages` in order to a new file at `path`
pub fn write_pages<'a>(
    path: &Path,
    pages: impl IntoIterator<Item = (PageData<'a>, Option<&'a str>)>,
) -> TiffResult<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    {
        let mut encoder = TiffEncoder::new(&mut writer)?;
        for (page, description) in pages {
            write_page(&mut encoder, page, description)?;
        }
    }
    writer.flush().map_err(TiffError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ExtendedColorType, ImageDecoder, ImageReader};

    #[test]
    fn test_pack_bilevel_pads_rows() {
        // 10 pixels wide: two bytes per row, six padding bits
        let img = BinaryImage::from_fn(10, 2, |x, y| y == 0 && (x == 0 || x == 9));
        assert_eq!(pack_bilevel(&img), vec![0x7f, 0x80, 0xff, 0xc0]);
    }

    #[test]
    fn test_binary_page_reads_back_as_one_bit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("marks.tif");
        let img = BinaryImage::from_fn(37, 11, |x, y| (x + y) % 3 == 0);

        write_pages(&path, [(PageData::Binary(&img), Some("marks"))]).unwrap();

        let decoder = ImageReader::open(&path)
            .unwrap()
            .with_guessed_format()
            .unwrap()
            .into_decoder()
            .unwrap();
        assert_eq!(decoder.original_color_type(), ExtendedColorType::L1);
        assert_eq!(decoder.dimensions(), (37, 11));

        let decoded = image::open(&path).unwrap().to_luma8();
        assert_eq!(&decoded, img.as_gray());
    }
}
