use image::{Luma, Rgba, RgbaImage};
use imageproc::region_labelling::{connected_components, Connectivity};
use tracing::{debug, warn};

use crate::bitmap::{BinaryImage, BACKGROUND};
use crate::geometry::BoundingBox;

/// Above this many blobs a mask is considered noise and is not drawn
pub const MAX_RENDERED_COMPONENTS: usize = 1000;

/// Which sides of a blob box receive the dotted marks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BorderSides {
    #[default]
    All,
    /// Top and left only, matching reports produced by older tooling
    TopLeft,
}

/// How blobs of one mask are marked on the composite
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarkerStyle {
    /// Pixels added around each blob's bounding box
    pub margin: i32,
    pub color: [u8; 3],
    /// Opacity of each blend, 0.0 to 1.0
    pub blend: f32,
    /// Thickness of the solid outline
    pub line_width: i32,
    pub sides: BorderSides,
}

impl MarkerStyle {
    pub fn new(color: [u8; 3]) -> Self {
        Self {
            margin: 15,
            color,
            blend: 0.75,
            line_width: 4,
            sides: BorderSides::All,
        }
    }

    /// Green, for pixels present in the original only
    pub fn erased() -> Self {
        Self::new([0, 192, 0])
    }

    /// Red, for pixels present in the updated image only
    pub fn added() -> Self {
        Self::new([255, 0, 0])
    }

    pub fn with_sides(mut self, sides: BorderSides) -> Self {
        self.sides = sides;
        self
    }
}

/// Result of marking one mask
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnotationOutcome {
    /// Every component was drawn
    Rendered(usize),
    /// Too many components; nothing was drawn
    Skipped(usize),
}

impl AnnotationOutcome {
    /// Number of connected components in the mask, drawn or not
    pub fn count(&self) -> usize {
        match *self {
            AnnotationOutcome::Rendered(n) | AnnotationOutcome::Skipped(n) => n,
        }
    }
}

/// Bounding boxes of the 8-connected foreground components, in label order
pub fn connected_component_boxes(mask: &BinaryImage) -> Vec<BoundingBox> {
    let labels = connected_components(mask.as_gray(), Connectivity::Eight, Luma([BACKGROUND]));

    // (min_x, min_y, max_x, max_y) per label
    let mut extents: Vec<Option<(u32, u32, u32, u32)>> = Vec::new();
    for (x, y, label) in labels.enumerate_pixels() {
        let label = label[0] as usize;
        if label == 0 {
            continue;
        }
        if extents.len() < label {
            extents.resize(label, None);
        }
        let extent = &mut extents[label - 1];
        *extent = Some(match *extent {
            None => (x, y, x, y),
            Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
        });
    }

    extents
        .into_iter()
        .flatten()
        .map(|(x0, y0, x1, y1)| {
            BoundingBox::new(
                x0 as i32,
                y0 as i32,
                (x1 - x0 + 1) as i32,
                (y1 - y0 + 1) as i32,
            )
        })
        .collect()
}

/// Component boxes grown by `margin` on every side
pub fn expanded_boxes(mask: &BinaryImage, margin: i32) -> Vec<BoundingBox> {
    connected_component_boxes(mask)
        .iter()
        .map(|b| b.expand(margin))
        .collect()
}

/// Mix `color` into one canvas pixel; out-of-canvas coordinates are ignored
fn blend_pixel(canvas: &mut RgbaImage, x: i32, y: i32, color: [u8; 3], fract: f32) {
    if x < 0 || y < 0 || x >= canvas.width() as i32 || y >= canvas.height() as i32 {
        return;
    }
    let pixel = canvas.get_pixel_mut(x as u32, y as u32);
    let Rgba([r, g, b, a]) = *pixel;
    let mix = |old: u8, new: u8| ((1.0 - fract) * old as f32 + fract * new as f32).round() as u8;
    *pixel = Rgba([mix(r, color[0]), mix(g, color[1]), mix(b, color[2]), a]);
}

/// Single-pixel marks at stride 2 just inside the box outline
fn draw_dotted_marks(canvas: &mut RgbaImage, b: &BoundingBox, style: &MarkerStyle) {
    let line_width = style.line_width;
    let half = line_width / 2;
    let draw_far_sides = style.sides == BorderSides::All;

    for j in ((half - 1)..(b.width - line_width - 1)).step_by(2) {
        let x = b.x + half + j;
        blend_pixel(canvas, x, b.y + half, style.color, style.blend);
        if draw_far_sides {
            blend_pixel(canvas, x, b.y + b.height - line_width, style.color, style.blend);
        }
    }

    for j in ((half - 1)..(b.height - line_width - 1)).step_by(2) {
        let y = b.y + half + j;
        blend_pixel(canvas, b.x + half, y, style.color, style.blend);
        if draw_far_sides {
            blend_pixel(canvas, b.x + b.width - line_width, y, style.color, style.blend);
        }
    }
}

/// Solid outlines of every box, each covered canvas pixel blended once
fn draw_solid_outlines(canvas: &mut RgbaImage, boxes: &[BoundingBox], style: &MarkerStyle) {
    let (width, height) = canvas.dimensions();
    let mut covered = vec![false; width as usize * height as usize];
    let lw = style.line_width;

    for b in boxes {
        let bands = [
            BoundingBox::new(b.x, b.y, b.width, lw),
            BoundingBox::new(b.x, b.bottom() - lw, b.width, lw),
            BoundingBox::new(b.x, b.y, lw, b.height),
            BoundingBox::new(b.right() - lw, b.y, lw, b.height),
        ];
        for band in bands {
            if let Some((x0, y0, x1, y1)) = band.clamp_to(width, height) {
                for y in y0..y1 {
                    for x in x0..x1 {
                        covered[(y * width + x) as usize] = true;
                    }
                }
            }
        }
    }

    for (i, &is_covered) in covered.iter().enumerate() {
        if !is_covered {
            continue;
        }
        let x = (i % width as usize) as i32;
        let y = (i / width as usize) as i32;
        blend_pixel(canvas, x, y, style.color, style.blend);
    }
}

/// Mark every connected component of `mask` on `canvas`.
///
/// Each component's box is expanded by the style margin, dotted just inside
/// its edge, and finally all boxes get a solid blended outline in one pass.
/// Masks with more than [`MAX_RENDERED_COMPONENTS`] components leave the
/// canvas untouched.
pub fn annotate(canvas: &mut RgbaImage, mask: &BinaryImage, style: &MarkerStyle) -> AnnotationOutcome {
    let boxes = expanded_boxes(mask, style.margin);
    let count = boxes.len();

    if count > MAX_RENDERED_COMPONENTS {
        warn!(count, "Too many changed marks to draw");
        return AnnotationOutcome::Skipped(count);
    }

    for b in &boxes {
        draw_dotted_marks(canvas, b, style);
    }
    draw_solid_outlines(canvas, &boxes, style);

    debug!(count, "Marks rendered");
    AnnotationOutcome::Rendered(count)
}
