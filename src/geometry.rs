use nalgebra::{Matrix3, Vector3};

/// Axis-aligned rectangle in pixel coordinates.
///
/// Coordinates are signed because margin expansion may push a box past the
/// top-left corner of the canvas; clamp with [`BoundingBox::clamp_to`] before drawing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl BoundingBox {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Grow the box by `margin` pixels on every side
    pub fn expand(&self, margin: i32) -> Self {
        Self {
            x: self.x - margin,
            y: self.y - margin,
            width: (self.width + 2 * margin).max(0),
            height: (self.height + 2 * margin).max(0),
        }
    }

    /// Exclusive right edge
    pub fn right(&self) -> i32 {
        self.x + self.width
    }

    /// Exclusive bottom edge
    pub fn bottom(&self) -> i32 {
        self.y + self.height
    }

    /// Intersect with a `width` x `height` canvas.
    ///
    /// Returns `(x0, y0, x1, y1)` with exclusive far edges, or `None` when the
    /// box lies entirely outside.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        let x0 = self.x.max(0);
        let y0 = self.y.max(0);
        let x1 = self.right().min(width as i32);
        let y1 = self.bottom().min(height as i32);

        if x0 < x1 && y0 < y1 {
            Some((x0 as u32, y0 as u32, x1 as u32, y1 as u32))
        } else {
            None
        }
    }
}

/// Affine map rotating by `angle` radians about `center`.
///
/// Image coordinates have y pointing down, so a positive angle turns content
/// clockwise on screen.
pub fn rotation_about_center(angle: f64, center: (f64, f64)) -> Matrix3<f64> {
    let (cx, cy) = center;
    let (sin_a, cos_a) = angle.sin_cos();

    // Translate to origin, rotate, translate back
    let translate_to_origin = Matrix3::new(
        1.0, 0.0, -cx,
        0.0, 1.0, -cy,
        0.0, 0.0, 1.0,
    );

    let rotation = Matrix3::new(
        cos_a, -sin_a, 0.0,
        sin_a, cos_a, 0.0,
        0.0, 0.0, 1.0,
    );

    let translate_back = Matrix3::new(
        1.0, 0.0, cx,
        0.0, 1.0, cy,
        0.0, 0.0, 1.0,
    );

    translate_back * rotation * translate_to_origin
}

/// Transform a point using the affine matrix
pub fn transform_point(matrix: &Matrix3<f64>, x: f64, y: f64) -> (f64, f64) {
    let p = Vector3::new(x, y, 1.0);
    let result = matrix * p;
    (result.x / result.z, result.y / result.z)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_box() {
        let b = BoundingBox::new(40, 40, 10, 10).expand(15);
        assert_eq!(b, BoundingBox::new(25, 25, 40, 40));
    }

    #[test]
    fn test_clamp_partially_outside() {
        let b = BoundingBox::new(-5, 90, 20, 20);
        assert_eq!(b.clamp_to(100, 100), Some((0, 90, 15, 100)));
        assert_eq!(BoundingBox::new(120, 0, 5, 5).clamp_to(100, 100), None);
    }

    #[test]
    fn test_rotation_keeps_center() {
        let matrix = rotation_about_center(0.3, (50.0, 50.0));
        let (x, y) = transform_point(&matrix, 50.0, 50.0);
        assert!((x - 50.0).abs() < 1e-9);
        assert!((y - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_positive_angle_turns_clockwise() {
        // A point right of center moves down (y grows) for a positive angle
        let matrix = rotation_about_center(10f64.to_radians(), (0.0, 0.0));
        let (x, y) = transform_point(&matrix, 10.0, 0.0);
        assert!(x > 9.0);
        assert!(y > 1.0);
    }
}
