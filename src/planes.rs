//! Contains the Viewport struct, which describes a relationship
//! between a rectangle on the integral plane with an origin at 0,0,
//! and a rectangle on the complex plane bounded by a minimum and
//! maximum real and imaginary part.  Also carries the iteration cap,
//! since a viewport is everything a single run needs to know.
use num::Complex;

use crate::errors::{MandelError, Result};

/// Describes the x, y of a point in the integral plane.  Column first.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Pixel(pub usize, pub usize);

/// The region of the complex plane to scan, the resolution at which
/// to scan it, and how long to iterate each point.  Only `new` can
/// build one, so every `Viewport` in hand has a non-empty region and
/// at least one pixel.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Viewport {
    min_real: f64,
    max_real: f64,
    min_imag: f64,
    max_imag: f64,
    width: usize,
    height: usize,
    max_iter: u32,
}

impl Viewport {
    /// Constructor.  Rejects empty or inverted regions and zero-sized
    /// grids.
    pub fn new(
        min_real: f64,
        max_real: f64,
        min_imag: f64,
        max_imag: f64,
        width: usize,
        height: usize,
        max_iter: u32,
    ) -> Result<Viewport> {
        // Written so that NaN bounds fail too.
        if !(max_real > min_real) {
            return Err(MandelError::InvalidViewport(format!(
                "maximum real {} is not greater than minimum real {}",
                max_real, min_real
            )));
        }
        if !(max_imag > min_imag) {
            return Err(MandelError::InvalidViewport(format!(
                "maximum imaginary {} is not greater than minimum imaginary {}",
                max_imag, min_imag
            )));
        }
        if width == 0 || height == 0 {
            return Err(MandelError::InvalidViewport(format!(
                "{}x{} has no pixels",
                width, height
            )));
        }
        Ok(Viewport {
            min_real,
            max_real,
            min_imag,
            max_imag,
            width,
            height,
            max_iter,
        })
    }

    /// Real part of the left edge.
    pub fn min_real(&self) -> f64 {
        self.min_real
    }

    /// Real part of the right edge.
    pub fn max_real(&self) -> f64 {
        self.max_real
    }

    /// Imaginary part of the bottom edge.
    pub fn min_imag(&self) -> f64 {
        self.min_imag
    }

    /// Imaginary part of the top edge.
    pub fn max_imag(&self) -> f64 {
        self.max_imag
    }

    /// Columns in the integral plane.  Never zero.
    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    /// Rows in the integral plane.  Never zero.
    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    /// Iteration cap; points that never escape report exactly this.
    #[inline]
    pub fn max_iter(&self) -> u32 {
        self.max_iter
    }

    /// The total number of points in the integral grid.  Used to
    /// calculate memory needs; `None` if it does not fit in a usize.
    pub fn cells(&self) -> Option<usize> {
        self.width.checked_mul(self.height)
    }

    /// Real coordinate of column `x`.
    #[inline]
    pub fn real_at(&self, x: usize) -> f64 {
        self.min_real + (x as f64) * (self.max_real - self.min_real) / (self.width as f64)
    }

    /// Imaginary coordinate of row `y`.  Row 0 is the bottom edge.
    #[inline]
    pub fn imag_at(&self, y: usize) -> f64 {
        self.min_imag + (y as f64) * (self.max_imag - self.min_imag) / (self.height as f64)
    }

    /// Given a pixel on the integral cartesian plane, map it to the
    /// point on the complex plane the kernel will iterate for it.
    pub fn pixel_to_point(&self, pixel: &Pixel) -> Complex<f64> {
        Complex::new(self.real_at(pixel.0), self.imag_at(pixel.1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classic() -> Viewport {
        Viewport::new(-2.0, 1.0, -1.0, 1.0, 800, 800, 100).unwrap()
    }

    #[test]
    fn viewport_fails_on_inverted_real_axis() {
        assert!(Viewport::new(1.0, -2.0, -1.0, 1.0, 4, 4, 10).is_err());
    }

    #[test]
    fn viewport_fails_on_flat_imaginary_axis() {
        assert!(Viewport::new(-2.0, 1.0, 1.0, 1.0, 4, 4, 10).is_err());
    }

    #[test]
    fn viewport_fails_on_nan_bound() {
        assert!(Viewport::new(std::f64::NAN, 1.0, -1.0, 1.0, 4, 4, 10).is_err());
    }

    #[test]
    fn viewport_fails_on_empty_grid() {
        assert!(Viewport::new(-2.0, 1.0, -1.0, 1.0, 0, 4, 10).is_err());
        assert!(Viewport::new(-2.0, 1.0, -1.0, 1.0, 4, 0, 10).is_err());
    }

    #[test]
    fn accessors_report_what_was_built() {
        let vp = Viewport::new(-2.0, 1.0, -1.5, 1.25, 30, 20, 7).unwrap();
        assert_eq!((vp.min_real(), vp.max_real()), (-2.0, 1.0));
        assert_eq!((vp.min_imag(), vp.max_imag()), (-1.5, 1.25));
        assert_eq!((vp.width(), vp.height(), vp.max_iter()), (30, 20, 7));
    }

    #[test]
    fn viewport_allows_zero_iterations() {
        assert!(Viewport::new(-2.0, 1.0, -1.0, 1.0, 4, 4, 0).is_ok());
    }

    #[test]
    fn pixel_to_point_on_classic_view() {
        let vp = classic();
        assert_eq!(vp.pixel_to_point(&Pixel(0, 0)), Complex::new(-2.0, -1.0));
        assert_eq!(vp.pixel_to_point(&Pixel(400, 400)), Complex::new(-0.5, 0.0));
    }

    #[test]
    fn far_edge_is_never_sampled() {
        let vp = Viewport::new(0.0, 4.0, 0.0, 2.0, 4, 2, 1).unwrap();
        assert_eq!(vp.real_at(3), 3.0);
        assert_eq!(vp.imag_at(1), 1.0);
    }

    #[test]
    fn cells_overflow_is_reported() {
        let vp = Viewport::new(-2.0, 1.0, -1.0, 1.0, usize::max_value(), 2, 1).unwrap();
        assert_eq!(vp.cells(), None);
        assert_eq!(classic().cells(), Some(640_000));
    }
}
