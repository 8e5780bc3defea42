//! Turns a grid of iteration counts into an RGB image on disk.
//!
//! Points that never escaped are black.  Everything else is banded in
//! two tones sixteen iterations wide: the low four bits of the count
//! set the intensity and bit 4 picks between a red band and a pale
//! band.  The grid's row 0 is the bottom of the complex region, so the
//! image is written bottom row first.

use image::ColorType;
use std::convert::TryFrom;
use std::path::Path;

use crate::errors::{MandelError, Result};
use crate::grid::OutputGrid;

/// The color of a point that took `p` iterations.
pub fn color_of(p: u32, max_iter: u32) -> [u8; 3] {
    if p == max_iter {
        return [0, 0, 0];
    }
    let intensity = ((p % 16) * 16) as u8;
    if p & 16 != 0 {
        [240, intensity, intensity]
    } else {
        [intensity, 0, 0]
    }
}

/// Packed RGB8 pixels, top image row first.
pub fn to_rgb(grid: &OutputGrid, max_iter: u32) -> Vec<u8> {
    let mut pixels = Vec::with_capacity(grid.width() * grid.height() * 3);
    for y in (0..grid.height()).rev() {
        for p in grid.row(y) {
            pixels.extend_from_slice(&color_of(*p, max_iter));
        }
    }
    pixels
}

/// Write `grid` to `path`.  The format follows the extension; PNG is
/// the usual choice.
pub fn write_image<P: AsRef<Path>>(path: P, grid: &OutputGrid, max_iter: u32) -> Result<()> {
    let path = path.as_ref();
    let failed = |reason: String| MandelError::Output {
        path: path.display().to_string(),
        reason,
    };
    let width = u32::try_from(grid.width()).map_err(|_| failed("image too wide".to_string()))?;
    let height = u32::try_from(grid.height()).map_err(|_| failed("image too tall".to_string()))?;
    let pixels = to_rgb(grid, max_iter);
    image::save_buffer(path, &pixels, width, height, ColorType::RGB(8))
        .map_err(|err| failed(err.to_string()))?;
    info!("wrote {}x{} image to {}", width, height, path.display());
    Ok(())
}
