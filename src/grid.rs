//! The iteration-count grid a run produces, and the checked
//! allocation both variants use for it and for their row buffers.

use crate::errors::{MandelError, Result};
use crate::planes::Viewport;

/// Allocate `cells` zeroed counters, or report that we couldn't.
pub(crate) fn allocate(cells: usize) -> Result<Vec<u32>> {
    let mut buffer: Vec<u32> = Vec::new();
    buffer
        .try_reserve_exact(cells)
        .map_err(|_| MandelError::Allocation(cells))?;
    buffer.resize(cells, 0);
    Ok(buffer)
}

/// A height × width matrix of iteration counts, row-major, row 0 at
/// the bottom of the complex region.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputGrid {
    width: usize,
    height: usize,
    cells: Vec<u32>,
}

impl OutputGrid {
    /// A zeroed grid sized for `viewport`.
    pub fn for_viewport(viewport: &Viewport) -> Result<OutputGrid> {
        let cells = viewport
            .cells()
            .ok_or_else(|| MandelError::Allocation(usize::max_value()))?;
        Ok(OutputGrid {
            width: viewport.width(),
            height: viewport.height(),
            cells: allocate(cells)?,
        })
    }

    /// Columns.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Rows.
    pub fn height(&self) -> usize {
        self.height
    }

    /// The count at column `x`, row `y`.
    pub fn get(&self, x: usize, y: usize) -> u32 {
        self.cells[y * self.width + x]
    }

    /// One row.
    pub fn row(&self, y: usize) -> &[u32] {
        &self.cells[y * self.width..(y + 1) * self.width]
    }

    /// One row, writable.
    pub fn row_mut(&mut self, y: usize) -> &mut [u32] {
        &mut self.cells[y * self.width..(y + 1) * self.width]
    }

    /// Every row, writable, bottom first.
    pub fn rows_mut(&mut self) -> std::slice::ChunksMut<'_, u32> {
        self.cells.chunks_mut(self.width)
    }

    /// All cells, row-major.
    pub fn as_slice(&self) -> &[u32] {
        &self.cells
    }

    /// Give up the grid's storage.
    pub fn into_vec(self) -> Vec<u32> {
        self.cells
    }
}
