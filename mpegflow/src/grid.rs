//! # Fixed size motion grid

use crate::prelude::v1::*;
use nalgebra::{DMatrix, Scalar};
use std::fmt;
use std::io::Write;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Upper bound of grid rows and columns.
pub const MAX_GRID_SIZE: usize = 512;

/// Occupancy of a cell without any motion.
pub const CELL_EMPTY: u8 = 0;
/// Occupancy of a cell written from a codec motion vector.
pub const CELL_DIRECT: u8 = 1;
/// Occupancy of a cell filled in from its neighbours.
pub const CELL_FILLED: u8 = 2;

/// Side of a square grid cell, in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum GridStep {
    /// 8x8 pixel cells.
    Fine,
    /// 16x16 pixel cells.
    Coarse,
}

impl Default for GridStep {
    fn default() -> Self {
        Self::Coarse
    }
}

impl GridStep {
    pub fn pixels(self) -> usize {
        match self {
            Self::Fine => 8,
            Self::Coarse => 16,
        }
    }

    /// Compute `(rows, cols)` of the grid for a frame of given pixel size.
    pub fn shape(self, width: usize, height: usize) -> (usize, usize) {
        let step = self.pixels();
        (
            std::cmp::min(height / step, MAX_GRID_SIZE),
            std::cmp::min(width / step, MAX_GRID_SIZE),
        )
    }
}

/// Where the motion of a grid came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Origin {
    /// Binned from decoder motion vectors.
    Video,
    /// Averaged from the surrounding frames.
    Interpolated,
    /// Synthetic filler for a timestamp gap.
    Dummy,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::Video => "video",
            Self::Interpolated => "interpolated",
            Self::Dummy => "dummy",
        })
    }
}

/// Dense grid of motion for a single frame.
#[derive(Clone, Debug)]
pub struct FrameGrid {
    pub pts: i64,
    /// 1-based decode position. `-1` for synthetic grids.
    pub frame_index: i64,
    pub pict_type: PictType,
    pub grid_step: GridStep,
    pub dx: DMatrix<i32>,
    pub dy: DMatrix<i32>,
    pub occupancy: DMatrix<u8>,
    /// No motion has been written into the grid yet.
    pub empty: bool,
    pub printed: bool,
    pub origin: Origin,
}

impl FrameGrid {
    /// Create a new zeroed grid.
    ///
    /// # Arguments
    ///
    /// * `grid_step` - cell size of the grid.
    /// * `shape` - `(rows, cols)` of the grid.
    pub fn new(grid_step: GridStep, (rows, cols): (usize, usize)) -> Self {
        Self {
            pts: -1,
            frame_index: -1,
            pict_type: PictType::Unknown,
            grid_step,
            dx: DMatrix::zeros(rows, cols),
            dy: DMatrix::zeros(rows, cols),
            occupancy: DMatrix::zeros(rows, cols),
            empty: true,
            printed: false,
            origin: Origin::Video,
        }
    }

    /// Create a placeholder grid for a missing timestamp.
    pub fn dummy(grid_step: GridStep, shape: (usize, usize), pts: i64) -> Self {
        Self {
            pts,
            origin: Origin::Dummy,
            ..Self::new(grid_step, shape)
        }
    }

    /// Get `(rows, cols)` of the grid.
    pub fn shape(&self) -> (usize, usize) {
        self.dx.shape()
    }

    /// Get the cell a pixel position falls into, clamped to the grid.
    pub fn cell_of(&self, x: i32, y: i32) -> (usize, usize) {
        let (rows, cols) = self.shape();
        let step = self.grid_step.pixels() as i32;
        let clamp = |v: i32, n: usize| (v / step).clamp(0, n.saturating_sub(1) as i32) as usize;
        (clamp(y, rows), clamp(x, cols))
    }

    /// Bin motion vectors into the grid.
    ///
    /// Each vector is written to the cell containing its destination point. When several vectors
    /// land in the same cell, the last one wins.
    pub fn add_vectors(&mut self, vectors: &[MotionVector]) {
        let (rows, cols) = self.shape();

        if rows == 0 || cols == 0 {
            self.empty &= vectors.is_empty();
            return;
        }

        for mv in vectors {
            let cell = self.cell_of(mv.dst_x as i32, mv.dst_y as i32);
            let (dx, dy) = mv.motion();
            self.dx[cell] = dx;
            self.dy[cell] = dy;
            self.occupancy[cell] = CELL_DIRECT;
            self.empty = false;
        }
    }

    /// Fill empty interior cells bracketed by occupied neighbours.
    ///
    /// Two sweeps are performed. Within a sweep, a left/right pair takes precedence over a
    /// top/bottom pair, and cells filled earlier act as donors for later ones. Edge cells are
    /// never touched.
    pub fn fill_missing_vectors(&mut self) {
        let (rows, cols) = self.shape();

        for _ in 0..2 {
            for i in 1..rows.saturating_sub(1) {
                for j in 1..cols.saturating_sub(1) {
                    if self.occupancy[(i, j)] != CELL_EMPTY {
                        continue;
                    }

                    let pair = if self.occupied(i, j - 1) && self.occupied(i, j + 1) {
                        Some(((i, j - 1), (i, j + 1)))
                    } else if self.occupied(i - 1, j) && self.occupied(i + 1, j) {
                        Some(((i - 1, j), (i + 1, j)))
                    } else {
                        None
                    };

                    if let Some((a, b)) = pair {
                        self.dx[(i, j)] = (self.dx[a] + self.dx[b]) / 2;
                        self.dy[(i, j)] = (self.dy[a] + self.dy[b]) / 2;
                        self.occupancy[(i, j)] = CELL_FILLED;
                    }
                }
            }
        }
    }

    fn occupied(&self, i: usize, j: usize) -> bool {
        self.occupancy[(i, j)] != CELL_EMPTY
    }

    /// Set motion to the mean of two surrounding grids.
    ///
    /// Occupancy is left untouched.
    pub fn interpolate_from(&mut self, prev: &FrameGrid, next: &FrameGrid) {
        assert_eq!(prev.shape(), self.shape());
        assert_eq!(next.shape(), self.shape());

        self.dx = prev.dx.zip_map(&next.dx, |a, b| (a + b) / 2);
        self.dy = prev.dy.zip_map(&next.dy, |a, b| (a + b) / 2);
        self.empty = false;
        self.origin = Origin::Interpolated;
    }

    /// Write the grid as a text record, unless it was already written.
    ///
    /// Returns whether anything was written.
    ///
    /// # Arguments
    ///
    /// * `out` - output sink.
    /// * `first_pts` - baseline subtracted from the grid's timestamp, with two's complement wrap.
    /// * `occupancy` - append the occupancy matrix.
    pub fn print_if_not_printed(
        &mut self,
        out: &mut impl Write,
        first_pts: i64,
        occupancy: bool,
    ) -> Result<bool> {
        if self.printed {
            return Ok(false);
        }

        let (rows, cols) = self.shape();
        let blocks = if occupancy { 3 } else { 2 };

        writeln!(
            out,
            "# pts={} frame_index={} pict_type={} output_type=arranged shape={}x{} origin={}",
            self.pts.wrapping_sub(first_pts),
            self.frame_index,
            self.pict_type,
            blocks * rows,
            cols,
            self.origin
        )?;

        write_matrix(out, &self.dx)?;
        write_matrix(out, &self.dy)?;

        if occupancy {
            write_matrix(out, &self.occupancy)?;
        }

        self.printed = true;

        Ok(true)
    }
}

fn write_matrix<T: Scalar + fmt::Display>(out: &mut impl Write, m: &DMatrix<T>) -> Result<()> {
    for row in m.row_iter() {
        for v in row.iter() {
            write!(out, "{:4}", v)?;
        }
        writeln!(out)?;
    }
    Ok(())
}
