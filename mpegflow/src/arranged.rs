//! # Arranged motion output
//!
//! Frames are binned into fixed size grids and written out in stream order. Frames arriving
//! without motion vectors (typically I frames, or B frames on some codecs) are held back until
//! the next frame with vectors arrives. If exactly one such frame sits between two frames with
//! motion, its grid is set to the average of both.

use crate::prelude::v1::*;
use log::*;
use std::io::Write;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Policy for timestamp gaps between consecutive frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum GapFill {
    /// Leave gaps as they are.
    Disabled,
    /// Insert an empty dummy grid for every missing timestamp.
    ///
    /// This assumes timestamps count frames, and the grids take part in interpolation the same
    /// way frames without vectors do. Gaps wider than [`MAX_DUMMY_GAP`] timestamps are left
    /// unfilled.
    Dummy,
}

impl Default for GapFill {
    fn default() -> Self {
        Self::Disabled
    }
}

/// Most dummy grids inserted for a single timestamp gap.
pub const MAX_DUMMY_GAP: i64 = 64;

/// Grid binning and temporal interpolation pipeline.
pub struct ArrangedPipeline {
    grid_step: GridStep,
    occupancy: bool,
    gap_fill: GapFill,
    /// Fixed after the first frame.
    shape: Option<(usize, usize)>,
    /// Timestamp of the first written grid. All output is relative to it.
    first_pts: Option<i64>,
    prev: Vec<FrameGrid>,
}

impl ArrangedPipeline {
    /// Create a new pipeline.
    ///
    /// # Arguments
    ///
    /// * `grid_step` - cell size of the grids.
    /// * `occupancy` - write occupancy matrices after the motion.
    pub fn new(grid_step: GridStep, occupancy: bool) -> Self {
        Self {
            grid_step,
            occupancy,
            gap_fill: GapFill::Disabled,
            shape: None,
            first_pts: None,
            prev: vec![],
        }
    }

    pub fn with_gap_fill(self, gap_fill: GapFill) -> Self {
        Self { gap_fill, ..self }
    }

    /// Get `(rows, cols)` of the grids, if any frame has been received.
    pub fn shape(&self) -> Option<(usize, usize)> {
        self.shape
    }

    /// Number of grids waiting to be written.
    pub fn buffered(&self) -> usize {
        self.prev.iter().filter(|g| !g.printed).count()
    }

    /// Accept a decoded frame.
    ///
    /// # Arguments
    ///
    /// * `out` - output sink.
    /// * `frame_index` - 1-based position of the frame in decode order.
    /// * `info` - frame metadata.
    /// * `vectors` - motion vectors of the frame.
    pub fn emit_arranged(
        &mut self,
        out: &mut impl Write,
        frame_index: i64,
        info: &FrameInfo,
        vectors: &[MotionVector],
    ) -> Result<()> {
        let grid_step = self.grid_step;
        let shape = *self
            .shape
            .get_or_insert_with(|| grid_step.shape(info.width, info.height));

        if self.gap_fill == GapFill::Dummy {
            self.fill_gap(info.pts, shape);
        }

        let mut cur = FrameGrid {
            pts: info.pts,
            frame_index,
            pict_type: info.pict_type,
            ..FrameGrid::new(grid_step, shape)
        };

        cur.add_vectors(vectors);

        if grid_step == GridStep::Fine {
            cur.fill_missing_vectors();
        }

        if vectors.is_empty() {
            trace!("Holding back frame {} ({} buffered)", frame_index, self.prev.len());
            self.prev.push(cur);
            return Ok(());
        }

        if matches!(&self.prev[..], [first, _] if !first.empty) {
            let (first, rest) = self.prev.split_at_mut(1);
            let middle = &mut rest[0];
            debug!("Interpolating frame {}", middle.frame_index);
            middle.interpolate_from(&first[0], &cur);
            print(out, &mut self.first_pts, self.occupancy, middle)?;
        } else {
            self.print_buffered(out)?;
        }

        self.prev.clear();
        print(out, &mut self.first_pts, self.occupancy, &mut cur)?;
        self.prev.push(cur);

        Ok(())
    }

    /// Signal the end of the stream and write out any buffered grids.
    pub fn flush(&mut self, out: &mut impl Write) -> Result<()> {
        self.print_buffered(out)?;
        self.prev.clear();
        Ok(())
    }

    fn print_buffered(&mut self, out: &mut impl Write) -> Result<()> {
        for grid in &mut self.prev {
            print(out, &mut self.first_pts, self.occupancy, grid)?;
        }
        Ok(())
    }

    fn fill_gap(&mut self, pts: i64, shape: (usize, usize)) {
        let last_pts = match self.prev.last() {
            Some(last) => last.pts,
            None => return,
        };

        let missing = pts.saturating_sub(last_pts).saturating_sub(1);
        if missing > MAX_DUMMY_GAP {
            debug!("Not filling gap of {} timestamps after {}", missing, last_pts);
            return;
        }

        for dummy_pts in last_pts.saturating_add(1)..pts {
            trace!("Inserting dummy grid at {}", dummy_pts);
            self.prev
                .push(FrameGrid::dummy(self.grid_step, shape, dummy_pts));
        }
    }
}

fn print(
    out: &mut impl Write,
    first_pts: &mut Option<i64>,
    occupancy: bool,
    grid: &mut FrameGrid,
) -> Result<()> {
    if grid.printed {
        return Ok(());
    }

    let first_pts = *first_pts.get_or_insert(grid.pts);
    grid.print_if_not_printed(out, first_pts, occupancy)?;

    Ok(())
}
