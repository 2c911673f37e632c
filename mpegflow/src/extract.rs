//! # Motion vector extraction

use crate::prelude::v1::*;
use log::*;
use std::io::Write;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Output format.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum OutputMode {
    /// Every moving vector, unbinned.
    Raw,
    /// Dense per-frame grids.
    Arranged,
}

impl Default for OutputMode {
    fn default() -> Self {
        Self::Arranged
    }
}

/// Extraction settings.
///
/// Grid settings only apply to arranged output.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ExtractOptions {
    pub mode: OutputMode,
    pub grid_step: GridStep,
    /// Append occupancy matrices to arranged grids.
    pub occupancy: bool,
    pub gap_fill: GapFill,
    /// Silence decoder diagnostics and frame warnings.
    pub quiet: bool,
}

impl ExtractOptions {
    /// Build a dispatcher for these settings.
    pub fn dispatcher(&self) -> FrameDispatcher {
        let dispatcher = match self.mode {
            OutputMode::Raw => FrameDispatcher::raw(),
            OutputMode::Arranged => FrameDispatcher::arranged(
                ArrangedPipeline::new(self.grid_step, self.occupancy).with_gap_fill(self.gap_fill),
            ),
        };
        dispatcher.with_quiet(self.quiet)
    }
}

/// Decode the whole stream and write its motion to `out`.
///
/// Buffered frames are only written out if the decoder reaches a clean end of stream. Decoder
/// errors are returned as they are.
pub fn extract<D: Decoder + ?Sized>(
    decoder: &mut D,
    options: &ExtractOptions,
    out: &mut impl Write,
) -> Result<()> {
    let mut dispatcher = options.dispatcher();
    let mut vectors = vec![];

    while let Some(info) = decoder.process_frame(&mut vectors)? {
        trace!("Frame pts={} with {} vectors", info.pts, vectors.len());
        dispatcher.on_frame(out, &info, &vectors)?;
    }

    debug!(
        "Decoded {} frames of {:?}",
        dispatcher.frame_count(),
        decoder.get_dimensions()
    );

    dispatcher.on_end_of_stream(out)?;
    out.flush()?;

    Ok(())
}
