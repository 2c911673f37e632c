//! # Raw motion vector output

use crate::prelude::v1::*;
use std::io::Write;

/// Write every moving vector of a frame, unbinned.
///
/// The header counts all vectors of the frame, but rows are only written for the ones with
/// non-zero displacement. Each row is `dst_x dst_y dx dy`, tab separated.
pub fn emit_raw(
    out: &mut impl Write,
    frame_index: i64,
    info: &FrameInfo,
    vectors: &[MotionVector],
) -> Result<()> {
    writeln!(
        out,
        "# pts={} frame_index={} pict_type={} output_type=raw shape={}x4",
        info.pts,
        frame_index,
        info.pict_type,
        vectors.len()
    )?;

    for mv in vectors.iter().filter(|mv| !mv.is_zero()) {
        let (dx, dy) = mv.motion();
        writeln!(out, "{}\t{}\t{}\t{}", mv.dst_x, mv.dst_y, dx, dy)?;
    }

    Ok(())
}
