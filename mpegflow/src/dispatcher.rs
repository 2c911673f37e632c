//! # Frame dispatching

use crate::prelude::v1::*;
use log::*;
use std::io::Write;

enum Output {
    Raw,
    Arranged(ArrangedPipeline),
}

/// Numbers frames, drops repeated timestamps and routes frames to the selected output.
pub struct FrameDispatcher {
    output: Output,
    frame_index: i64,
    prev_pts: Option<i64>,
    last: Option<FrameInfo>,
    quiet: bool,
}

impl FrameDispatcher {
    /// Create a dispatcher writing raw vectors.
    pub fn raw() -> Self {
        Self::new(Output::Raw)
    }

    /// Create a dispatcher writing arranged grids.
    pub fn arranged(pipeline: ArrangedPipeline) -> Self {
        Self::new(Output::Arranged(pipeline))
    }

    fn new(output: Output) -> Self {
        Self {
            output,
            frame_index: 0,
            prev_pts: None,
            last: None,
            quiet: false,
        }
    }

    /// Stop warning about dropped frames.
    pub fn with_quiet(self, quiet: bool) -> Self {
        Self { quiet, ..self }
    }

    /// Number of frames received so far, dropped ones included.
    pub fn frame_count(&self) -> i64 {
        self.frame_index
    }

    /// Accept a decoded frame.
    ///
    /// Frames with a timestamp not greater than the last accepted one are dropped, with a warning
    /// unless quiet. Returns whether the frame was forwarded.
    pub fn on_frame(
        &mut self,
        out: &mut impl Write,
        info: &FrameInfo,
        vectors: &[MotionVector],
    ) -> Result<bool> {
        self.frame_index += 1;

        if let Some(prev_pts) = self.prev_pts {
            if info.pts <= prev_pts {
                if self.quiet {
                    return Ok(false);
                }
                warn!(
                    "Skipping frame {} (frame with pts {} already processed).",
                    self.frame_index, info.pts
                );
                return Ok(false);
            }
        }

        match &mut self.output {
            Output::Raw => emit_raw(out, self.frame_index, info, vectors)?,
            Output::Arranged(pipeline) => {
                pipeline.emit_arranged(out, self.frame_index, info, vectors)?
            }
        }

        self.prev_pts = Some(info.pts);
        self.last = Some(*info);

        Ok(true)
    }

    /// Signal the end of the stream.
    ///
    /// Arranged output writes out any frames it still holds. Raw output has nothing to do.
    pub fn on_end_of_stream(&mut self, out: &mut impl Write) -> Result<()> {
        if let Output::Arranged(pipeline) = &mut self.output {
            if let Some(last) = &self.last {
                debug!(
                    "End of stream after pts={} pict_type={} ({} frames)",
                    last.pts, last.pict_type, self.frame_index
                );
            }
            pipeline.flush(out)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arranged::tests::parse;
    use log::{set_logger, set_max_level, Level, LevelFilter, Log, Metadata, Record};
    use std::sync::{Mutex, Once};

    /// Logger keeping every warning in memory.
    struct Capture(Mutex<Vec<String>>);

    impl Log for Capture {
        fn enabled(&self, metadata: &Metadata) -> bool {
            metadata.level() <= Level::Warn
        }

        fn log(&self, record: &Record) {
            if self.enabled(record.metadata()) {
                self.0.lock().unwrap().push(record.args().to_string());
            }
        }

        fn flush(&self) {}
    }

    static CAPTURE: Capture = Capture(Mutex::new(vec![]));
    static INIT: Once = Once::new();

    /// Warnings logged so far that mention `needle`.
    ///
    /// Tests run in parallel, so each one looks for its own timestamps.
    fn warnings(needle: &str) -> Vec<String> {
        INIT.call_once(|| {
            set_logger(&CAPTURE).unwrap();
            set_max_level(LevelFilter::Warn);
        });
        CAPTURE
            .0
            .lock()
            .unwrap()
            .iter()
            .filter(|w| w.contains(needle))
            .cloned()
            .collect()
    }

    fn info(pts: i64) -> FrameInfo {
        FrameInfo {
            pts,
            pict_type: PictType::I,
            width: 32,
            height: 32,
        }
    }

    #[test]
    fn duplicate_pts_is_dropped() {
        let mut d = FrameDispatcher::arranged(ArrangedPipeline::new(GridStep::Coarse, false));
        let mut out = vec![];
        let mvs = [MotionVector::new(0, 0, 1, 1)];

        assert!(d.on_frame(&mut out, &info(7), &mvs).unwrap());
        assert!(!d.on_frame(&mut out, &info(7), &mvs).unwrap());
        d.on_end_of_stream(&mut out).unwrap();

        let records = parse(&out);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].frame_index, 1);
        assert_eq!(d.frame_count(), 2);
    }

    #[test]
    fn dropped_frame_is_reported() {
        warnings("");
        let mut d = FrameDispatcher::raw();
        let mut out = vec![];

        d.on_frame(&mut out, &info(4711), &[]).unwrap();
        d.on_frame(&mut out, &info(4711), &[]).unwrap();

        assert_eq!(
            warnings("pts 4711 "),
            ["Skipping frame 2 (frame with pts 4711 already processed)."]
        );
    }

    #[test]
    fn quiet_dispatcher_drops_silently() {
        warnings("");
        let mut d = FrameDispatcher::raw().with_quiet(true);
        let mut out = vec![];

        assert!(d.on_frame(&mut out, &info(4712), &[]).unwrap());
        assert!(!d.on_frame(&mut out, &info(4712), &[]).unwrap());

        assert_eq!(d.frame_count(), 2);
        assert!(warnings("pts 4712 ").is_empty());
    }

    #[test]
    fn unset_first_pts_does_not_overflow() {
        let mut d = FrameDispatcher::arranged(ArrangedPipeline::new(GridStep::Coarse, false));
        let mut out = vec![];
        let mvs = [MotionVector::new(0, 0, 1, 1)];

        d.on_frame(&mut out, &info(i64::MIN), &mvs).unwrap();
        d.on_frame(&mut out, &info(1), &mvs).unwrap();
        d.on_end_of_stream(&mut out).unwrap();

        let pts = parse(&out).iter().map(|r| r.pts).collect::<Vec<_>>();
        assert_eq!(pts, [0, i64::MIN + 1]);
    }

    #[test]
    fn frame_index_counts_dropped_frames() {
        let mut d = FrameDispatcher::raw();
        let mut out = vec![];

        for pts in [3, 1, 3, 4] {
            d.on_frame(&mut out, &info(pts), &[]).unwrap();
        }

        let out = String::from_utf8(out).unwrap();
        let headers = out.lines().collect::<Vec<_>>();
        assert_eq!(
            headers,
            [
                "# pts=3 frame_index=1 pict_type=I output_type=raw shape=0x4",
                "# pts=4 frame_index=4 pict_type=I output_type=raw shape=0x4",
            ]
        );
    }

    #[test]
    fn negative_first_pts_is_accepted() {
        let mut d = FrameDispatcher::raw();
        let mut out = vec![];

        assert!(d.on_frame(&mut out, &info(-1), &[]).unwrap());
        assert!(d.on_frame(&mut out, &info(0), &[]).unwrap());
        assert!(!d.on_frame(&mut out, &info(-1), &[]).unwrap());
    }

    #[test]
    fn raw_end_of_stream_writes_nothing() {
        let mut d = FrameDispatcher::raw();
        let mut out = vec![];
        d.on_end_of_stream(&mut out).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn arranged_end_of_stream_flushes() {
        let mut d = FrameDispatcher::arranged(ArrangedPipeline::new(GridStep::Coarse, false));
        let mut out = vec![];

        d.on_frame(&mut out, &info(0), &[]).unwrap();
        assert!(out.is_empty());
        d.on_end_of_stream(&mut out).unwrap();
        assert_eq!(parse(&out).len(), 1);
    }
}
