//! # Motion vector arrangement library
//!
//! This library turns the sparse motion vectors exported by video codecs into text records.
//! Vectors can either be dumped as they are, or binned into a fixed size grid per frame, with
//! frames lacking their own vectors interpolated from their neighbours.
//!
//! The easiest way to use the library is to import its prelude:
//!
//! ```
//! use mpegflow::prelude::v1::*;
//! ```
//!
//! Frames are pulled from a [`Decoder`](decoder::Decoder) implementation, such as the one in the
//! `av-decoder` crate, and pushed through [`extract::extract`].

pub mod arranged;
pub mod decoder;
pub mod dispatcher;
pub mod extract;
pub mod grid;
pub mod raw;

pub mod prelude {
    pub mod v1 {
        pub use crate::{
            arranged::{ArrangedPipeline, GapFill, MAX_DUMMY_GAP},
            decoder::{Decoder, FrameInfo, MotionVector, MotionVectors, PictType},
            dispatcher::FrameDispatcher,
            extract::{extract, ExtractOptions, OutputMode},
            grid::{FrameGrid, GridStep, Origin, MAX_GRID_SIZE},
            raw::emit_raw,
        };
        pub use anyhow::{anyhow, Error, Result};
    }
}
