//! # Motion vector decoding

use crate::prelude::v1::*;
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Single codec-reported motion vector.
///
/// Both points are in pixel coordinates of the frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MotionVector {
    pub src_x: i16,
    pub src_y: i16,
    pub dst_x: i16,
    pub dst_y: i16,
}

impl MotionVector {
    pub fn new(src_x: i16, src_y: i16, dst_x: i16, dst_y: i16) -> Self {
        Self {
            src_x,
            src_y,
            dst_x,
            dst_y,
        }
    }

    /// Get the `(dx, dy)` displacement from source to destination.
    pub fn motion(&self) -> (i32, i32) {
        (
            self.dst_x as i32 - self.src_x as i32,
            self.dst_y as i32 - self.src_y as i32,
        )
    }

    /// Whether the vector does not move anything.
    pub fn is_zero(&self) -> bool {
        self.motion() == (0, 0)
    }
}

/// Vector of `MotionVector` elements.
pub type MotionVectors = Vec<MotionVector>;

/// Picture type of a decoded frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum PictType {
    I,
    P,
    B,
    S,
    Si,
    Sp,
    Bi,
    Unknown,
}

impl Default for PictType {
    fn default() -> Self {
        Self::Unknown
    }
}

impl PictType {
    /// Single character tag of the picture type.
    ///
    /// Switching and bi-intra types use lowercase letters, unknown types map to `?`.
    pub fn as_char(self) -> char {
        match self {
            Self::I => 'I',
            Self::P => 'P',
            Self::B => 'B',
            Self::S => 'S',
            Self::Si => 'i',
            Self::Sp => 'p',
            Self::Bi => 'b',
            Self::Unknown => '?',
        }
    }
}

impl From<char> for PictType {
    fn from(c: char) -> Self {
        match c {
            'I' => Self::I,
            'P' => Self::P,
            'B' => Self::B,
            'S' => Self::S,
            'i' => Self::Si,
            'p' => Self::Sp,
            'b' => Self::Bi,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for PictType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// Metadata of a single decoded frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameInfo {
    /// Best-effort presentation timestamp, in the stream's timebase.
    pub pts: i64,
    pub pict_type: PictType,
    /// Frame width in pixels.
    pub width: usize,
    /// Frame height in pixels.
    pub height: usize,
}

/// Motion vector decoder.
pub trait Decoder {
    /// Process a single frame in the stream.
    ///
    /// This function will decode the next frame and extract its motion vectors into `vectors`,
    /// replacing any previous contents. If a frame was decoded, `Ok(Some(info))` is returned,
    /// even if the frame carried no motion vectors. At the clean end of the stream `Ok(None)` is
    /// returned, and if there is an error while processing, `Err` is returned.
    fn process_frame(&mut self, vectors: &mut MotionVectors) -> Result<Option<FrameInfo>>;

    /// Get dimensions of the stream.
    ///
    /// This will return `Some((width, height))` if the dimensions are known. They may only
    /// become known after the first frame is processed.
    fn get_dimensions(&self) -> Option<(usize, usize)>;
}

impl<T: Decoder + ?Sized> Decoder for Box<T> {
    fn process_frame(&mut self, vectors: &mut MotionVectors) -> Result<Option<FrameInfo>> {
        (**self).process_frame(vectors)
    }

    fn get_dimensions(&self) -> Option<(usize, usize)> {
        (**self).get_dimensions()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn motion_is_destination_minus_source() {
        let mv = MotionVector::new(10, 20, 13, 18);
        assert_eq!(mv.motion(), (3, -2));
        assert!(!mv.is_zero());
        assert!(MotionVector::new(-4, 7, -4, 7).is_zero());
    }

    #[test]
    fn motion_does_not_overflow() {
        let mv = MotionVector::new(i16::MIN, i16::MAX, i16::MAX, i16::MIN);
        assert_eq!(mv.motion(), (65535, -65535));
    }

    #[test]
    fn pict_type_chars() {
        for c in ['I', 'P', 'B', 'S', 'i', 'p', 'b', '?'] {
            assert_eq!(PictType::from(c).as_char(), c);
        }
        assert_eq!(PictType::from('x'), PictType::Unknown);
        assert_eq!(PictType::default().to_string(), "?");
    }
}
