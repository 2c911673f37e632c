//! FFMPEG's AV Decoder

use ::core::ffi::c_void;
use ::core::ops::{Deref, DerefMut};
use ::core::{mem, ptr, slice};
use c_str_macro::c_str;
use ffmpeg_sys_next::*;
use libc::{c_char, c_int};
use log::*;
use mpegflow::prelude::v1::*;
use std::ffi::CStr;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

/// Get FFMPEG's description of an error code.
pub fn av_error(e: c_int) -> String {
    let mut buf = [0 as c_char; 128];

    if unsafe { av_strerror(e, buf.as_mut_ptr(), buf.len()) } < 0 {
        format!("Unknown error ({})", e)
    } else {
        unsafe { CStr::from_ptr(buf.as_ptr()) }
            .to_string_lossy()
            .into_owned()
    }
}

/// Silence FFMPEG's own log output.
///
/// Only affects messages printed by the libav libraries themselves.
pub fn set_quiet(quiet: bool) {
    let level = if quiet {
        AV_LOG_QUIET as c_int
    } else {
        AV_LOG_INFO as c_int
    };
    unsafe { av_log_set_level(level) };
}

pub struct AvBuf(&'static mut [u8]);

impl AvBuf {
    pub fn try_new(size: usize) -> Result<Self> {
        let buf = unsafe { av_malloc(size) as *mut u8 };

        if buf.is_null() {
            Err(anyhow!("Failed to allocate buffer"))
        } else {
            Ok(Self(unsafe { slice::from_raw_parts_mut(buf, size) }))
        }
    }
}

impl Drop for AvBuf {
    fn drop(&mut self) {
        unsafe { av_free(self.0.as_mut_ptr() as *mut _) }
    }
}

impl Deref for AvBuf {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.0
    }
}

impl DerefMut for AvBuf {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.0
    }
}

/// Demuxer reading from an arbitrary seekable stream.
pub struct AvContext<T> {
    _stream: Box<T>,
    pub fmt_ctx: &'static mut AVFormatContext,
    pub avio_ctx: &'static mut AVIOContext,
}

impl<T> Drop for AvContext<T> {
    fn drop(&mut self) {
        // SAFETY: the references will be dangling,
        // but after the drop nobody will read them.
        unsafe {
            avformat_close_input(&mut (self.fmt_ctx as *mut _));
            free_avio(self.avio_ctx);
        }
    }
}

/// Free a custom AVIO context along with its (possibly reallocated) buffer.
unsafe fn free_avio(avio_ctx: *mut AVIOContext) {
    av_freep(&mut (*avio_ctx).buffer as *mut *mut u8 as *mut c_void);
    avio_context_free(&mut (avio_ctx as *mut _));
}

impl<T: Read + Seek> AvContext<T> {
    pub fn try_new(mut stream: Box<T>) -> Result<Self> {
        let mut buf = AvBuf::try_new(8196)?;

        let avio_ctx = unsafe {
            avio_alloc_context(
                buf.as_mut_ptr(),
                buf.len() as _,
                0,
                (&mut *stream) as *mut T as *mut _,
                Some(Self::read_callback),
                None,
                Some(Self::seek_callback),
            )
            .as_mut()
        }
        .ok_or_else(|| anyhow!("Failed to allocate AVIOContext"))?;

        // The AVIO context owns the buffer from now on.
        mem::forget(buf);

        let fmt_ctx = unsafe { avformat_alloc_context().as_mut() }.ok_or_else(|| {
            unsafe { free_avio(avio_ctx) };
            anyhow!("Failed to allocate AVFormatContext")
        })?;

        fmt_ctx.pb = avio_ctx;

        let mut fmt_ctx = fmt_ctx as *mut AVFormatContext;

        match unsafe {
            avformat_open_input(
                &mut fmt_ctx,
                ptr::null(),
                ptr::null_mut(),
                ptr::null_mut(),
            )
        } {
            0 => Ok(Self {
                _stream: stream,
                // SAFETY: a successful open leaves a valid context behind.
                fmt_ctx: unsafe { &mut *fmt_ctx },
                avio_ctx,
            }),
            e => {
                // A failed open frees the format context, but not custom IO.
                unsafe { free_avio(avio_ctx) };
                Err(anyhow!("Couldn't open input: {}", av_error(e)))
            }
        }
    }

    unsafe extern "C" fn read_callback(
        opaque: *mut c_void,
        buf: *mut u8,
        buf_size: c_int,
    ) -> c_int {
        match (*(opaque as *mut T)).read(slice::from_raw_parts_mut(buf, buf_size as _)) {
            Ok(0) => AVERROR_EOF,
            Ok(r) => {
                trace!("Read {}", r);
                r as c_int
            }
            Err(e) => {
                error!("{}", e);
                AVERROR(libc::EIO)
            }
        }
    }

    unsafe extern "C" fn seek_callback(opaque: *mut c_void, offset: i64, whence: c_int) -> i64 {
        let stream = &mut *(opaque as *mut T);

        let pos = match whence & !(AVSEEK_FORCE as c_int) {
            w if w == AVSEEK_SIZE as c_int => {
                return stream_len(stream).map(|l| l as i64).unwrap_or_else(|e| {
                    error!("{}", e);
                    -1
                })
            }
            libc::SEEK_SET => SeekFrom::Start(offset as u64),
            libc::SEEK_CUR => SeekFrom::Current(offset),
            libc::SEEK_END => SeekFrom::End(offset),
            w => {
                warn!("Unsupported seek mode {}", w);
                return -1;
            }
        };

        stream.seek(pos).map(|p| p as i64).unwrap_or_else(|e| {
            error!("{}", e);
            -1
        })
    }
}

fn stream_len(stream: &mut impl Seek) -> std::io::Result<u64> {
    let cur = stream.stream_position()?;
    let len = stream.seek(SeekFrom::End(0))?;
    if cur != len {
        stream.seek(SeekFrom::Start(cur))?;
    }
    Ok(len)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DecodeState {
    /// Decoder wants another packet.
    NeedPacket,
    /// Decoder may hold frames of the last packet.
    Receiving,
    /// Demuxer is done, remaining frames are being pulled out.
    Draining,
    Finished,
}

/// Motion vector decoder built on libavcodec.
pub struct AvDecoder<T> {
    pub av_ctx: AvContext<T>,
    codec_ctx: &'static mut AVCodecContext,
    av_frame: &'static mut AVFrame,
    packet: &'static mut AVPacket,
    stream_idx: i32,
    dimensions: Option<(usize, usize)>,
    state: DecodeState,
}

impl<T> Drop for AvDecoder<T> {
    fn drop(&mut self) {
        // SAFETY: the references will be dangling,
        // but after the drop nobody will read them.
        unsafe {
            av_packet_free(&mut (self.packet as *mut _));
            av_frame_free(&mut (self.av_frame as *mut _));
            avcodec_free_context(&mut (self.codec_ctx as *mut _));
        };
    }
}

enum Received<'a> {
    Frame(RefFrame<'a>),
    Again,
    Eof,
}

struct RefFrame<'a> {
    frame: &'a mut AVFrame,
}

impl<'a> Drop for RefFrame<'a> {
    fn drop(&mut self) {
        unsafe { av_frame_unref(self.frame) };
    }
}

impl<'a> RefFrame<'a> {
    fn receive(codec_ctx: &mut AVCodecContext, frame: &'a mut AVFrame) -> Result<Received<'a>> {
        match unsafe { avcodec_receive_frame(codec_ctx, frame) } {
            e if e == AVERROR(libc::EAGAIN) => Ok(Received::Again),
            AVERROR_EOF => Ok(Received::Eof),
            e if e < 0 => Err(anyhow!("Failed to receive frame: {}", av_error(e))),
            _ => Ok(Received::Frame(Self { frame })),
        }
    }
}

impl<'a> Deref for RefFrame<'a> {
    type Target = AVFrame;

    fn deref(&self) -> &Self::Target {
        self.frame
    }
}

impl<'a> DerefMut for RefFrame<'a> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.frame
    }
}

/// Map libav picture type to its tag.
pub fn pict_type(t: AVPictureType) -> PictType {
    PictType::from(unsafe { av_get_picture_type_char(t) } as u8 as char)
}

impl AvDecoder<File> {
    /// Open a video file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| anyhow!("Couldn't open {}: {}", path.display(), e))?;
        Self::try_new(Box::new(file))
    }
}

impl<T: Read + Seek> AvDecoder<T> {
    pub fn try_new(stream: Box<T>) -> Result<Self> {
        let mut av_ctx = AvContext::try_new(stream)?;

        match unsafe { avformat_find_stream_info(av_ctx.fmt_ctx, ptr::null_mut()) } {
            e if e < 0 => {
                return Err(anyhow!("Stream information not found: {}", av_error(e)));
            }
            _ => {}
        }

        let streams = unsafe {
            slice::from_raw_parts(av_ctx.fmt_ctx.streams, av_ctx.fmt_ctx.nb_streams as usize)
        };

        let (stream_idx, stream) = streams
            .iter()
            .enumerate()
            .filter_map(|(i, &s)| Some((i, unsafe { s.as_ref() }?)))
            .find(|(_, s)| {
                unsafe { s.codecpar.as_ref() }
                    .map(|p| p.codec_type == AVMediaType::AVMEDIA_TYPE_VIDEO)
                    .unwrap_or(false)
            })
            .ok_or_else(|| anyhow!("Video stream not found"))?;

        debug!("Selected stream {}", stream_idx);

        let decoder = unsafe { avcodec_find_decoder((*stream.codecpar).codec_id).as_ref() }
            .ok_or_else(|| anyhow!("Codec not found"))?;

        let codec_ctx = unsafe { avcodec_alloc_context3(decoder).as_mut() }
            .ok_or_else(|| anyhow!("Failed to allocate codec context"))?;

        match unsafe { avcodec_parameters_to_context(codec_ctx, stream.codecpar) } {
            e if e < 0 => {
                unsafe { avcodec_free_context(&mut (codec_ctx as *mut _)) };
                return Err(anyhow!("Failed to get codec parameters: {}", av_error(e)));
            }
            _ => {}
        }

        codec_ctx.pkt_timebase = stream.time_base;

        let mut av_opts: *mut AVDictionary = ptr::null_mut();

        let ret = unsafe {
            av_dict_set(
                &mut av_opts,
                c_str!("flags2").as_ptr(),
                c_str!("+export_mvs").as_ptr(),
                0,
            );
            let ret = avcodec_open2(codec_ctx, decoder, &mut av_opts);
            av_dict_free(&mut av_opts);
            ret
        };

        if ret < 0 {
            unsafe { avcodec_free_context(&mut (codec_ctx as *mut _)) };
            return Err(anyhow!("Cannot open codec: {}", av_error(ret)));
        }

        let av_frame = unsafe { av_frame_alloc().as_mut() }.ok_or_else(|| {
            unsafe { avcodec_free_context(&mut (codec_ctx as *mut _)) };
            anyhow!("Unable to allocate frame")
        })?;

        let packet = unsafe { av_packet_alloc().as_mut() }.ok_or_else(|| {
            unsafe {
                av_frame_free(&mut (av_frame as *mut _));
                avcodec_free_context(&mut (codec_ctx as *mut _));
            }
            anyhow!("Unable to allocate packet")
        })?;

        let dimensions = match (codec_ctx.width, codec_ctx.height) {
            (w, h) if w > 0 && h > 0 => Some((w as usize, h as usize)),
            _ => None,
        };

        Ok(Self {
            av_ctx,
            codec_ctx,
            av_frame,
            packet,
            stream_idx: stream_idx as i32,
            dimensions,
            state: DecodeState::NeedPacket,
        })
    }

    /// Read the next packet and feed it to the decoder if it belongs to the video stream.
    ///
    /// At the end of the input, the decoder is switched to draining mode.
    fn read_packet(&mut self) -> Result<()> {
        match unsafe { av_read_frame(self.av_ctx.fmt_ctx, self.packet) } {
            AVERROR_EOF => {
                debug!("End of input, draining decoder");
                match unsafe { avcodec_send_packet(self.codec_ctx, ptr::null()) } {
                    e if e < 0 && e != AVERROR_EOF => {
                        Err(anyhow!("Failed to drain decoder: {}", av_error(e)))
                    }
                    _ => {
                        self.state = DecodeState::Draining;
                        Ok(())
                    }
                }
            }
            e if e < 0 => Err(anyhow!("Failed to read frame: {}", av_error(e))),
            _ => {
                trace!(
                    "Read packet: {} {}",
                    self.packet.stream_index,
                    self.packet.size
                );

                let ret = if self.packet.stream_index == self.stream_idx {
                    unsafe { avcodec_send_packet(self.codec_ctx, self.packet) }
                } else {
                    0
                };

                let wanted = self.packet.stream_index == self.stream_idx;

                unsafe { av_packet_unref(self.packet) };

                if ret < 0 {
                    Err(anyhow!("Failed to send packet: {}", av_error(ret)))
                } else {
                    if wanted {
                        self.state = DecodeState::Receiving;
                    }
                    Ok(())
                }
            }
        }
    }
}

impl<T: Read + Seek> Decoder for AvDecoder<T> {
    fn process_frame(&mut self, vectors: &mut MotionVectors) -> Result<Option<FrameInfo>> {
        loop {
            match self.state {
                DecodeState::Finished => return Ok(None),
                DecodeState::NeedPacket => self.read_packet()?,
                DecodeState::Receiving | DecodeState::Draining => {
                    match RefFrame::receive(self.codec_ctx, self.av_frame)? {
                        Received::Frame(frame) => {
                            let info = FrameInfo {
                                pts: frame.best_effort_timestamp,
                                pict_type: pict_type(frame.pict_type),
                                width: frame.width as usize,
                                height: frame.height as usize,
                            };

                            copy_motion_vectors(&frame, vectors);

                            trace!("Frame {:?} with {} vectors", info, vectors.len());

                            self.dimensions = Some((info.width, info.height));

                            return Ok(Some(info));
                        }
                        Received::Again if self.state == DecodeState::Receiving => {
                            self.state = DecodeState::NeedPacket
                        }
                        Received::Again | Received::Eof => self.state = DecodeState::Finished,
                    }
                }
            }
        }
    }

    fn get_dimensions(&self) -> Option<(usize, usize)> {
        self.dimensions
    }
}

/// Replace `vectors` with the motion vectors exported in frame's side data.
fn copy_motion_vectors(frame: &AVFrame, vectors: &mut MotionVectors) {
    vectors.clear();

    let side_data = unsafe {
        av_frame_get_side_data(frame, AVFrameSideDataType::AV_FRAME_DATA_MOTION_VECTORS).as_ref()
    };

    match side_data {
        Some(side_data) if !side_data.data.is_null() => {
            let size = side_data.size as usize / mem::size_of::<AVMotionVector>();
            let motion_vectors =
                unsafe { slice::from_raw_parts(side_data.data as *const AVMotionVector, size) };

            vectors.extend(
                motion_vectors
                    .iter()
                    .map(|mv| MotionVector::new(mv.src_x, mv.src_y, mv.dst_x, mv.dst_y)),
            );
        }
        _ => trace!("No motion vectors"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    type Ctx = AvContext<Cursor<Vec<u8>>>;

    #[test]
    fn read_callback_signals_eof() {
        let mut stream = Cursor::new(vec![1u8, 2, 3, 4, 5]);
        let opaque = &mut stream as *mut _ as *mut c_void;
        let mut buf = [0u8; 4];

        let r = unsafe { Ctx::read_callback(opaque, buf.as_mut_ptr(), 4) };
        assert_eq!(r, 4);
        assert_eq!(buf, [1, 2, 3, 4]);

        let r = unsafe { Ctx::read_callback(opaque, buf.as_mut_ptr(), 4) };
        assert_eq!(r, 1);
        assert_eq!(buf[0], 5);

        let r = unsafe { Ctx::read_callback(opaque, buf.as_mut_ptr(), 4) };
        assert_eq!(r, AVERROR_EOF);
    }

    #[test]
    fn seek_callback_modes() {
        let mut stream = Cursor::new(vec![0u8; 100]);
        let opaque = &mut stream as *mut _ as *mut c_void;

        unsafe {
            assert_eq!(Ctx::seek_callback(opaque, 10, libc::SEEK_SET), 10);
            assert_eq!(Ctx::seek_callback(opaque, 5, libc::SEEK_CUR), 15);
            assert_eq!(Ctx::seek_callback(opaque, 0, AVSEEK_SIZE as c_int), 100);
            assert_eq!(Ctx::seek_callback(opaque, -20, libc::SEEK_END), 80);
            assert_eq!(
                Ctx::seek_callback(opaque, 3, libc::SEEK_SET | AVSEEK_FORCE as c_int),
                3
            );
        }

        assert_eq!(stream.position(), 3);
    }

    #[test]
    fn size_query_keeps_position() {
        let mut stream = Cursor::new(vec![0u8; 64]);
        stream.set_position(12);
        assert_eq!(stream_len(&mut stream).unwrap(), 64);
        assert_eq!(stream.position(), 12);
    }

    #[test]
    fn picture_types() {
        assert_eq!(pict_type(AVPictureType::AV_PICTURE_TYPE_I), PictType::I);
        assert_eq!(pict_type(AVPictureType::AV_PICTURE_TYPE_P), PictType::P);
        assert_eq!(pict_type(AVPictureType::AV_PICTURE_TYPE_B), PictType::B);
        assert_eq!(pict_type(AVPictureType::AV_PICTURE_TYPE_BI), PictType::Bi);
        assert_eq!(pict_type(AVPictureType::AV_PICTURE_TYPE_NONE), PictType::Unknown);
    }

    #[test]
    fn garbage_input_is_rejected() {
        let stream = Box::new(Cursor::new(vec![0u8; 256]));
        assert!(AvDecoder::try_new(stream).is_err());
    }

    #[test]
    fn missing_file_is_reported() {
        let err = AvDecoder::open("/nonexistent/video.mp4").err().unwrap();
        assert!(err.to_string().starts_with("Couldn't open /nonexistent/video.mp4"));
    }
}
