// crates/playcut-engine/src/decode.rs
//
// VideoDecoder: a sample-fed decoder wrapper around FFmpeg, configured from
// the demuxed track descriptor rather than a file. The scheduler feeds it
// encoded samples; decoded frames come out through a generation-tagged
// queue the tick loop drains into the source's FrameBuffer.
//
// Contract: the first sample after configure(), flush() or reset() must be
// a keyframe — feeding anything else fails with BadSequence and decodes
// nothing. Every accepted sample eventually yields exactly one frame,
// possibly out of presentation order (B-frames); the FrameBuffer re-sorts.

use std::collections::VecDeque;
use std::sync::Arc;

use ffmpeg_the_third as ffmpeg;
use ffmpeg::format::Pixel;
use ffmpeg::software::scaling::{context::Context as SwsContext, flag::Flags};

use playcut_core::frame::RgbaFrame;

use crate::demux::{VideoCodec, VideoTrackInfo};
use crate::error::{EngineError, Result};
use crate::sample_table::VideoSample;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecoderState {
    Unconfigured,
    Configured,
    /// A runtime decode error occurred; the scheduler must reset() and
    /// restart from a keyframe before feeding more samples.
    NeedsReset,
    Closed,
}

/// One decoded frame waiting to be drained into a FrameBuffer.
pub struct DecodedFrame {
    pub handle:       playcut_core::frame::FrameHandle,
    pub timestamp_us: i64,
    /// Seek generation the producing decode was issued under. Stale frames
    /// are dropped (closed) at drain time.
    pub generation:   u64,
}

pub struct VideoDecoder {
    state:          DecoderState,
    inner:          Option<ffmpeg::decoder::video::Video>,
    scaler:         Option<SwsContext>,
    info:           Option<VideoTrackInfo>,
    needs_keyframe: bool,
    sent:           usize,
    received:       usize,
    out:            VecDeque<DecodedFrame>,
}

impl VideoDecoder {
    pub fn new() -> Self {
        Self {
            state:          DecoderState::Unconfigured,
            inner:          None,
            scaler:         None,
            info:           None,
            needs_keyframe: true,
            sent:           0,
            received:       0,
            out:            VecDeque::new(),
        }
    }

    #[inline]
    pub fn state(&self) -> DecoderState {
        self.state
    }

    /// Samples sent but not yet surfaced as frames. The scheduler's
    /// backpressure check — queue overflow is its concern, not ours.
    #[inline]
    pub fn pending_decode_count(&self) -> usize {
        self.sent.saturating_sub(self.received)
    }

    /// Build (or rebuild) the FFmpeg decoder from the track descriptor.
    /// Codec-private data (avcC/hvcC body) is installed as extradata.
    pub fn configure(&mut self, info: &VideoTrackInfo) -> Result<()> {
        let codec_id = match info.codec {
            VideoCodec::H264 => ffmpeg::codec::Id::H264,
            VideoCodec::H265 => ffmpeg::codec::Id::HEVC,
            VideoCodec::Vp9  => ffmpeg::codec::Id::VP9,
        };
        let codec = ffmpeg::decoder::find(codec_id)
            .ok_or_else(|| EngineError::UnsupportedCodec(info.codec.name().into()))?;

        let mut ctx = ffmpeg::codec::context::Context::new_with_codec(codec);
        unsafe {
            let raw = ctx.as_mut_ptr();
            (*raw).width = info.width as i32;
            (*raw).height = info.height as i32;
            if let Some(private) = &info.codec_private {
                // FFmpeg owns extradata and frees it with the context; it must
                // be av_malloc'd with the mandated zero padding.
                let extra = ffmpeg::ffi::av_mallocz(
                    private.len() + ffmpeg::ffi::AV_INPUT_BUFFER_PADDING_SIZE as usize,
                ) as *mut u8;
                std::ptr::copy_nonoverlapping(private.as_ptr(), extra, private.len());
                (*raw).extradata = extra;
                (*raw).extradata_size = private.len() as i32;
            }
        }

        let decoder = ctx
            .decoder()
            .video()
            .map_err(|e| EngineError::UnsupportedCodec(format!("{}: {e}", info.codec.name())))?;

        self.inner = Some(decoder);
        self.scaler = None;
        self.info = Some(info.clone());
        self.state = DecoderState::Configured;
        self.needs_keyframe = true;
        self.sent = 0;
        self.received = 0;
        self.out.clear();
        Ok(())
    }

    /// Enqueue one encoded sample. Decoded output (0..n frames — FFmpeg
    /// reorders internally) lands on the output queue tagged with
    /// `generation`.
    pub fn decode(&mut self, sample: &VideoSample, generation: u64) -> Result<()> {
        match self.state {
            DecoderState::Configured => {}
            DecoderState::Unconfigured | DecoderState::Closed => {
                return Err(EngineError::DecodeFatal("decoder is not configured".into()));
            }
            DecoderState::NeedsReset => {
                return Err(EngineError::DecodeTransient("decoder awaiting reset".into()));
            }
        }
        if self.needs_keyframe && !sample.is_keyframe {
            return Err(EngineError::BadSequence);
        }

        let inner = self
            .inner
            .as_mut()
            .ok_or_else(|| EngineError::DecodeFatal("decoder context missing".into()))?;

        let mut packet = ffmpeg::packet::Packet::copy(&sample.data);
        packet.set_pts(Some(sample.cts_us));
        packet.set_dts(Some(sample.dts_us));
        if sample.is_keyframe {
            packet.set_flags(ffmpeg::packet::Flags::KEY);
        }

        if let Err(e) = inner.send_packet(&packet) {
            self.state = DecoderState::NeedsReset;
            return Err(EngineError::DecodeTransient(e.to_string()));
        }
        self.needs_keyframe = false;
        self.sent += 1;

        self.receive_all(generation);
        Ok(())
    }

    /// Flush: drain every frame FFmpeg is still holding (B-frame reorder
    /// delay), then restore the keyframe precondition. Returns the number of
    /// frames drained so callers can decide whether a render is worth
    /// attempting.
    pub fn flush(&mut self, generation: u64) -> Result<usize> {
        let Some(inner) = self.inner.as_mut() else {
            return Err(EngineError::DecodeFatal("decoder context missing".into()));
        };
        let before = self.out.len();
        if inner.send_eof().is_ok() {
            self.receive_all(generation);
        }
        // After EOF the codec must be flushed before it accepts input again.
        if let Some(inner) = self.inner.as_mut() {
            inner.flush();
        }
        self.needs_keyframe = true;
        self.sent = 0;
        self.received = 0;
        Ok(self.out.len() - before)
    }

    /// Discard internal state without reconfiguring. Queued output is
    /// dropped; the next sample must be a keyframe.
    pub fn reset(&mut self) {
        if let Some(inner) = self.inner.as_mut() {
            inner.flush();
        }
        self.out.clear();
        self.needs_keyframe = true;
        self.sent = 0;
        self.received = 0;
        if self.state == DecoderState::NeedsReset {
            self.state = DecoderState::Configured;
        }
    }

    /// Release the codec context. configure() revives the wrapper.
    pub fn close(&mut self) {
        self.inner = None;
        self.scaler = None;
        self.out.clear();
        self.state = DecoderState::Closed;
    }

    /// Take all decoded frames for the current generation; frames produced
    /// under an older generation (pre-seek) are dropped here, which releases
    /// their pixel buffers.
    pub fn take_frames(&mut self, current_generation: u64) -> Vec<DecodedFrame> {
        self.out
            .drain(..)
            .filter(|f| f.generation == current_generation)
            .collect()
    }

    // ── Internals ────────────────────────────────────────────────────────────

    fn receive_all(&mut self, generation: u64) {
        let Some(inner) = self.inner.as_mut() else { return };
        let mut decoded = ffmpeg::util::frame::video::Video::empty();
        while inner.receive_frame(&mut decoded).is_ok() {
            self.received += 1;

            // The scaler is built lazily off the first real frame — pixel
            // format isn't known until the codec has seen a keyframe.
            if self.scaler.is_none() {
                match SwsContext::get(
                    decoded.format(),
                    decoded.width(),
                    decoded.height(),
                    Pixel::RGBA,
                    decoded.width(),
                    decoded.height(),
                    Flags::BILINEAR,
                ) {
                    Ok(s) => self.scaler = Some(s),
                    Err(e) => {
                        eprintln!("[decode] scaler init failed: {e}");
                        continue;
                    }
                }
            }
            let scaler = self.scaler.as_mut().unwrap();

            let mut rgba = ffmpeg::util::frame::video::Video::empty();
            if scaler.run(&decoded, &mut rgba).is_err() {
                continue;
            }
            let (w, h) = (rgba.width(), rgba.height());
            let stride = rgba.stride(0);
            let raw = rgba.data(0);
            let data: Vec<u8> = (0..h as usize)
                .flat_map(|row| {
                    let s = row * stride;
                    &raw[s..s + w as usize * 4]
                })
                .copied()
                .collect();

            let timestamp_us = decoded.pts().unwrap_or(0);
            self.out.push_back(DecodedFrame {
                handle: Arc::new(RgbaFrame::new(w, h, data)),
                timestamp_us,
                generation,
            });
        }
    }
}

impl Default for VideoDecoder {
    fn default() -> Self {
        Self::new()
    }
}
