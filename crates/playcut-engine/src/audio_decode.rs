// crates/playcut-engine/src/audio_decode.rs
//
// AudioDecoder: AAC access units in, float32 interleaved PCM chunks out.
// Decoding happens as samples are demuxed — the audio controller schedules
// ahead of the clock, so PCM must exist well before its presentation time.
//
// The resampler converts whatever sample format the codec emits (AAC
// decodes to planar float) into packed f32 at the track's native rate and
// channel count; rate conversion to the output graph happens in the mixer.

use ffmpeg_the_third as ffmpeg;
use ffmpeg::software::resampling;
use ffmpeg::util::channel_layout::ChannelLayout;
use ffmpeg::util::format::sample::{Sample, Type};

use playcut_core::helpers::time::MICROS_PER_SEC;

use crate::demux::AudioTrackInfo;
use crate::error::{EngineError, Result};
use crate::sample_table::AudioSample;

/// One decoded stretch of PCM. Float32, interleaved, at the source track's
/// sample rate.
#[derive(Clone, Debug)]
pub struct PcmChunk {
    pub pcm:          Vec<f32>,
    pub sample_rate:  u32,
    pub channels:     u16,
    pub timestamp_us: i64,
    pub duration_us:  i64,
}

pub struct AudioDecoder {
    inner:     Option<ffmpeg::decoder::Audio>,
    resampler: Option<resampling::Context>,
    info:      Option<AudioTrackInfo>,
}

impl AudioDecoder {
    pub fn new() -> Self {
        Self { inner: None, resampler: None, info: None }
    }

    /// Build the AAC decoder from the track descriptor; `codec_private` is
    /// the AudioSpecificConfig installed as extradata.
    pub fn configure(&mut self, info: &AudioTrackInfo) -> Result<()> {
        let codec = ffmpeg::decoder::find(ffmpeg::codec::Id::AAC)
            .ok_or_else(|| EngineError::UnsupportedCodec("aac".into()))?;

        let mut ctx = ffmpeg::codec::context::Context::new_with_codec(codec);
        unsafe {
            let raw = ctx.as_mut_ptr();
            let private = &info.codec_private;
            let extra = ffmpeg::ffi::av_mallocz(
                private.len() + ffmpeg::ffi::AV_INPUT_BUFFER_PADDING_SIZE as usize,
            ) as *mut u8;
            std::ptr::copy_nonoverlapping(private.as_ptr(), extra, private.len());
            (*raw).extradata = extra;
            (*raw).extradata_size = private.len() as i32;
            (*raw).sample_rate = info.sample_rate as i32;
        }

        let decoder = ctx
            .decoder()
            .audio()
            .map_err(|e| EngineError::UnsupportedCodec(format!("aac: {e}")))?;

        self.inner = Some(decoder);
        self.resampler = None;
        self.info = Some(info.clone());
        Ok(())
    }

    /// Decode one access unit into zero or more PCM chunks (the codec and
    /// resampler may both hold latency at stream start).
    pub fn decode(&mut self, sample: &AudioSample) -> Result<Vec<PcmChunk>> {
        let inner = self
            .inner
            .as_mut()
            .ok_or_else(|| EngineError::DecodeFatal("audio decoder not configured".into()))?;

        let mut packet = ffmpeg::packet::Packet::copy(&sample.data);
        packet.set_pts(Some(sample.cts_us));
        packet.set_dts(Some(sample.cts_us));

        inner
            .send_packet(&packet)
            .map_err(|e| EngineError::DecodeTransient(e.to_string()))?;

        self.receive_all()
    }

    /// Drain codec latency at end of stream.
    pub fn drain(&mut self) -> Result<Vec<PcmChunk>> {
        let Some(inner) = self.inner.as_mut() else {
            return Ok(Vec::new());
        };
        let _ = inner.send_eof();
        self.receive_all()
    }

    pub fn close(&mut self) {
        self.inner = None;
        self.resampler = None;
    }

    fn receive_all(&mut self) -> Result<Vec<PcmChunk>> {
        let info = self
            .info
            .clone()
            .ok_or_else(|| EngineError::DecodeFatal("audio decoder not configured".into()))?;
        let Some(inner) = self.inner.as_mut() else {
            return Ok(Vec::new());
        };

        let mut chunks = Vec::new();
        let mut decoded = ffmpeg::util::frame::Audio::empty();
        while inner.receive_frame(&mut decoded).is_ok() {
            // Resampler built off the first real frame — the codec's output
            // format isn't reliable until then. Output frames must stay
            // empty for swr to allocate them (see transcode resampler note).
            if self.resampler.is_none() {
                let src_layout = if decoded.channel_layout().bits() == 0 {
                    match decoded.channels() {
                        1 => ChannelLayout::MONO,
                        _ => ChannelLayout::STEREO,
                    }
                } else {
                    decoded.channel_layout()
                };
                let dst_layout = match info.channels {
                    1 => ChannelLayout::MONO,
                    _ => ChannelLayout::STEREO,
                };
                let ctx = resampling::Context::get(
                    decoded.format(),
                    src_layout,
                    decoded.rate(),
                    Sample::F32(Type::Packed),
                    dst_layout,
                    info.sample_rate,
                )
                .map_err(|e| EngineError::DecodeTransient(format!("resampler: {e}")))?;
                self.resampler = Some(ctx);
            }

            let mut out = ffmpeg::util::frame::Audio::empty();
            if self
                .resampler
                .as_mut()
                .unwrap()
                .run(&decoded, &mut out)
                .is_err()
            {
                continue;
            }
            let out_samples = out.samples();
            if out_samples == 0 {
                continue;
            }

            let channels = info.channels.min(2).max(1);
            let byte_len = out_samples * channels as usize * 4;
            let raw = &out.data(0)[..byte_len];
            let pcm: Vec<f32> = raw
                .chunks_exact(4)
                .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
                .collect();

            let duration_us =
                out_samples as i64 * MICROS_PER_SEC / info.sample_rate.max(1) as i64;
            chunks.push(PcmChunk {
                pcm,
                sample_rate: info.sample_rate,
                channels,
                timestamp_us: decoded.pts().unwrap_or(0),
                duration_us,
            });
        }
        Ok(chunks)
    }
}

impl Default for AudioDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn decode_before_configure_is_fatal() {
        let mut dec = AudioDecoder::new();
        let sample = AudioSample {
            data:        Bytes::from_static(&[0xFF]),
            cts_us:      0,
            duration_us: 21_333,
        };
        assert!(matches!(
            dec.decode(&sample),
            Err(EngineError::DecodeFatal(_))
        ));
    }

    #[test]
    fn drain_without_configure_is_empty() {
        let mut dec = AudioDecoder::new();
        assert!(dec.drain().unwrap().is_empty());
    }
}
