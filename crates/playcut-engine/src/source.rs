// crates/playcut-engine/src/source.rs
//
// SourceState: everything the engine owns for one media source — demuxer,
// decoders, frame buffer, sample table, discovered track metadata and the
// load lifecycle. External code refers to a source only by id.
//
// Video decoders are configured lazily by the scheduler (first feed or
// after a fatal error); audio is decoded eagerly as samples demux so the
// audio controller can schedule ahead of the clock.

use uuid::Uuid;

use crate::audio_decode::{AudioDecoder, PcmChunk};
use crate::decode::VideoDecoder;
use crate::demux::{AudioTrackInfo, DemuxEvent, Demuxer, VideoTrackInfo};
use crate::error::Result;
use crate::frame_buffer::FrameBuffer;
use crate::sample_table::SampleTable;

/// Samples buffered before a source counts as playable — about 1.5 s at
/// 30 fps.
pub const PLAYABLE_SAMPLE_THRESHOLD: usize = 45;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceLifecycle {
    /// Header or early samples still arriving.
    Loading,
    /// Enough samples buffered to start playback.
    Playable,
    /// Demuxer finished — every sample is available.
    Ready,
    Disposed,
}

/// What one batch of demuxer output changed, for the engine to translate
/// into events.
#[derive(Default)]
pub struct SourceUpdate {
    pub became_playable: bool,
    pub became_ready:    bool,
    pub new_samples:     usize,
    /// Freshly decoded audio, in source time order.
    pub pcm:             Vec<PcmChunk>,
}

pub struct SourceState {
    pub id:           Uuid,
    pub demuxer:      Demuxer,
    pub video:        VideoDecoder,
    pub audio:        Option<AudioDecoder>,
    pub frames:       FrameBuffer,
    pub table:        SampleTable,
    pub video_info:   Option<VideoTrackInfo>,
    pub audio_info:   Option<AudioTrackInfo>,
    pub duration_us:  i64,
    pub is_streaming: bool,
    pub lifecycle:    SourceLifecycle,
    /// Scheduler cursor: last sample index fed to the video decoder, or −1
    /// after a seek to force a keyframe restart.
    pub last_queued_sample: isize,
}

impl SourceState {
    pub fn new(id: Uuid, is_streaming: bool, duration_hint_us: Option<i64>) -> Self {
        Self {
            id,
            demuxer:            Demuxer::new(),
            video:              VideoDecoder::new(),
            audio:              None,
            frames:             FrameBuffer::new(),
            table:              SampleTable::new(),
            video_info:         None,
            audio_info:         None,
            duration_us:        duration_hint_us.unwrap_or(0),
            is_streaming,
            lifecycle:          SourceLifecycle::Loading,
            last_queued_sample: -1,
        }
    }

    /// True once the demuxer's terminal flush completed.
    #[inline]
    pub fn is_ready(&self) -> bool {
        self.lifecycle == SourceLifecycle::Ready
    }

    /// Playable or beyond — the transport may start over this source.
    #[inline]
    pub fn is_playable(&self) -> bool {
        matches!(
            self.lifecycle,
            SourceLifecycle::Playable | SourceLifecycle::Ready
        )
    }

    pub fn width(&self) -> u32 {
        self.video_info.as_ref().map(|v| v.width).unwrap_or(0)
    }

    pub fn height(&self) -> u32 {
        self.video_info.as_ref().map(|v| v.height).unwrap_or(0)
    }

    /// Fold a batch of demuxer output into this source's state.
    pub fn apply(&mut self, events: Vec<DemuxEvent>) -> Result<SourceUpdate> {
        let mut update = SourceUpdate::default();

        for event in events {
            match event {
                DemuxEvent::Ready { video, audio, duration_us } => {
                    // A duration from the container header beats the hint.
                    if let Some(d) = duration_us {
                        self.duration_us = d;
                    }
                    self.video_info = Some(video);
                    self.audio_info = audio;
                }
                DemuxEvent::VideoSamples(samples) => {
                    update.new_samples += samples.len();
                    for s in samples {
                        self.table.push(s);
                    }
                }
                DemuxEvent::AudioSamples(samples) => {
                    if self.audio.is_none() {
                        if let Some(info) = &self.audio_info {
                            let mut dec = AudioDecoder::new();
                            match dec.configure(info) {
                                Ok(()) => self.audio = Some(dec),
                                Err(e) => {
                                    // Audio is optional: a dead audio decoder
                                    // degrades to silent playback, video is
                                    // unaffected.
                                    eprintln!("[source] audio decoder: {e}");
                                    self.audio_info = None;
                                }
                            }
                        }
                    }
                    if let Some(dec) = self.audio.as_mut() {
                        for s in &samples {
                            match dec.decode(s) {
                                Ok(chunks) => update.pcm.extend(chunks),
                                Err(e) => eprintln!("[source] audio decode: {e}"),
                            }
                        }
                    }
                }
                DemuxEvent::Finished => {
                    if let Some(dec) = self.audio.as_mut() {
                        if let Ok(chunks) = dec.drain() {
                            update.pcm.extend(chunks);
                        }
                    }
                    // Streaming headers may understate (or omit) duration;
                    // the observed sample range is the truth at this point.
                    if let Some(end) = self.table.end_us() {
                        self.duration_us = self.duration_us.max(end);
                    }
                    if self.lifecycle == SourceLifecycle::Loading {
                        update.became_playable = true;
                    }
                    self.lifecycle = SourceLifecycle::Ready;
                    update.became_ready = true;
                }
            }
        }

        // Playable transition fires exactly once, at the threshold.
        if self.lifecycle == SourceLifecycle::Loading
            && self.table.len() >= PLAYABLE_SAMPLE_THRESHOLD
        {
            self.lifecycle = SourceLifecycle::Playable;
            update.became_playable = true;
        }

        Ok(update)
    }

    /// Release decoders and buffered frames. The source map drops the rest.
    pub fn dispose(&mut self) {
        self.video.close();
        if let Some(audio) = self.audio.as_mut() {
            audio.close();
        }
        self.frames.clear();
        self.lifecycle = SourceLifecycle::Disposed;
    }
}
