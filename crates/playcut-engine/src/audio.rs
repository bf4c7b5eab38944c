// crates/playcut-engine/src/audio.rs
//
// AudioController: per-source decoded PCM store, ahead-of-clock scheduling
// of clip audio against the mixer's own sample clock, master gain, and the
// drift detector that re-schedules when audio and video disagree.
//
// The audio graph is a mixer callback pulling from scheduled nodes. Graph
// time is frames-mixed divided by the graph rate — it advances exactly as
// fast as the device consumes samples, which is what makes it usable as a
// clock. Video is the master: on drift past the threshold everything is
// stopped and re-scheduled at the video position.
//
// Tests drive `mix_into` directly instead of opening a device; the cpal
// stream is just the production pump for the same function.

use std::collections::HashMap;
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;
use uuid::Uuid;

use playcut_core::composition::{ActiveClip, ClipKind};
use playcut_core::helpers::time::MICROS_PER_SEC;

use crate::audio_decode::PcmChunk;
use crate::error::{EngineError, Result};

/// Re-schedule when |video − expected audio| exceeds this.
pub const DRIFT_THRESHOLD_US: i64 = 100_000;
/// How often the engine runs the drift check while playing.
pub const DRIFT_CHECK_INTERVAL_US: i64 = 100_000;
/// Leave the graph alone this long after any (re)schedule before judging it.
pub const RESCHEDULE_SETTLE_US: i64 = 200_000;
/// The mixer's output rate. Source PCM at other rates is stepped at mix time.
pub const GRAPH_SAMPLE_RATE: u32 = 48_000;

// ── PCM store ─────────────────────────────────────────────────────────────────

/// One decoded chunk, deinterleaved to planar on ingest.
struct StoredChunk {
    planes:      Arc<Vec<Vec<f32>>>,
    sample_rate: u32,
    start_us:    i64,
    duration_us: i64,
}

impl StoredChunk {
    #[inline]
    fn end_us(&self) -> i64 {
        self.start_us + self.duration_us
    }
}

// ── Mixer ─────────────────────────────────────────────────────────────────────

/// A chunk playing (or queued to play) at an absolute graph time.
struct ScheduledNode {
    clip_id:              Uuid,
    source_id:            Uuid,
    planes:               Arc<Vec<Vec<f32>>>,
    source_rate:          u32,
    /// Graph frame at which sample 0 of the slice is due.
    start_frame:          i64,
    /// Skip into the chunk by this many source frames before playing.
    source_offset_frames: i64,
    /// Length of the slice in graph frames.
    play_frames:          i64,
    gain:                 f32,
}

pub struct MixerState {
    frames_mixed: i64,
    master_gain:  f32,
    muted:        bool,
    nodes:        Vec<ScheduledNode>,
}

impl MixerState {
    fn new() -> Self {
        Self {
            frames_mixed: 0,
            master_gain:  1.0,
            muted:        false,
            nodes:        Vec::new(),
        }
    }

    #[inline]
    fn now_us(&self) -> i64 {
        self.frames_mixed * MICROS_PER_SEC / GRAPH_SAMPLE_RATE as i64
    }
}

/// Mix one interleaved-stereo buffer and advance the graph clock.
/// This IS the audio callback body; tests call it directly to move time.
pub fn mix_into(state: &mut MixerState, out: &mut [f32]) {
    out.fill(0.0);
    let frames = out.len() / 2;
    let gain = if state.muted { 0.0 } else { state.master_gain };

    for node in &state.nodes {
        let node_gain = gain * node.gain;
        for i in 0..frames {
            let rel = state.frames_mixed + i as i64 - node.start_frame;
            if rel < 0 || rel >= node.play_frames {
                continue;
            }
            // Nearest-sample rate step from the source rate into the graph rate.
            let src = node.source_offset_frames
                + rel * node.source_rate as i64 / GRAPH_SAMPLE_RATE as i64;
            let src = src as usize;
            let (l, r) = match node.planes.len() {
                0 => (0.0, 0.0),
                1 => {
                    let s = node.planes[0].get(src).copied().unwrap_or(0.0);
                    (s, s)
                }
                _ => (
                    node.planes[0].get(src).copied().unwrap_or(0.0),
                    node.planes[1].get(src).copied().unwrap_or(0.0),
                ),
            };
            out[i * 2] += l * node_gain;
            out[i * 2 + 1] += r * node_gain;
        }
    }

    state.frames_mixed += frames as i64;
    let now = state.frames_mixed;
    state
        .nodes
        .retain(|n| n.start_frame + n.play_frames > now);
}

// ── Controller ────────────────────────────────────────────────────────────────

pub struct AudioController {
    mixer:  Arc<Mutex<MixerState>>,
    stream: Option<cpal::Stream>,
    store:  HashMap<Uuid, Vec<StoredChunk>>,

    last_scheduled_video_time_us:  Option<i64>,
    last_scheduled_audio_clock_us: Option<i64>,
}

impl AudioController {
    pub fn new() -> Self {
        Self {
            mixer:                         Arc::new(Mutex::new(MixerState::new())),
            stream:                        None,
            store:                         HashMap::new(),
            last_scheduled_video_time_us:  None,
            last_scheduled_audio_clock_us: None,
        }
    }

    /// Open the output device and start pumping the mixer. Headless callers
    /// (tests, CI) skip this and drive `mix_for_test` instead.
    pub fn attach_output(&mut self) -> Result<()> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| EngineError::AudioGraph("no output device".into()))?;
        let config = cpal::StreamConfig {
            channels:    2,
            sample_rate: cpal::SampleRate(GRAPH_SAMPLE_RATE),
            buffer_size: cpal::BufferSize::Default,
        };
        let mixer = Arc::clone(&self.mixer);
        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _| {
                    mix_into(&mut mixer.lock(), data);
                },
                |e| eprintln!("[audio] stream error: {e}"),
                None,
            )
            .map_err(|e| EngineError::AudioGraph(e.to_string()))?;
        stream
            .play()
            .map_err(|e| EngineError::AudioGraph(e.to_string()))?;
        self.stream = Some(stream);
        Ok(())
    }

    /// Current position of the audio graph.
    pub fn graph_now_us(&self) -> i64 {
        self.mixer.lock().now_us()
    }

    pub fn set_master_volume(&mut self, volume: f32) {
        self.mixer.lock().master_gain = volume.clamp(0.0, 1.0);
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.mixer.lock().muted = muted;
    }

    /// Store a decoded chunk, deinterleaving to planar. Chunks arrive in
    /// source time order from the decoder; a seek does not clear the store —
    /// PCM is position-independent data, only scheduling is positional.
    pub fn ingest(&mut self, source_id: Uuid, chunk: &PcmChunk) {
        let ch = chunk.channels.max(1) as usize;
        let frames = chunk.pcm.len() / ch;
        let mut planes = vec![Vec::with_capacity(frames); ch];
        for (i, &s) in chunk.pcm.iter().enumerate() {
            planes[i % ch].push(s);
        }
        self.store.entry(source_id).or_default().push(StoredChunk {
            planes:      Arc::new(planes),
            sample_rate: chunk.sample_rate,
            start_us:    chunk.timestamp_us,
            duration_us: chunk.duration_us,
        });
    }

    pub fn remove_source(&mut self, source_id: Uuid) {
        self.store.remove(&source_id);
        self.mixer.lock().nodes.retain(|n| n.source_id != source_id);
    }

    /// Schedule every stored chunk of `clip`'s source that overlaps the
    /// remainder of the clip, starting from the video position
    /// `current_time_us`. Chunks already underway start immediately with a
    /// skip into their data; future chunks start at their graph-time due
    /// date.
    pub fn schedule_clip(&mut self, clip: &ActiveClip, current_time_us: i64) {
        let Some(chunks) = self.store.get(&clip.source_id) else {
            return;
        };
        let source_offset_us = clip.source_time_at(current_time_us);

        let mut mixer = self.mixer.lock();
        let now_frame = mixer.frames_mixed;

        for chunk in chunks {
            if chunk.end_us() <= source_offset_us || chunk.start_us >= clip.source_end_us {
                continue;
            }

            let skip_us = (source_offset_us - chunk.start_us).max(0);
            let start_frame = if chunk.start_us < source_offset_us {
                now_frame
            } else {
                now_frame
                    + (chunk.start_us - source_offset_us) * GRAPH_SAMPLE_RATE as i64
                        / MICROS_PER_SEC
            };

            let play_us = chunk.end_us().min(clip.source_end_us)
                - chunk.start_us.max(source_offset_us);
            if play_us <= 0 {
                continue;
            }

            mixer.nodes.push(ScheduledNode {
                clip_id:              clip.clip_id,
                source_id:            clip.source_id,
                planes:               Arc::clone(&chunk.planes),
                source_rate:          chunk.sample_rate,
                start_frame,
                source_offset_frames: skip_us * chunk.sample_rate as i64 / MICROS_PER_SEC,
                play_frames:          play_us * GRAPH_SAMPLE_RATE as i64 / MICROS_PER_SEC,
                gain:                 clip.volume.clamp(0.0, 1.0),
            });
        }
    }

    /// Schedule every audio clip in `clips` and record the (video time,
    /// graph time) pair the drift detector measures against.
    pub fn schedule_all(&mut self, clips: &[ActiveClip], current_time_us: i64) {
        self.last_scheduled_video_time_us = Some(current_time_us);
        self.last_scheduled_audio_clock_us = Some(self.graph_now_us());
        for clip in clips.iter().filter(|c| c.track_kind == ClipKind::Audio) {
            self.schedule_clip(clip, current_time_us);
        }
    }

    /// Stop the nodes belonging to one clip (clip deleted or trimmed while
    /// playing). The timing record stays — other clips are still on schedule.
    pub fn stop_clip(&mut self, clip_id: Uuid) {
        self.mixer.lock().nodes.retain(|n| n.clip_id != clip_id);
    }

    /// Stop and forget every scheduled node and the timing record.
    pub fn stop_all(&mut self) {
        self.mixer.lock().nodes.clear();
        self.last_scheduled_video_time_us = None;
        self.last_scheduled_audio_clock_us = None;
    }

    pub fn scheduled_node_count(&self) -> usize {
        self.mixer.lock().nodes.len()
    }

    /// Drift check: where the audio graph says playback is versus where the
    /// video clock says it should be. Past the threshold, audio is stopped
    /// and re-scheduled at the video position (video is the master clock).
    /// Returns true when a re-schedule happened.
    pub fn verify_drift(&mut self, current_time_us: i64, clips: &[ActiveClip]) -> bool {
        let (Some(video_at), Some(clock_at)) = (
            self.last_scheduled_video_time_us,
            self.last_scheduled_audio_clock_us,
        ) else {
            return false;
        };

        let graph_now = self.graph_now_us();
        if graph_now - clock_at < RESCHEDULE_SETTLE_US {
            return false; // let the graph stabilize after the last schedule
        }

        let expected_audio_us = video_at + (graph_now - clock_at);
        let drift_us = (current_time_us - expected_audio_us).abs();
        if drift_us <= DRIFT_THRESHOLD_US {
            return false;
        }

        eprintln!("[audio] drift {drift_us} µs — rescheduling at video position");
        self.stop_all();
        self.schedule_all(clips, current_time_us);
        true
    }

    /// Advance the graph without a device: mix `frames` frames into a
    /// scratch buffer. The production path is the cpal callback.
    pub fn mix_for_test(&self, frames: usize) -> Vec<f32> {
        let mut buf = vec![0.0f32; frames * 2];
        mix_into(&mut self.mixer.lock(), &mut buf);
        buf
    }
}

impl Default for AudioController {
    fn default() -> Self {
        Self::new()
    }
}
