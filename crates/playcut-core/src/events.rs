// crates/playcut-core/src/events.rs
//
// Results sent from the engine worker back to its subscribers.
// No FFmpeg types, no handles — just plain data.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EngineEvent {
    /// The worker thread is up and accepting commands.
    WorkerReady,

    // ── Source lifecycle ─────────────────────────────────────────────────────
    /// Enough samples are buffered to start playback (streaming sources emit
    /// this once, mid-stream).
    SourcePlayable {
        source_id:      Uuid,
        duration_us:    i64,
        width:          u32,
        height:         u32,
        loaded_samples: usize,
    },
    /// The demuxer finished: every sample of the source is available.
    SourceReady {
        source_id:   Uuid,
        duration_us: i64,
        width:       u32,
        height:      u32,
    },
    SourceRemoved { source_id: Uuid },

    // ── Playback ─────────────────────────────────────────────────────────────
    TimeUpdate { current_time_us: i64 },
    PlaybackState { is_playing: bool },
    SeekComplete { time_us: i64 },

    // ── Media data ───────────────────────────────────────────────────────────
    /// PNG-encoded poster frame, produced on RequestFirstFrame.
    FirstFrame {
        source_id: Uuid,
        png:       Vec<u8>,
        width:     u32,
        height:    u32,
    },
    /// Decoded PCM passed through for waveform display and other audio
    /// consumers. Float32, interleaved, at the source track's sample rate.
    AudioData {
        source_id:    Uuid,
        pcm:          Vec<f32>,
        sample_rate:  u32,
        channels:     u16,
        timestamp_us: i64,
        duration_us:  i64,
        is_complete:  bool,
    },

    /// Unrecoverable failure. When `source_id` is set the failure is scoped
    /// to that source (it has been disposed); playback of the rest of the
    /// timeline continues.
    Error {
        message:   String,
        source_id: Option<Uuid>,
    },
}
