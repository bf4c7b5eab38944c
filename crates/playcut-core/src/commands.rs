// crates/playcut-core/src/commands.rs
//
// Every request an external collaborator can make of the engine is one
// EngineCommand. Commands cross the channel into the render-domain worker;
// adding a capability = add a variant here + one match arm in engine.rs.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::composition::ActiveClip;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EngineCommand {
    // ── Sources ──────────────────────────────────────────────────────────────
    /// Create a source from a complete in-memory byte blob.
    LoadSource {
        source_id:        Uuid,
        bytes:            Vec<u8>,
        duration_hint_us: Option<i64>,
    },
    /// Create a streaming source; bytes follow via AppendSourceChunk.
    StartSourceStream {
        source_id:        Uuid,
        duration_hint_us: Option<i64>,
    },
    /// Append progressively arriving bytes. `is_last` marks the terminal
    /// chunk — after it the source's demuxer flushes and the source becomes
    /// fully ready.
    AppendSourceChunk {
        source_id: Uuid,
        bytes:     Vec<u8>,
        is_last:   bool,
    },
    RemoveSource { source_id: Uuid },

    // ── Composition snapshot ─────────────────────────────────────────────────
    /// Replace the engine's view of the clips around the current time.
    /// `has_clips_at_time` distinguishes "nothing sent yet" from "the
    /// timeline is genuinely empty here" (true gap → clear to black).
    SetActiveClips {
        clips:                   Vec<ActiveClip>,
        has_clips_at_time:       bool,
        composition_duration_us: i64,
    },

    // ── Transport ────────────────────────────────────────────────────────────
    Play,
    Pause,
    Seek { time_us: i64 },
    /// Follow an externally-driven playhead (scrub) without the full seek
    /// protocol events.
    SyncToTime { time_us: i64 },

    // ── Audio ────────────────────────────────────────────────────────────────
    SetMasterVolume(f32),
    SetMuted(bool),

    // ── Misc ─────────────────────────────────────────────────────────────────
    /// Decode the first keyframe of a source and emit FirstFrame with a
    /// PNG-encoded poster image.
    RequestFirstFrame { source_id: Uuid },
    /// Stop the worker thread. The engine disposes every source on exit.
    Shutdown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_survive_the_message_boundary() {
        // Commands are serialized when the collaborator runs out-of-process.
        let cmd = EngineCommand::AppendSourceChunk {
            source_id: Uuid::new_v4(),
            bytes:     vec![1, 2, 3],
            is_last:   true,
        };
        let json = serde_json::to_string(&cmd).unwrap();
        let back: EngineCommand = serde_json::from_str(&json).unwrap();
        match back {
            EngineCommand::AppendSourceChunk { bytes, is_last, .. } => {
                assert_eq!(bytes, vec![1, 2, 3]);
                assert!(is_last);
            }
            other => panic!("wrong variant after round-trip: {other:?}"),
        }
    }
}
