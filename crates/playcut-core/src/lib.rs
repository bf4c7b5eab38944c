// crates/playcut-core/src/lib.rs
//
// Pure data and pure math shared by the engine and its external callers.
// No FFmpeg, no audio device, no channels — everything here is testable
// without a runtime.

pub mod commands;
pub mod compose;
pub mod composition;
pub mod events;
pub mod frame;
pub mod helpers;

pub use commands::EngineCommand;
pub use composition::{ActiveClip, Clip, ClipKind, Composition, Track};
pub use events::EngineEvent;
pub use frame::{FrameHandle, RgbaFrame};
