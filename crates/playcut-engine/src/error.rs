// crates/playcut-engine/src/error.rs
//
// Typed failure kinds. Source-scoped kinds (DemuxParse, UnsupportedCodec,
// DecodeFatal) dispose the offending source and surface as an Error event;
// the rest of the timeline keeps playing. Transient kinds never reach the
// event stream.

use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum EngineError {
    /// Malformed container. Fatal for the source.
    #[error("demux parse error: {0}")]
    DemuxParse(String),

    /// Decoder configuration failed — the platform build of FFmpeg cannot
    /// decode this codec. Fatal for the source.
    #[error("unsupported codec: {0}")]
    UnsupportedCodec(String),

    /// A non-keyframe was fed where the decoder requires a keyframe
    /// (first sample after configure/flush/reset).
    #[error("decode sequence error: expected keyframe")]
    BadSequence,

    /// Mid-GOP decode failure. The decoder is marked NeedsReset and the
    /// scheduler restarts it from a keyframe next tick.
    #[error("transient decode error: {0}")]
    DecodeTransient(String),

    /// The decoder died outright; it is recreated via configure and resumed
    /// from the keyframe at the current time.
    #[error("decoder failed fatally: {0}")]
    DecodeFatal(String),

    /// A streaming source has no keyframe at or before the seek target yet.
    /// Not an error surface — retried on each appended chunk.
    #[error("no keyframe demuxed before seek target")]
    SeekBeforeFirstKeyframe,

    /// The audio output device or stream could not be opened.
    #[error("audio output error: {0}")]
    AudioGraph(String),

    #[error("unknown source {0}")]
    UnknownSource(Uuid),
}

pub type Result<T> = std::result::Result<T, EngineError>;
