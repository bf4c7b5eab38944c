// crates/playcut-engine/src/scheduler.rs
//
// DecoderScheduler: per tick, decide which encoded samples each active
// source's video decoder should be fed. Respects decoder backpressure
// (pending queue depth) and the device tier's look-ahead; after a seek the
// per-source cursor is −1, which forces a restart from the keyframe at or
// before the target.

use crate::error::{EngineError, Result};
use crate::sample_table::SampleTable;
use crate::source::SourceState;
use crate::tier::TierParams;
use crate::decode::DecoderState;

/// Hard cap on samples fed to one decoder in one tick, regardless of tier —
/// a single giant GOP must not stall the whole tick.
pub const MAX_SAMPLES_PER_FEED: usize = 32;

/// The inclusive sample range to feed this tick, or None when the decoder
/// is already at (or past) where it needs to be.
///
/// `last_queued` is the cursor of the last sample already fed, −1 for a
/// fresh or just-reset decoder. Feeding always begins no earlier than the
/// keyframe governing the target: mid-GOP continuation is only valid when
/// the cursor is already inside the GOP (no reset intervened).
pub fn feed_window(
    table: &SampleTable,
    last_queued: isize,
    source_time_us: i64,
    look_ahead: usize,
) -> Result<Option<(usize, usize)>> {
    let Some(last_index) = table.last_index() else {
        return Ok(None); // nothing demuxed yet
    };

    // Sample to decode toward; past the end of the table, aim at the tail.
    let target = table
        .sample_at_or_after(source_time_us)
        .unwrap_or(last_index);

    let keyframe = table
        .keyframe_at_or_before(target)
        .ok_or(EngineError::SeekBeforeFirstKeyframe)?;

    let start = ((last_queued + 1) as usize).max(keyframe);
    let end = (target + look_ahead).min(last_index);
    if start > end {
        return Ok(None);
    }
    let end = end.min(start + MAX_SAMPLES_PER_FEED - 1);
    Ok(Some((start, end)))
}

/// Feed one source's video decoder for this tick, respecting backpressure
/// and the per-feed cap.
pub fn schedule_source(
    src: &mut SourceState,
    source_time_us: i64,
    params: &TierParams,
    generation: u64,
) -> Result<()> {
    feed_source(src, source_time_us, params, generation, true)
}

/// Prime a source after a seek: feed from the governing keyframe all the
/// way to the target, looping past the per-feed cap and ignoring the
/// backpressure limit. Runs synchronously on the render thread — a seek is
/// a one-shot burn, not a paced tick — so the first post-seek render
/// selects the frame at the target rather than one partway up the GOP.
pub fn prime_source(
    src: &mut SourceState,
    source_time_us: i64,
    params: &TierParams,
    generation: u64,
) -> Result<()> {
    loop {
        let before = src.last_queued_sample;
        feed_source(src, source_time_us, params, generation, false)?;
        // No cursor movement means caught up (or a decode error already
        // forced a retry that went nowhere) — stop either way.
        if src.last_queued_sample == before {
            return Ok(());
        }
    }
}

/// Recovers decoder state first: a closed decoder (prior fatal error) is
/// rebuilt from the track descriptor, a NeedsReset decoder is reset — both
/// force the cursor back to −1 so feeding restarts from a keyframe.
fn feed_source(
    src: &mut SourceState,
    source_time_us: i64,
    params: &TierParams,
    generation: u64,
    respect_backpressure: bool,
) -> Result<()> {
    let Some(info) = src.video_info.clone() else {
        return Ok(()); // header not parsed yet
    };

    match src.video.state() {
        DecoderState::Unconfigured | DecoderState::Closed => {
            src.video.configure(&info)?;
            src.last_queued_sample = -1;
        }
        DecoderState::NeedsReset => {
            src.video.reset();
            src.last_queued_sample = -1;
        }
        DecoderState::Configured => {}
    }

    if respect_backpressure && src.video.pending_decode_count() >= params.max_pending {
        return Ok(()); // backpressure — try again next tick
    }

    let window = feed_window(
        &src.table,
        src.last_queued_sample,
        source_time_us,
        params.look_ahead_samples,
    )?;
    let Some((start, end)) = window else {
        return Ok(());
    };

    for index in start..=end {
        let sample = src
            .table
            .get(index)
            .expect("feed window inside table bounds")
            .clone();
        match src.video.decode(&sample, generation) {
            Ok(()) => src.last_queued_sample = index as isize,
            Err(EngineError::DecodeTransient(e)) => {
                // Next tick resets and restarts from the keyframe.
                eprintln!("[schedule] transient decode error at sample {index}: {e}");
                src.last_queued_sample = -1;
                return Ok(());
            }
            Err(EngineError::DecodeFatal(e)) => {
                eprintln!("[schedule] fatal decoder error at sample {index}: {e}");
                src.video.close();
                src.last_queued_sample = -1;
                return Ok(()); // rebuilt on the next tick
            }
            Err(e) => return Err(e),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample_table::VideoSample;
    use bytes::Bytes;

    /// `n` samples at 30 fps with a keyframe every `gop`.
    fn table(n: usize, gop: usize) -> SampleTable {
        let mut t = SampleTable::new();
        for i in 0..n {
            t.push(VideoSample {
                data:         Bytes::from_static(b"x"),
                cts_us:       i as i64 * 33_367,
                dts_us:       i as i64 * 33_367,
                duration_us:  33_367,
                is_keyframe:  i % gop == 0,
                sample_index: 0,
            });
        }
        t
    }

    #[test]
    fn fresh_decoder_starts_at_governing_keyframe() {
        let t = table(300, 30);
        // Target 3.333 s ≈ sample 100; GOP of 30 → keyframe 90.
        let (start, end) = feed_window(&t, -1, 3_333_333, 8).unwrap().unwrap();
        assert_eq!(start, 90);
        assert_eq!(end, 100 + 8);
    }

    #[test]
    fn per_feed_cap_limits_giant_gops() {
        // One keyframe at 0, target at sample 200: the window is capped to
        // 32 samples; later ticks continue from the cursor.
        let t = table(300, 300);
        let (start, end) = feed_window(&t, -1, 200 * 33_367, 8).unwrap().unwrap();
        assert_eq!(start, 0);
        assert_eq!(end, MAX_SAMPLES_PER_FEED - 1);
        let (start, end) = feed_window(&t, end as isize, 200 * 33_367, 8).unwrap().unwrap();
        assert_eq!(start, MAX_SAMPLES_PER_FEED);
        assert_eq!(end, 2 * MAX_SAMPLES_PER_FEED - 1);
    }

    #[test]
    fn mid_gop_continuation_does_not_refeed() {
        let t = table(300, 30);
        // Cursor at 95, same GOP as target 100: continue from 96.
        let (start, end) = feed_window(&t, 95, 3_333_333, 8).unwrap().unwrap();
        assert_eq!(start, 96);
        assert_eq!(end, 100 + 8);
    }

    #[test]
    fn caught_up_decoder_feeds_nothing() {
        let t = table(300, 30);
        assert!(feed_window(&t, 108, 3_333_333, 8).unwrap().is_none());
    }

    #[test]
    fn window_clamps_to_table_end() {
        let t = table(100, 30);
        let (start, end) = feed_window(&t, 97, 99 * 33_367, 8).unwrap().unwrap();
        assert_eq!(start, 98);
        assert_eq!(end, 99);
    }

    #[test]
    fn target_past_table_end_aims_at_tail() {
        let t = table(100, 30);
        let (start, end) = feed_window(&t, -1, 3_600_000, 8).unwrap().unwrap();
        assert_eq!(start, 90);
        assert_eq!(end, 99);
    }

    #[test]
    fn empty_table_is_not_an_error() {
        let t = SampleTable::new();
        assert!(feed_window(&t, -1, 0, 8).unwrap().is_none());
    }

    #[test]
    fn no_keyframe_before_target_is_reported() {
        // A streaming source whose first demuxed samples are mid-GOP.
        let mut t = SampleTable::new();
        for i in 0..10 {
            t.push(VideoSample {
                data:         Bytes::from_static(b"x"),
                cts_us:       i * 33_367,
                dts_us:       i * 33_367,
                duration_us:  33_367,
                is_keyframe:  false,
                sample_index: 0,
            });
        }
        assert!(matches!(
            feed_window(&t, -1, 0, 8),
            Err(EngineError::SeekBeforeFirstKeyframe)
        ));
    }

    #[test]
    fn priming_loop_reaches_target_past_feed_cap() {
        // A 2 s GOP seeked into at frame 250: one capped feed stops at 31,
        // but looping until the cursor stalls must reach the target sample.
        let t = table(300, 300);
        let target_us = 250 * 33_367;
        let mut cursor: isize = -1;
        while let Some((start, end)) = feed_window(&t, cursor, target_us, 8).unwrap() {
            assert!(end - start + 1 <= MAX_SAMPLES_PER_FEED);
            cursor = end as isize;
        }
        assert!(cursor >= 250);
    }

    #[test]
    fn seek_priming_covers_target_sample() {
        // Scrub to 3.333 s: priming must reach at least the sample before
        // the target's keyframe chain — cursor ends ≥ sample 99's keyframe.
        let t = table(300, 30);
        let mut cursor: isize = -1;
        let mut fed = 0;
        while let Some((start, end)) = feed_window(&t, cursor, 3_333_333, 8).unwrap() {
            fed += end - start + 1;
            cursor = end as isize;
            if fed > 300 {
                panic!("scheduler failed to converge");
            }
        }
        assert!(cursor >= 99);
    }
}
