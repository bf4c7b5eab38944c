// crates/playcut-engine/src/frame_buffer.rs
//
// Bounded queue of decoded frames keyed by presentation timestamp, one per
// source. Decoders may emit out of presentation order (B-frames); frames
// are inserted in timestamp order so selection is a scan over a sorted,
// small (≤ 8) queue. Overflow drops the oldest frame.

use std::collections::VecDeque;

use playcut_core::frame::FrameHandle;

/// Queue capacity. At 30 fps this is ~265 ms of decoded look-ahead.
pub const FRAME_BUFFER_CAP: usize = 8;

/// Frames further than this behind the selected frame are pruned after
/// every selection — playback only moves forward, and seeks clear the
/// buffer wholesale.
pub const MAX_FRAME_LAG_US: i64 = 500_000;

struct BufferedFrame {
    handle:       FrameHandle,
    timestamp_us: i64,
}

#[derive(Default)]
pub struct FrameBuffer {
    frames: VecDeque<BufferedFrame>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self { frames: VecDeque::with_capacity(FRAME_BUFFER_CAP) }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Earliest queued timestamp, if any.
    pub fn first_timestamp_us(&self) -> Option<i64> {
        self.frames.front().map(|f| f.timestamp_us)
    }

    /// Insert a frame in timestamp order. On overflow the oldest frame is
    /// dropped (its handle released).
    pub fn push(&mut self, handle: FrameHandle, timestamp_us: i64) {
        // Common case: monotonically increasing timestamps append at the back.
        let pos = self
            .frames
            .iter()
            .rposition(|f| f.timestamp_us <= timestamp_us)
            .map(|p| p + 1)
            .unwrap_or(0);
        self.frames.insert(pos, BufferedFrame { handle, timestamp_us });

        while self.frames.len() > FRAME_BUFFER_CAP {
            self.frames.pop_front();
        }
    }

    /// Pick the frame to show at `target_us`: the latest frame at or before
    /// the target, or — right after a seek, when only future frames have
    /// decoded yet — the one nearest the target, so the viewer never sees a
    /// black flash while the decoder catches up.
    ///
    /// Returns a clone of the handle; the original stays queued for
    /// re-query on the next tick (paused redisplay, same-frame repaint).
    /// After selection, frames more than [`MAX_FRAME_LAG_US`] behind the
    /// selected timestamp are pruned.
    pub fn best_for(&mut self, target_us: i64) -> Option<(FrameHandle, i64)> {
        if self.frames.is_empty() {
            return None;
        }

        // Latest frame with timestamp ≤ target ("current").
        let current = self
            .frames
            .iter()
            .enumerate()
            .rev()
            .find(|(_, f)| f.timestamp_us <= target_us)
            .map(|(i, _)| i);

        let selected = match current {
            Some(i) => i,
            // Fallback: nearest by absolute distance (all are > target here,
            // so this is the front — kept as a scan for clarity).
            None => self
                .frames
                .iter()
                .enumerate()
                .min_by_key(|(_, f)| (f.timestamp_us - target_us).abs())
                .map(|(i, _)| i)?,
        };

        let ts = self.frames[selected].timestamp_us;
        let handle = self.frames[selected].handle.clone();

        let cutoff = ts - MAX_FRAME_LAG_US;
        self.frames.retain(|f| f.timestamp_us >= cutoff);

        Some((handle, ts))
    }

    /// Drop everything. Called synchronously on seek, before new decodes
    /// are primed, so stale frames cannot leak into the next render.
    pub fn clear(&mut self) {
        self.frames.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use playcut_core::frame::RgbaFrame;
    use std::sync::Arc;

    fn frame() -> FrameHandle {
        Arc::new(RgbaFrame::solid(2, 2, [0; 4]))
    }

    #[test]
    fn best_for_picks_latest_at_or_before() {
        let mut buf = FrameBuffer::new();
        for ts in [0, 33_000, 66_000, 99_000] {
            buf.push(frame(), ts);
        }
        let (_, ts) = buf.best_for(70_000).unwrap();
        assert_eq!(ts, 66_000);
        let (_, ts) = buf.best_for(66_000).unwrap();
        assert_eq!(ts, 66_000);
    }

    #[test]
    fn best_for_falls_back_to_nearest_future_frame() {
        // Post-seek: only frames past the target are buffered.
        let mut buf = FrameBuffer::new();
        buf.push(frame(), 500_000);
        buf.push(frame(), 533_000);
        let (_, ts) = buf.best_for(100_000).unwrap();
        assert_eq!(ts, 500_000);
    }

    #[test]
    fn best_for_empty_returns_none() {
        let mut buf = FrameBuffer::new();
        assert!(buf.best_for(0).is_none());
    }

    #[test]
    fn out_of_order_pushes_are_sorted() {
        // B-frame pattern: decode order 0, 66, 33.
        let mut buf = FrameBuffer::new();
        buf.push(frame(), 0);
        buf.push(frame(), 66_000);
        buf.push(frame(), 33_000);
        let (_, ts) = buf.best_for(40_000).unwrap();
        assert_eq!(ts, 33_000);
    }

    #[test]
    fn overflow_drops_oldest() {
        let mut buf = FrameBuffer::new();
        for i in 0..(FRAME_BUFFER_CAP as i64 + 3) {
            buf.push(frame(), i * 10_000);
        }
        assert_eq!(buf.len(), FRAME_BUFFER_CAP);
        assert_eq!(buf.first_timestamp_us(), Some(30_000));
    }

    #[test]
    fn selection_prunes_stale_frames() {
        let mut buf = FrameBuffer::new();
        buf.push(frame(), 0);
        buf.push(frame(), 100_000);
        buf.push(frame(), 700_000);
        let (_, ts) = buf.best_for(700_000).unwrap();
        assert_eq!(ts, 700_000);
        // 0 and 100_000 are > 500 ms behind the selection.
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn selected_handle_is_a_clone() {
        let mut buf = FrameBuffer::new();
        let original = frame();
        buf.push(Arc::clone(&original), 0);
        // One count here, one in the buffer.
        assert_eq!(Arc::strong_count(&original), 2);
        let (selected, _) = buf.best_for(0).unwrap();
        assert_eq!(Arc::strong_count(&original), 3);
        drop(selected); // render done — close the clone
        assert_eq!(Arc::strong_count(&original), 2);
        buf.clear(); // buffer releases its reference
        assert_eq!(Arc::strong_count(&original), 1);
    }

    #[test]
    fn repeated_query_returns_same_frame() {
        // Paused redisplay: the buffer must keep serving the same frame.
        let mut buf = FrameBuffer::new();
        buf.push(frame(), 42_000);
        let (_, a) = buf.best_for(50_000).unwrap();
        let (_, b) = buf.best_for(50_000).unwrap();
        assert_eq!(a, b);
        assert_eq!(buf.len(), 1);
    }
}
