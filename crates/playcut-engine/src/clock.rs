// crates/playcut-engine/src/clock.rs
//
// Wall-clock-anchored playback position. While playing, the current time is
// derived, never accumulated:
//
//   current = anchor_time + (now_ms − anchor_wall_ms) × 1000
//
// so a delayed tick can never make the position drift — it just lands
// further along. Play, pause and seek all re-anchor; the clock is always
// anchored on the seek target, not on the first rendered frame.
//
// The engine passes `now_ms` explicitly (milliseconds since its epoch),
// which keeps every transition deterministic under test.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClockState {
    /// No source attached yet.
    Idle,
    /// Attached and paused.
    Ready,
    Playing,
}

/// What one tick decided.
pub struct TickOutcome {
    pub current_time_us: i64,
    /// The clock ran into the end of the composition and paused itself.
    pub reached_end:     bool,
}

pub struct PlaybackClock {
    state:            ClockState,
    current_time_us:  i64,
    anchor_time_us:   i64,
    anchor_wall_ms:   i64,
    duration_us:      i64,
    /// Set when a paused seek still owes the screen one render (e.g. the
    /// target's keyframe hasn't demuxed yet on a streaming source).
    pub pending_paused_render: bool,
}

impl PlaybackClock {
    pub fn new() -> Self {
        Self {
            state:                 ClockState::Idle,
            current_time_us:       0,
            anchor_time_us:        0,
            anchor_wall_ms:        0,
            duration_us:           0,
            pending_paused_render: false,
        }
    }

    #[inline]
    pub fn state(&self) -> ClockState {
        self.state
    }

    #[inline]
    pub fn is_playing(&self) -> bool {
        self.state == ClockState::Playing
    }

    #[inline]
    pub fn current_time_us(&self) -> i64 {
        self.current_time_us
    }

    #[inline]
    pub fn duration_us(&self) -> i64 {
        self.duration_us
    }

    pub fn set_duration_us(&mut self, duration_us: i64) {
        self.duration_us = duration_us.max(0);
    }

    /// First source attached — the transport becomes operable.
    pub fn attach(&mut self) {
        if self.state == ClockState::Idle {
            self.state = ClockState::Ready;
        }
    }

    /// Start playing, anchored at the current position. No-op unless Ready.
    pub fn play(&mut self, now_ms: i64) -> bool {
        if self.state != ClockState::Ready {
            return false;
        }
        // Play at the end restarts from the top, like any transport.
        if self.duration_us > 0 && self.current_time_us >= self.duration_us {
            self.current_time_us = 0;
        }
        self.state = ClockState::Playing;
        self.anchor_time_us = self.current_time_us;
        self.anchor_wall_ms = now_ms;
        true
    }

    /// Stop advancing; position stays where it is.
    pub fn pause(&mut self) -> bool {
        if self.state != ClockState::Playing {
            return false;
        }
        self.state = ClockState::Ready;
        true
    }

    /// Jump to `t`, clamped to [0, duration]. Valid while Ready or Playing;
    /// while playing the clock re-anchors so ticks continue from `t`.
    /// Returns the clamped target.
    pub fn seek(&mut self, t_us: i64, now_ms: i64) -> i64 {
        let t = t_us.clamp(0, self.duration_us);
        self.current_time_us = t;
        if self.state == ClockState::Playing {
            self.anchor_time_us = t;
            self.anchor_wall_ms = now_ms;
        }
        t
    }

    /// Advance to the wall-clock-derived position. Pauses at the end of the
    /// composition, pinning the position exactly to `duration_us`.
    pub fn tick(&mut self, now_ms: i64) -> Option<TickOutcome> {
        if self.state != ClockState::Playing {
            return None;
        }
        let target = self.anchor_time_us + (now_ms - self.anchor_wall_ms) * 1_000;
        if self.duration_us > 0 && target >= self.duration_us {
            self.current_time_us = self.duration_us;
            self.state = ClockState::Ready;
            return Some(TickOutcome {
                current_time_us: self.duration_us,
                reached_end:     true,
            });
        }
        self.current_time_us = target.max(0);
        Some(TickOutcome {
            current_time_us: self.current_time_us,
            reached_end:     false,
        })
    }
}

impl Default for PlaybackClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready_clock(duration_us: i64) -> PlaybackClock {
        let mut c = PlaybackClock::new();
        c.attach();
        c.set_duration_us(duration_us);
        c
    }

    #[test]
    fn idle_clock_refuses_play() {
        let mut c = PlaybackClock::new();
        assert!(!c.play(0));
        assert_eq!(c.state(), ClockState::Idle);
    }

    #[test]
    fn position_is_derived_from_wall_clock() {
        let mut c = ready_clock(10_000_000);
        assert!(c.play(1_000));
        let out = c.tick(1_500).unwrap();
        assert_eq!(out.current_time_us, 500_000);
        // A late tick lands further along — no accumulation error.
        let out = c.tick(4_000).unwrap();
        assert_eq!(out.current_time_us, 3_000_000);
    }

    #[test]
    fn tick_pauses_exactly_at_duration() {
        let mut c = ready_clock(1_000_000);
        c.play(0);
        let out = c.tick(5_000).unwrap();
        assert!(out.reached_end);
        assert_eq!(out.current_time_us, 1_000_000);
        assert_eq!(c.state(), ClockState::Ready);
        assert_eq!(c.current_time_us(), 1_000_000);
    }

    #[test]
    fn seek_clamps_to_composition_bounds() {
        let mut c = ready_clock(2_000_000);
        assert_eq!(c.seek(-5, 0), 0);
        assert_eq!(c.seek(9_999_999, 0), 2_000_000);
        assert_eq!(c.state(), ClockState::Ready);
    }

    #[test]
    fn seek_while_playing_reanchors() {
        let mut c = ready_clock(10_000_000);
        c.play(0);
        c.tick(1_000);
        c.seek(5_000_000, 1_000);
        // 250 ms after the seek, position is target + 250 ms.
        let out = c.tick(1_250).unwrap();
        assert_eq!(out.current_time_us, 5_250_000);
    }

    #[test]
    fn pause_freezes_position() {
        let mut c = ready_clock(10_000_000);
        c.play(0);
        c.tick(700);
        assert!(c.pause());
        assert_eq!(c.current_time_us(), 700_000);
        assert!(c.tick(5_000).is_none());
        assert_eq!(c.current_time_us(), 700_000);
    }

    #[test]
    fn play_after_end_restarts_from_zero() {
        let mut c = ready_clock(1_000_000);
        c.play(0);
        c.tick(2_000);
        assert_eq!(c.current_time_us(), 1_000_000);
        c.play(3_000);
        assert_eq!(c.current_time_us(), 0);
        let out = c.tick(3_100).unwrap();
        assert_eq!(out.current_time_us, 100_000);
    }

    #[test]
    fn play_pause_play_keeps_position() {
        let mut c = ready_clock(10_000_000);
        c.play(0);
        c.tick(1_000);
        c.pause();
        c.play(10_000);
        let out = c.tick(10_500).unwrap();
        assert_eq!(out.current_time_us, 1_500_000);
    }
}
