// crates/playcut-core/src/composition.rs
//
// Pure composition data — tracks of clips over media sources. No runtime
// handles; sources are referenced by id and resolved through the engine's
// source map. Serializable via serde so external collaborators can persist
// and ship snapshots across the worker boundary.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What a clip feeds: the video compositor, the audio mixer, or one of the
/// overlay collaborators that consume composited output downstream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClipKind {
    Video,
    Audio,
    Subtitle,
    Overlay,
}

impl ClipKind {
    /// Z-priority between kinds: video layers first (bottom), then audio
    /// (no Z meaning, kept before the overlay collaborators), then
    /// subtitle/overlay which draw above all video.
    #[inline]
    pub fn priority(self) -> u8 {
        match self {
            ClipKind::Video    => 0,
            ClipKind::Audio    => 1,
            ClipKind::Subtitle => 2,
            ClipKind::Overlay  => 3,
        }
    }
}

/// A placement of a source interval on the timeline.
///
/// Invariants (enforced by the editing collaborator, debug-asserted here):
/// `source_end_us > source_start_us ≥ 0`. For streaming sources
/// `source_end_us` may run past the currently-known source duration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Clip {
    pub id:                Uuid,
    pub source_id:         Uuid,
    pub kind:              ClipKind,
    pub timeline_start_us: i64,
    pub source_start_us:   i64,
    pub source_end_us:     i64,
    /// Blend weight for video layers, [0, 1].
    #[serde(default = "default_opacity")]
    pub opacity:           f32,
    /// Gain for audio clips, [0, 1]. Applied on top of the master gain.
    #[serde(default = "default_volume")]
    pub volume:            f32,
}

fn default_opacity() -> f32 { 1.0 }
fn default_volume() -> f32 { 1.0 }

impl Clip {
    /// Length the clip occupies on the timeline.
    #[inline]
    pub fn effective_duration_us(&self) -> i64 {
        self.source_end_us - self.source_start_us
    }

    /// Timeline instant just past the clip (exclusive end).
    #[inline]
    pub fn timeline_end_us(&self) -> i64 {
        self.timeline_start_us + self.effective_duration_us()
    }

    /// Half-open activity test: active at `timeline_start`, inactive at
    /// `timeline_start + duration`.
    #[inline]
    pub fn is_active_at(&self, t_us: i64) -> bool {
        t_us >= self.timeline_start_us && t_us < self.timeline_end_us()
    }
}

/// An ordered lane of non-overlapping clips. `index` is the Z-order within
/// the track's kind — lower indices composite beneath higher ones.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Track {
    pub kind:  ClipKind,
    pub index: u32,
    pub clips: Vec<Clip>,
}

impl Track {
    pub fn new(kind: ClipKind, index: u32) -> Self {
        Self { kind, index, clips: Vec::new() }
    }
}

/// Derived view of one clip at a query time. Computed fresh on every
/// `active_clips_at` call and never stored — all cross-links stay id-based.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ActiveClip {
    pub clip_id:           Uuid,
    pub source_id:         Uuid,
    pub track_kind:        ClipKind,
    pub track_index:       u32,
    pub timeline_start_us: i64,
    pub source_start_us:   i64,
    pub source_end_us:     i64,
    pub opacity:           f32,
    pub volume:            f32,
}

impl ActiveClip {
    fn from_clip(clip: &Clip, track: &Track) -> Self {
        Self {
            clip_id:           clip.id,
            source_id:         clip.source_id,
            track_kind:        track.kind,
            track_index:       track.index,
            timeline_start_us: clip.timeline_start_us,
            source_start_us:   clip.source_start_us,
            source_end_us:     clip.source_end_us,
            opacity:           clip.opacity,
            volume:            clip.volume,
        }
    }

    /// Translate a timeline instant into this clip's source time.
    #[inline]
    pub fn source_time_at(&self, timeline_us: i64) -> i64 {
        timeline_us - self.timeline_start_us + self.source_start_us
    }

    #[inline]
    pub fn timeline_end_us(&self) -> i64 {
        self.timeline_start_us + (self.source_end_us - self.source_start_us)
    }

    /// Same half-open test as [`Clip::is_active_at`], usable on snapshots
    /// that outlive the composition they were computed from.
    #[inline]
    pub fn is_active_at(&self, t_us: i64) -> bool {
        t_us >= self.timeline_start_us && t_us < self.timeline_end_us()
    }
}

// ── Composition ───────────────────────────────────────────────────────────────

/// The edit decision list: ordered tracks of clips plus the set of sources
/// they may reference. Owned by the editing collaborator; the engine sees
/// `ActiveClip` snapshots derived from it.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Composition {
    pub tracks:  Vec<Track>,
    /// Sources registered with the engine. Clips referencing unregistered
    /// sources still count toward duration — data may simply not be loaded yet.
    registered:  Vec<Uuid>,
}

impl Composition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_source(&mut self, source_id: Uuid) {
        if !self.registered.contains(&source_id) {
            self.registered.push(source_id);
        }
    }

    pub fn unregister_source(&mut self, source_id: Uuid) {
        self.registered.retain(|id| *id != source_id);
    }

    pub fn is_registered(&self, source_id: Uuid) -> bool {
        self.registered.contains(&source_id)
    }

    /// Every clip active at `t_us`, ordered bottom-to-top for the
    /// compositor: video tracks first (ascending track index), then the
    /// other kinds by priority. A clip ending exactly at `t_us` is NOT
    /// active (half-open interval).
    pub fn active_clips_at(&self, t_us: i64) -> Vec<ActiveClip> {
        let mut active: Vec<ActiveClip> = self
            .tracks
            .iter()
            .flat_map(|track| {
                track
                    .clips
                    .iter()
                    .filter(move |c| c.is_active_at(t_us))
                    .map(move |c| ActiveClip::from_clip(c, track))
            })
            .collect();
        active.sort_by_key(|a| (a.track_kind.priority(), a.track_index));
        active
    }

    /// Total timeline length: the furthest clip end across all tracks,
    /// independent of how much source data has actually loaded.
    pub fn duration_us(&self) -> i64 {
        self.tracks
            .iter()
            .flat_map(|t| t.clips.iter())
            .map(|c| c.timeline_end_us())
            .max()
            .unwrap_or(0)
    }

    // ── Lookups ──────────────────────────────────────────────────────────────

    /// The clip whose `id` matches, searching every track.
    pub fn clip(&self, id: Uuid) -> Option<&Clip> {
        self.tracks
            .iter()
            .flat_map(|t| t.clips.iter())
            .find(|c| c.id == id)
    }

    /// All clips of one kind, in track order.
    pub fn clips_of_kind(&self, kind: ClipKind) -> impl Iterator<Item = &Clip> {
        self.tracks
            .iter()
            .filter(move |t| t.kind == kind)
            .flat_map(|t| t.clips.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clip(source: Uuid, kind: ClipKind, start: i64, src_start: i64, src_end: i64) -> Clip {
        Clip {
            id: Uuid::new_v4(),
            source_id: source,
            kind,
            timeline_start_us: start,
            source_start_us: src_start,
            source_end_us: src_end,
            opacity: 1.0,
            volume: 1.0,
        }
    }

    fn one_clip_composition(start: i64, src_start: i64, src_end: i64) -> Composition {
        let mut comp = Composition::new();
        let mut track = Track::new(ClipKind::Video, 0);
        track.clips.push(clip(Uuid::new_v4(), ClipKind::Video, start, src_start, src_end));
        comp.tracks.push(track);
        comp
    }

    #[test]
    fn clip_boundary_is_half_open() {
        // Active at start, inactive exactly at start + duration.
        let comp = one_clip_composition(1_000_000, 0, 2_000_000);
        assert_eq!(comp.active_clips_at(1_000_000).len(), 1);
        assert_eq!(comp.active_clips_at(2_999_999).len(), 1);
        assert_eq!(comp.active_clips_at(3_000_000).len(), 0);
        assert_eq!(comp.active_clips_at(999_999).len(), 0);
    }

    #[test]
    fn duration_is_exclusive_end() {
        let comp = one_clip_composition(0, 0, 10_000_000);
        assert_eq!(comp.duration_us(), 10_000_000);
        // Property 6: empty at duration, non-empty one µs before.
        assert!(comp.active_clips_at(comp.duration_us()).is_empty());
        assert_eq!(comp.active_clips_at(comp.duration_us() - 1).len(), 1);
    }

    #[test]
    fn duration_spans_gaps() {
        let src = Uuid::new_v4();
        let mut comp = Composition::new();
        let mut track = Track::new(ClipKind::Video, 0);
        track.clips.push(clip(src, ClipKind::Video, 0, 0, 2_000_000));
        track.clips.push(clip(src, ClipKind::Video, 3_000_000, 0, 1_000_000));
        comp.tracks.push(track);

        assert_eq!(comp.duration_us(), 4_000_000);
        // Mid-gap: no active clips.
        assert!(comp.active_clips_at(2_500_000).is_empty());
        assert_eq!(comp.active_clips_at(3_000_000).len(), 1);
    }

    #[test]
    fn active_clips_ordered_bottom_to_top() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut comp = Composition::new();

        // Insert out of order on purpose: overlay track, then video-1, then video-0.
        let mut overlay = Track::new(ClipKind::Overlay, 0);
        overlay.clips.push(clip(b, ClipKind::Overlay, 0, 0, 5_000_000));
        let mut v1 = Track::new(ClipKind::Video, 1);
        v1.clips.push(clip(b, ClipKind::Video, 2_000_000, 0, 3_000_000));
        let mut v0 = Track::new(ClipKind::Video, 0);
        v0.clips.push(clip(a, ClipKind::Video, 0, 0, 5_000_000));
        comp.tracks.push(overlay);
        comp.tracks.push(v1);
        comp.tracks.push(v0);

        let active = comp.active_clips_at(3_000_000);
        assert_eq!(active.len(), 3);
        assert_eq!(active[0].track_kind, ClipKind::Video);
        assert_eq!(active[0].track_index, 0);
        assert_eq!(active[1].track_kind, ClipKind::Video);
        assert_eq!(active[1].track_index, 1);
        assert_eq!(active[2].track_kind, ClipKind::Overlay);
    }

    #[test]
    fn source_time_translation() {
        // Clip placed at 2 s, trimmed to start 500 ms into the source.
        let comp = {
            let mut c = Composition::new();
            let mut t = Track::new(ClipKind::Video, 0);
            let mut cl = clip(Uuid::new_v4(), ClipKind::Video, 2_000_000, 500_000, 3_500_000);
            cl.opacity = 0.5;
            t.clips.push(cl);
            c.tracks.push(t);
            c
        };
        let active = comp.active_clips_at(3_000_000);
        assert_eq!(active.len(), 1);
        // 1 s into the clip + 500 ms trim = 1.5 s source time.
        assert_eq!(active[0].source_time_at(3_000_000), 1_500_000);
        assert_eq!(active[0].opacity, 0.5);
    }

    #[test]
    fn register_unregister_round_trip() {
        let mut comp = Composition::new();
        let id = Uuid::new_v4();
        comp.register_source(id);
        comp.register_source(id); // idempotent
        assert!(comp.is_registered(id));
        comp.unregister_source(id);
        assert!(!comp.is_registered(id));
    }
}
