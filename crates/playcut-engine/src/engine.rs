// crates/playcut-engine/src/engine.rs
//
// Engine: the render-domain orchestrator. Owns the source map, the active
// clip snapshot, the playback clock, the audio controller and the renderer.
// EngineWorker spawns it on a dedicated thread and pumps commands into it;
// the tick loop is paced by the command receive timeout at the device
// tier's target frame rate.
//
// All decoder, demuxer and compositor work happens here, serialized — the
// audio device callback is the only other thread touching engine-owned
// state, and it only sees the mixer behind its mutex.

use std::collections::HashMap;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use uuid::Uuid;

use playcut_core::commands::EngineCommand;
use playcut_core::composition::{ActiveClip, ClipKind};
use playcut_core::events::EngineEvent;

use crate::audio::{AudioController, DRIFT_CHECK_INTERVAL_US};
use crate::clock::PlaybackClock;
use crate::decode::DecoderState;
use crate::error::EngineError;
use crate::renderer::{FrameRenderer, RenderOutcome, VideoLayer};
use crate::scheduler;
use crate::source::SourceState;
use crate::tier::{self, TierParams};

/// Default display surface size; the compositor scales layers to fit.
pub const SURFACE_WIDTH: u32 = 1920;
pub const SURFACE_HEIGHT: u32 = 1080;

// ── Worker handle ─────────────────────────────────────────────────────────────

/// Handle held by external collaborators: a command sender, an event
/// receiver, and the join handle for shutdown.
pub struct EngineWorker {
    /// Engine events: lifecycle, time updates, errors, media data.
    pub events: Receiver<EngineEvent>,
    commands:   Sender<EngineCommand>,
    join:       Option<JoinHandle<()>>,
}

impl EngineWorker {
    /// Spawn the engine thread. Audio output is attached if a device
    /// exists; headless environments degrade to silent playback.
    pub fn spawn() -> Self {
        let (cmd_tx, cmd_rx) = bounded::<EngineCommand>(256);
        let (event_tx, event_rx) = bounded::<EngineEvent>(512);

        let join = thread::spawn(move || {
            let params = tier::detect().params();
            let mut engine = Engine::new(event_tx.clone(), params);
            if let Err(e) = engine.audio.attach_output() {
                eprintln!("[engine] audio output unavailable, playing silent: {e}");
            }
            let _ = event_tx.send(EngineEvent::WorkerReady);

            let epoch = Instant::now();
            let tick = Duration::from_millis((1_000 / params.target_fps.max(1)) as u64);
            loop {
                // While paused there is nothing to pace — just wake up
                // occasionally so a dropped sender is noticed.
                let timeout = if engine.clock.is_playing() {
                    tick
                } else {
                    Duration::from_millis(250)
                };
                match cmd_rx.recv_timeout(timeout) {
                    Ok(cmd) => {
                        let now_ms = epoch.elapsed().as_millis() as i64;
                        if !engine.handle_command(cmd, now_ms) {
                            break;
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => {
                        let now_ms = epoch.elapsed().as_millis() as i64;
                        engine.tick(now_ms);
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            engine.dispose_all();
        });

        Self {
            events:   event_rx,
            commands: cmd_tx,
            join:     Some(join),
        }
    }

    pub fn send(&self, cmd: EngineCommand) {
        let _ = self.commands.send(cmd);
    }

    pub fn load_source(&self, source_id: Uuid, bytes: Vec<u8>, duration_hint_us: Option<i64>) {
        self.send(EngineCommand::LoadSource { source_id, bytes, duration_hint_us });
    }

    pub fn start_source_stream(&self, source_id: Uuid, duration_hint_us: Option<i64>) {
        self.send(EngineCommand::StartSourceStream { source_id, duration_hint_us });
    }

    pub fn append_chunk(&self, source_id: Uuid, bytes: Vec<u8>, is_last: bool) {
        self.send(EngineCommand::AppendSourceChunk { source_id, bytes, is_last });
    }

    pub fn set_active_clips(
        &self,
        clips: Vec<ActiveClip>,
        has_clips_at_time: bool,
        composition_duration_us: i64,
    ) {
        self.send(EngineCommand::SetActiveClips {
            clips,
            has_clips_at_time,
            composition_duration_us,
        });
    }

    pub fn play(&self) {
        self.send(EngineCommand::Play);
    }

    pub fn pause(&self) {
        self.send(EngineCommand::Pause);
    }

    pub fn seek(&self, time_us: i64) {
        self.send(EngineCommand::Seek { time_us });
    }

    pub fn shutdown(&mut self) {
        let _ = self.commands.send(EngineCommand::Shutdown);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for EngineWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ── Engine ────────────────────────────────────────────────────────────────────

pub struct Engine {
    sources:           HashMap<Uuid, SourceState>,
    /// Snapshot of the clips around the current time, as sent by the
    /// composition collaborator; re-filtered by time every tick.
    clips:             Vec<ActiveClip>,
    has_clips_at_time: bool,

    clock:    PlaybackClock,
    audio:    AudioController,
    renderer: FrameRenderer,
    params:   TierParams,

    /// Bumped on every seek; decoded frames from older generations are
    /// discarded at drain time.
    generation: u64,

    events: Sender<EngineEvent>,

    /// Seek target still owed a SeekComplete (waiting for the first
    /// post-seek render).
    pending_seek_complete: Option<i64>,
    /// Play arrived before any source was playable; start on the first
    /// SourcePlayable.
    deferred_play:         bool,
    last_drift_check_us:   i64,
}

impl Engine {
    pub fn new(events: Sender<EngineEvent>, params: TierParams) -> Self {
        Self {
            sources:               HashMap::new(),
            clips:                 Vec::new(),
            has_clips_at_time:     false,
            clock:                 PlaybackClock::new(),
            audio:                 AudioController::new(),
            renderer:              FrameRenderer::new(SURFACE_WIDTH, SURFACE_HEIGHT),
            params,
            generation:            0,
            events,
            pending_seek_complete: None,
            deferred_play:         false,
            last_drift_check_us:   -DRIFT_CHECK_INTERVAL_US,
        }
    }

    fn emit(&self, event: EngineEvent) {
        let _ = self.events.send(event);
    }

    /// Returns false when the worker should exit.
    pub fn handle_command(&mut self, cmd: EngineCommand, now_ms: i64) -> bool {
        match cmd {
            EngineCommand::LoadSource { source_id, bytes, duration_hint_us } => {
                self.load_source(source_id, bytes, duration_hint_us, now_ms);
            }
            EngineCommand::StartSourceStream { source_id, duration_hint_us } => {
                self.sources
                    .insert(source_id, SourceState::new(source_id, true, duration_hint_us));
                self.clock.attach();
            }
            EngineCommand::AppendSourceChunk { source_id, bytes, is_last } => {
                self.append_chunk(source_id, &bytes, is_last, now_ms);
            }
            EngineCommand::RemoveSource { source_id } => {
                self.remove_source(source_id);
            }
            EngineCommand::SetActiveClips {
                clips,
                has_clips_at_time,
                composition_duration_us,
            } => {
                self.clips = clips;
                self.has_clips_at_time = has_clips_at_time;
                self.clock.set_duration_us(composition_duration_us);
                // Paused: reflect the new clip set right away.
                if !self.clock.is_playing() {
                    let t = self.clock.current_time_us();
                    self.render_paused_at(t);
                }
            }
            EngineCommand::Play => self.play(now_ms),
            EngineCommand::Pause => self.pause(),
            EngineCommand::Seek { time_us } => self.seek(time_us, now_ms, true),
            EngineCommand::SyncToTime { time_us } => {
                if self.clock.is_playing() {
                    // Re-anchor and resync audio; the loop carries on.
                    let t = self.clock.seek(time_us, now_ms);
                    self.audio.stop_all();
                    let clips = self.active_clips_at(t);
                    self.audio.schedule_all(&clips, t);
                } else {
                    self.seek(time_us, now_ms, false);
                }
            }
            EngineCommand::SetMasterVolume(v) => self.audio.set_master_volume(v),
            EngineCommand::SetMuted(m) => self.audio.set_muted(m),
            EngineCommand::RequestFirstFrame { source_id } => self.first_frame(source_id),
            EngineCommand::Shutdown => return false,
        }
        true
    }

    // ── Sources ──────────────────────────────────────────────────────────────

    fn load_source(
        &mut self,
        source_id: Uuid,
        bytes: Vec<u8>,
        duration_hint_us: Option<i64>,
        now_ms: i64,
    ) {
        let mut src = SourceState::new(source_id, false, duration_hint_us);
        self.clock.attach();

        let events = src
            .demuxer
            .append(&bytes, 0)
            .and_then(|mut evs| {
                evs.extend(src.demuxer.finish()?);
                Ok(evs)
            });
        match events {
            Ok(events) => {
                self.sources.insert(source_id, src);
                self.apply_demux(source_id, events, now_ms);
            }
            Err(e) => {
                self.emit(EngineEvent::Error {
                    message:   e.to_string(),
                    source_id: Some(source_id),
                });
            }
        }
    }

    fn append_chunk(&mut self, source_id: Uuid, bytes: &[u8], is_last: bool, now_ms: i64) {
        let Some(src) = self.sources.get_mut(&source_id) else {
            self.emit(EngineEvent::Error {
                message:   EngineError::UnknownSource(source_id).to_string(),
                source_id: Some(source_id),
            });
            return;
        };

        let offset = src.demuxer.byte_offset();
        let events = src.demuxer.append(bytes, offset).and_then(|mut evs| {
            if is_last {
                evs.extend(src.demuxer.finish()?);
            }
            Ok(evs)
        });
        match events {
            Ok(events) => self.apply_demux(source_id, events, now_ms),
            Err(e) => self.source_error(source_id, e),
        }
    }

    /// Fold demuxer output into the source, then translate the resulting
    /// lifecycle changes into engine events.
    fn apply_demux(
        &mut self,
        source_id: Uuid,
        events: Vec<crate::demux::DemuxEvent>,
        now_ms: i64,
    ) {
        let Some(src) = self.sources.get_mut(&source_id) else { return };

        let update = match src.apply(events) {
            Ok(u) => u,
            Err(e) => {
                self.source_error(source_id, e);
                return;
            }
        };

        let (duration_us, width, height, loaded) =
            (src.duration_us, src.width(), src.height(), src.table.len());
        let is_complete = src.is_ready();

        for chunk in &update.pcm {
            self.audio.ingest(source_id, chunk);
            self.emit(EngineEvent::AudioData {
                source_id,
                pcm:          chunk.pcm.clone(),
                sample_rate:  chunk.sample_rate,
                channels:     chunk.channels,
                timestamp_us: chunk.timestamp_us,
                duration_us:  chunk.duration_us,
                is_complete,
            });
        }

        if update.became_playable {
            self.emit(EngineEvent::SourcePlayable {
                source_id,
                duration_us,
                width,
                height,
                loaded_samples: loaded,
            });
            if self.deferred_play {
                self.deferred_play = false;
                self.play(now_ms);
            }
        }
        if update.became_ready {
            self.emit(EngineEvent::SourceReady { source_id, duration_us, width, height });
        }

        // A paused seek that couldn't complete yet (keyframe not demuxed)
        // retries as data lands.
        if update.new_samples > 0
            && !self.clock.is_playing()
            && (self.pending_seek_complete.is_some() || self.clock.pending_paused_render)
        {
            let t = self.clock.current_time_us();
            self.render_paused_at(t);
        }
    }

    fn remove_source(&mut self, source_id: Uuid) {
        if let Some(mut src) = self.sources.remove(&source_id) {
            src.dispose();
            self.audio.remove_source(source_id);
            self.emit(EngineEvent::SourceRemoved { source_id });
        }
    }

    /// Source-scoped failure: surface it, dispose the source, keep playing
    /// the rest of the timeline.
    fn source_error(&mut self, source_id: Uuid, error: EngineError) {
        eprintln!("[engine] source {source_id}: {error}");
        self.emit(EngineEvent::Error {
            message:   error.to_string(),
            source_id: Some(source_id),
        });
        self.remove_source(source_id);
    }

    // ── Transport ────────────────────────────────────────────────────────────

    fn play(&mut self, now_ms: i64) {
        let any_playable = self.sources.values().any(|s| s.is_playable());
        if !any_playable && !self.sources.is_empty() {
            // Deferred autoplay: start when the first source turns playable.
            self.deferred_play = true;
            return;
        }
        if !self.clock.play(now_ms) {
            return;
        }
        let t = self.clock.current_time_us();
        let clips = self.active_clips_at(t);
        self.audio.schedule_all(&clips, t);
        self.last_drift_check_us = t;
        self.emit(EngineEvent::PlaybackState { is_playing: true });
        self.emit(EngineEvent::TimeUpdate { current_time_us: t });
    }

    fn pause(&mut self) {
        self.deferred_play = false;
        if !self.clock.pause() {
            return;
        }
        self.audio.stop_all();
        self.emit(EngineEvent::PlaybackState { is_playing: false });
    }

    fn seek(&mut self, time_us: i64, now_ms: i64, emit_complete: bool) {
        let was_playing = self.clock.is_playing();
        let t = self.clock.seek(time_us, now_ms);

        // Invalidate everything decoded for the old position. Buffers are
        // cleared before any new decode is primed, so a stale frame can
        // never reach the next render.
        self.generation += 1;
        for src in self.sources.values_mut() {
            src.frames.clear();
            src.video.reset();
            src.last_queued_sample = -1;
        }
        self.audio.stop_all();

        self.pending_seek_complete = emit_complete.then_some(t);

        if was_playing {
            // Prime decoders all the way to the target; the normal tick
            // loop renders, and SeekComplete follows the first rendered
            // frame.
            self.prime_sources(t);
            let clips = self.active_clips_at(t);
            self.audio.schedule_all(&clips, t);
        } else {
            self.render_paused_at(t);
        }
        self.emit(EngineEvent::TimeUpdate { current_time_us: t });
    }

    // ── Tick ─────────────────────────────────────────────────────────────────

    pub fn tick(&mut self, now_ms: i64) {
        let Some(out) = self.clock.tick(now_ms) else {
            return;
        };
        let t = out.current_time_us;

        self.schedule_sources(t);
        self.drain_decoders();
        if self.render_at(t) == RenderOutcome::Skipped {
            // Underrun is not a pause: the previous frame stays up while the
            // decoder catches back up.
            eprintln!("[tick] buffer underrun at {t} µs, retaining last frame");
        }

        if out.reached_end {
            self.audio.stop_all();
            self.emit(EngineEvent::TimeUpdate { current_time_us: t });
            self.emit(EngineEvent::PlaybackState { is_playing: false });
            return;
        }

        if t - self.last_drift_check_us >= DRIFT_CHECK_INTERVAL_US {
            self.last_drift_check_us = t;
            let clips = self.active_clips_at(t);
            self.audio.verify_drift(t, &clips);
        }

        self.emit(EngineEvent::TimeUpdate { current_time_us: t });
    }

    /// Clips from the snapshot active at `t`, in compositor order.
    fn active_clips_at(&self, t: i64) -> Vec<ActiveClip> {
        let mut active: Vec<ActiveClip> = self
            .clips
            .iter()
            .filter(|c| c.is_active_at(t))
            .cloned()
            .collect();
        active.sort_by_key(|c| (c.track_kind.priority(), c.track_index));
        active
    }

    /// Feed every active video clip's decoder toward its source time,
    /// respecting the per-tick pacing caps.
    fn schedule_sources(&mut self, t: i64) {
        self.feed_active_sources(t, false);
    }

    /// Seek priming: feed every active video clip's decoder from its
    /// governing keyframe all the way to the target.
    fn prime_sources(&mut self, t: i64) {
        self.feed_active_sources(t, true);
    }

    fn feed_active_sources(&mut self, t: i64, prime: bool) {
        let active = self.active_clips_at(t);
        let mut failed: Vec<(Uuid, EngineError)> = Vec::new();

        for clip in active.iter().filter(|c| c.track_kind == ClipKind::Video) {
            let Some(src) = self.sources.get_mut(&clip.source_id) else {
                continue;
            };
            let source_time = clip.source_time_at(t);
            let result = if prime {
                scheduler::prime_source(src, source_time, &self.params, self.generation)
            } else {
                scheduler::schedule_source(src, source_time, &self.params, self.generation)
            };
            match result {
                Ok(()) => {}
                // Streaming source without a usable keyframe yet: retried on
                // every appended chunk, never surfaced as an error.
                Err(EngineError::SeekBeforeFirstKeyframe) => {
                    self.clock.pending_paused_render = true;
                }
                Err(e) => failed.push((clip.source_id, e)),
            }
        }
        for (id, e) in failed {
            self.source_error(id, e);
        }
    }

    /// Force reorder-held frames out of every configured decoder. The flush
    /// invalidates mid-GOP continuation, so the cursors fall back to −1 and
    /// the next feed restarts from a keyframe.
    fn flush_decoders(&mut self) {
        for src in self.sources.values_mut() {
            if src.video.state() == DecoderState::Configured {
                if let Err(e) = src.video.flush(self.generation) {
                    eprintln!("[engine] decoder flush: {e}");
                }
                src.last_queued_sample = -1;
            }
        }
    }

    /// Paused one-shot render: prime to `t`, flush the decoders' reorder
    /// latency (a paused preview can't wait for later samples to push the
    /// target frame out), and composite once. A skip leaves the render owed.
    fn render_paused_at(&mut self, t: i64) {
        self.prime_sources(t);
        self.flush_decoders();
        self.drain_decoders();
        if self.render_at(t) == RenderOutcome::Skipped {
            self.clock.pending_paused_render = true;
        }
    }

    /// Move decoded frames from each decoder's output queue into its
    /// source's frame buffer, dropping frames from stale generations.
    fn drain_decoders(&mut self) {
        let generation = self.generation;
        for src in self.sources.values_mut() {
            for frame in src.video.take_frames(generation) {
                src.frames.push(frame.handle, frame.timestamp_us);
            }
        }
    }

    /// Select one frame per active video clip and composite. Clearing to
    /// black only happens on a true gap; an under-buffered clip leaves the
    /// previous pixels up.
    fn render_at(&mut self, t: i64) -> RenderOutcome {
        let active = self.active_clips_at(t);

        // The collaborator said there are clips here but the snapshot hasn't
        // landed yet — hold the last frame rather than flashing black.
        if active.is_empty() && self.clips.is_empty() && self.has_clips_at_time {
            return RenderOutcome::Skipped;
        }

        let mut layers: Vec<VideoLayer> = Vec::new();
        let mut worst_lag_us: i64 = 0;
        for clip in active.iter().filter(|c| c.track_kind == ClipKind::Video) {
            let source_time = clip.source_time_at(t);
            // A clip whose source hasn't loaded counts as buffering, not as
            // a gap — it keeps the previous pixels up.
            let frame = self
                .sources
                .get_mut(&clip.source_id)
                .and_then(|src| src.frames.best_for(source_time));
            if let Some((_, ts)) = &frame {
                worst_lag_us = worst_lag_us.max(source_time - ts);
            }
            layers.push(VideoLayer {
                opacity: clip.opacity,
                frame,
            });
        }

        if worst_lag_us > self.params.frame_drop_threshold_ms as i64 * 1_000 {
            eprintln!("[tick] presenting {} ms behind target", worst_lag_us / 1_000);
        }

        let outcome = self.renderer.render(layers);
        if outcome == RenderOutcome::Rendered {
            self.clock.pending_paused_render = false;
            if let Some(target) = self.pending_seek_complete.take() {
                self.emit(EngineEvent::SeekComplete { time_us: target });
            }
        }
        outcome
    }

    // ── Poster frame ─────────────────────────────────────────────────────────

    /// Decode the source's first keyframe with a throwaway decoder and emit
    /// it PNG-encoded.
    fn first_frame(&mut self, source_id: Uuid) {
        let Some(src) = self.sources.get(&source_id) else {
            self.emit(EngineEvent::Error {
                message:   EngineError::UnknownSource(source_id).to_string(),
                source_id: Some(source_id),
            });
            return;
        };
        let Some(info) = src.video_info.clone() else { return };

        let mut decoder = crate::decode::VideoDecoder::new();
        let result = decoder.configure(&info).and_then(|()| {
            // First GOP only: feed until one frame comes out.
            let mut fed = 0;
            loop {
                let Some(sample) = src.table.get(fed) else { break };
                decoder.decode(sample, 0)?;
                fed += 1;
                let frames = decoder.take_frames(0);
                if let Some(first) = frames.into_iter().next() {
                    return Ok(Some(first));
                }
                if fed >= 16 {
                    break;
                }
            }
            decoder.flush(0)?;
            Ok(decoder.take_frames(0).into_iter().next())
        });

        match result {
            Ok(Some(frame)) => match encode_png(&frame.handle) {
                Ok(png) => self.emit(EngineEvent::FirstFrame {
                    source_id,
                    png,
                    width:  frame.handle.width,
                    height: frame.handle.height,
                }),
                Err(e) => eprintln!("[engine] poster encode: {e}"),
            },
            Ok(None) => eprintln!("[engine] no poster frame decodable for {source_id}"),
            Err(e) => eprintln!("[engine] poster decode: {e}"),
        }
    }

    pub fn dispose_all(&mut self) {
        for (_, mut src) in self.sources.drain() {
            src.dispose();
        }
        self.audio.stop_all();
    }
}

/// PNG-encode an RGBA frame for the FirstFrame event.
fn encode_png(frame: &playcut_core::frame::RgbaFrame) -> anyhow::Result<Vec<u8>> {
    let mut out = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut out, frame.width, frame.height);
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);
        let mut writer = encoder.write_header()?;
        writer.write_image_data(&frame.data)?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceLifecycle;
    use crate::tier::DeviceTier;
    use playcut_core::frame::RgbaFrame;
    use std::sync::Arc;

    fn test_engine() -> (Engine, Receiver<EngineEvent>) {
        let (tx, rx) = bounded(4096);
        (Engine::new(tx, DeviceTier::Medium.params()), rx)
    }

    /// A playable source with no real decoder behind it; frames are pushed
    /// into its buffer directly.
    fn synthetic_source(engine: &mut Engine, id: Uuid) {
        let mut src = SourceState::new(id, false, Some(10_000_000));
        src.lifecycle = SourceLifecycle::Ready;
        engine.sources.insert(id, src);
        engine.clock.attach();
    }

    fn video_clip(source_id: Uuid, start: i64, src_start: i64, src_end: i64) -> ActiveClip {
        ActiveClip {
            clip_id:           Uuid::new_v4(),
            source_id,
            track_kind:        ClipKind::Video,
            track_index:       0,
            timeline_start_us: start,
            source_start_us:   src_start,
            source_end_us:     src_end,
            opacity:           1.0,
            volume:            1.0,
        }
    }

    fn push_frame(engine: &mut Engine, source: Uuid, ts: i64, rgba: [u8; 4]) {
        let src = engine.sources.get_mut(&source).unwrap();
        src.frames.push(Arc::new(RgbaFrame::solid(4, 4, rgba)), ts);
    }

    fn drain(rx: &Receiver<EngineEvent>) -> Vec<EngineEvent> {
        rx.try_iter().collect()
    }

    #[test]
    fn play_before_any_playable_source_defers() {
        let (mut engine, rx) = test_engine();
        let id = Uuid::new_v4();
        let mut src = SourceState::new(id, true, None);
        src.lifecycle = SourceLifecycle::Loading;
        engine.sources.insert(id, src);
        engine.clock.attach();

        engine.handle_command(EngineCommand::Play, 0);
        assert!(engine.deferred_play);
        assert!(!engine.clock.is_playing());
        assert!(drain(&rx)
            .iter()
            .all(|e| !matches!(e, EngineEvent::PlaybackState { .. })));
    }

    #[test]
    fn gap_renders_black_and_clip_renders_frame() {
        let (mut engine, _rx) = test_engine();
        let id = Uuid::new_v4();
        synthetic_source(&mut engine, id);
        // Clip covers [0, 2 s); gap until the next clip at 3 s.
        engine.clips = vec![
            video_clip(id, 0, 0, 2_000_000),
            video_clip(id, 3_000_000, 0, 1_000_000),
        ];
        engine.has_clips_at_time = true;
        push_frame(&mut engine, id, 1_000_000, [50, 60, 70, 255]);

        // Inside the first clip.
        assert_eq!(engine.render_at(1_000_000), RenderOutcome::Rendered);
        assert_eq!(engine.renderer.surface_pixel(0, 0), [50, 60, 70, 255]);

        // In the gap: true gap → black.
        assert_eq!(engine.render_at(2_500_000), RenderOutcome::Rendered);
        assert_eq!(engine.renderer.surface_pixel(0, 0), [0, 0, 0, 255]);
    }

    #[test]
    fn underbuffered_clip_retains_previous_pixels() {
        let (mut engine, _rx) = test_engine();
        let id = Uuid::new_v4();
        synthetic_source(&mut engine, id);
        engine.clips = vec![video_clip(id, 0, 0, 5_000_000)];
        push_frame(&mut engine, id, 0, [10, 20, 30, 255]);

        assert_eq!(engine.render_at(0), RenderOutcome::Rendered);

        // Buffer runs dry mid-clip: retain, don't flash black.
        engine.sources.get_mut(&id).unwrap().frames.clear();
        assert_eq!(engine.render_at(1_000_000), RenderOutcome::Skipped);
        assert_eq!(engine.renderer.surface_pixel(0, 0), [10, 20, 30, 255]);
    }

    #[test]
    fn two_layers_composite_with_opacity() {
        let (mut engine, _rx) = test_engine();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        synthetic_source(&mut engine, a);
        synthetic_source(&mut engine, b);

        let mut top = video_clip(b, 2_000_000, 0, 3_000_000);
        top.track_index = 1;
        top.opacity = 0.5;
        engine.clips = vec![top, video_clip(a, 0, 0, 5_000_000)];

        push_frame(&mut engine, a, 3_000_000, [100, 100, 100, 255]);
        push_frame(&mut engine, b, 1_000_000, [200, 200, 200, 255]);

        assert_eq!(engine.render_at(3_000_000), RenderOutcome::Rendered);
        let px = engine.renderer.surface_pixel(0, 0);
        for c in 0..3 {
            assert!((px[c] as i32 - 150).abs() <= 1, "channel {c} = {}", px[c]);
        }
    }

    #[test]
    fn paused_seek_emits_seek_complete_after_render() {
        let (mut engine, rx) = test_engine();
        let id = Uuid::new_v4();
        synthetic_source(&mut engine, id);
        engine.clips = vec![video_clip(id, 0, 0, 10_000_000)];
        engine.clock.set_duration_us(10_000_000);

        push_frame(&mut engine, id, 3_300_000, [1, 2, 3, 255]);
        engine.handle_command(EngineCommand::Seek { time_us: 3_333_333 }, 0);

        // Seek cleared the pre-seek buffer…
        assert_eq!(engine.generation, 1);
        // …so the first render skipped and SeekComplete is still owed.
        let events = drain(&rx);
        assert!(!events
            .iter()
            .any(|e| matches!(e, EngineEvent::SeekComplete { .. })));
        assert!(engine.pending_seek_complete.is_some());

        // Frames for the target arrive (as if the primed decode finished).
        push_frame(&mut engine, id, 3_300_000, [1, 2, 3, 255]);
        assert_eq!(engine.render_at(3_333_333), RenderOutcome::Rendered);
        let events = drain(&rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, EngineEvent::SeekComplete { time_us: 3_333_333 })));
    }

    #[test]
    fn seek_is_idempotent_for_selection() {
        // seek(t); seek(t) shows the same frame as a single seek(t).
        let (mut engine, _rx) = test_engine();
        let id = Uuid::new_v4();
        synthetic_source(&mut engine, id);
        engine.clips = vec![video_clip(id, 0, 0, 10_000_000)];
        engine.clock.set_duration_us(10_000_000);

        engine.handle_command(EngineCommand::Seek { time_us: 2_000_000 }, 0);
        push_frame(&mut engine, id, 1_966_000, [7, 8, 9, 255]);
        engine.render_at(2_000_000);
        let first = engine.renderer.surface_pixel(0, 0);

        engine.handle_command(EngineCommand::Seek { time_us: 2_000_000 }, 5);
        push_frame(&mut engine, id, 1_966_000, [7, 8, 9, 255]);
        engine.render_at(2_000_000);
        assert_eq!(engine.renderer.surface_pixel(0, 0), first);
    }

    #[test]
    fn set_active_clips_while_paused_rerenders() {
        // A clip edit while paused must refresh the preview immediately —
        // no play/seek required.
        let (mut engine, _rx) = test_engine();
        let id = Uuid::new_v4();
        synthetic_source(&mut engine, id);
        push_frame(&mut engine, id, 0, [40, 50, 60, 255]);

        engine.handle_command(
            EngineCommand::SetActiveClips {
                clips:                   vec![video_clip(id, 0, 0, 5_000_000)],
                has_clips_at_time:       true,
                composition_duration_us: 5_000_000,
            },
            0,
        );
        assert_eq!(engine.renderer.surface_pixel(0, 0), [40, 50, 60, 255]);
    }

    #[test]
    fn playback_reaches_end_and_pauses() {
        let (mut engine, rx) = test_engine();
        let id = Uuid::new_v4();
        synthetic_source(&mut engine, id);
        engine.clips = vec![video_clip(id, 0, 0, 1_000_000)];
        engine.clock.set_duration_us(1_000_000);

        engine.handle_command(EngineCommand::Play, 0);
        assert!(engine.clock.is_playing());
        drain(&rx);

        // Ticks advance monotonically…
        engine.tick(100);
        engine.tick(500);
        let times: Vec<i64> = drain(&rx)
            .iter()
            .filter_map(|e| match e {
                EngineEvent::TimeUpdate { current_time_us } => Some(*current_time_us),
                _ => None,
            })
            .collect();
        assert!(times.windows(2).all(|w| w[0] <= w[1]));

        // …and the end pins to the exact duration and pauses.
        engine.tick(1_500);
        let events = drain(&rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, EngineEvent::TimeUpdate { current_time_us: 1_000_000 })));
        assert!(events
            .iter()
            .any(|e| matches!(e, EngineEvent::PlaybackState { is_playing: false })));
        assert!(!engine.clock.is_playing());
        assert_eq!(engine.clock.current_time_us(), 1_000_000);
    }

    #[test]
    fn seek_bumps_generation_and_clears_buffers() {
        let (mut engine, _rx) = test_engine();
        let id = Uuid::new_v4();
        synthetic_source(&mut engine, id);
        engine.clips = vec![video_clip(id, 0, 0, 10_000_000)];
        engine.clock.set_duration_us(10_000_000);
        push_frame(&mut engine, id, 0, [9, 9, 9, 255]);

        engine.handle_command(EngineCommand::Seek { time_us: 5_000_000 }, 0);
        let src = engine.sources.get(&id).unwrap();
        assert_eq!(engine.generation, 1);
        assert!(src.frames.is_empty());
        assert_eq!(src.last_queued_sample, -1);
    }

    #[test]
    fn remove_source_disposes_and_reports() {
        let (mut engine, rx) = test_engine();
        let id = Uuid::new_v4();
        synthetic_source(&mut engine, id);
        engine.handle_command(EngineCommand::RemoveSource { source_id: id }, 0);
        assert!(engine.sources.is_empty());
        assert!(drain(&rx)
            .iter()
            .any(|e| matches!(e, EngineEvent::SourceRemoved { .. })));
    }

    #[test]
    fn unknown_append_reports_scoped_error() {
        let (mut engine, rx) = test_engine();
        engine.handle_command(
            EngineCommand::AppendSourceChunk {
                source_id: Uuid::new_v4(),
                bytes:     vec![0; 16],
                is_last:   false,
            },
            0,
        );
        assert!(drain(&rx).iter().any(|e| matches!(
            e,
            EngineEvent::Error { source_id: Some(_), .. }
        )));
    }

    #[test]
    fn worker_spawns_and_shuts_down() {
        let mut worker = EngineWorker::spawn();
        let ready = worker
            .events
            .recv_timeout(Duration::from_secs(5))
            .expect("worker never came up");
        assert!(matches!(ready, EngineEvent::WorkerReady));
        worker.shutdown();
    }
}
