// crates/playcut-engine/src/demux.rs
//
// Progressive ISO-BMFF demuxer. Bytes arrive in order via append(); complete
// top-level boxes are parsed as soon as they are fully buffered, and samples
// become visible the moment their byte ranges exist — callers never wait for
// end-of-stream. Both layouts are handled:
//
//   plain MP4  — moov carries the full sample tables (stts/ctts/stss/stsz/
//                stsc/stco); sample payloads stream out of mdat as bytes
//                become available.
//   fMP4/CMAF  — moov carries only track headers; each moof+mdat fragment
//                contributes a batch of samples.
//
// Callbacks are rendered as return values: append/flush/finish hand back the
// DemuxEvents produced by that call, in order. A parse error is fatal for
// the source.

use bytes::{Bytes, BytesMut};
use mp4_atom::{Atom, Decode, Moof, Moov};

use playcut_core::helpers::time::rescale_to_micros;

use crate::error::{EngineError, Result};
use crate::sample_table::{AudioSample, VideoSample};

// ── Track descriptors ─────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VideoCodec {
    H264,
    H265,
    Vp9,
}

impl VideoCodec {
    pub fn name(self) -> &'static str {
        match self {
            VideoCodec::H264 => "h264",
            VideoCodec::H265 => "h265",
            VideoCodec::Vp9  => "vp9",
        }
    }
}

/// Video track descriptor handed to decoder configuration.
/// `codec_private` is the avcC/hvcC box body (header stripped); VP9 carries
/// none — the bitstream is self-describing.
#[derive(Clone, Debug)]
pub struct VideoTrackInfo {
    pub track_id:      u32,
    pub codec:         VideoCodec,
    pub width:         u32,
    pub height:        u32,
    pub codec_private: Option<Bytes>,
    pub timescale:     u32,
}

/// AAC audio track descriptor. `codec_private` is the AudioSpecificConfig.
#[derive(Clone, Debug)]
pub struct AudioTrackInfo {
    pub track_id:      u32,
    pub sample_rate:   u32,
    pub channels:      u16,
    pub codec_private: Bytes,
    pub timescale:     u32,
}

/// What one append/flush/finish call produced, in order.
#[derive(Debug)]
pub enum DemuxEvent {
    /// Header fully parsed. Emitted once.
    Ready {
        video:       VideoTrackInfo,
        audio:       Option<AudioTrackInfo>,
        duration_us: Option<i64>,
    },
    VideoSamples(Vec<VideoSample>),
    AudioSamples(Vec<AudioSample>),
    /// Terminal flush completed; every sample has been surfaced.
    Finished,
}

// ── Pending (not yet emitted) samples for plain MP4 ──────────────────────────

/// One stbl row: absolute file range plus raw-timescale timing.
struct PendingSample {
    offset:   u64,
    size:     u32,
    dts:      i64,
    cts:      i64,
    duration: i64,
    keyframe: bool,
}

// ── Demuxer ───────────────────────────────────────────────────────────────────

pub struct Demuxer {
    /// Append-only byte accumulator. Sample payloads are sliced out of this;
    /// the buffer lives as long as the owning source.
    file:      Vec<u8>,
    /// Next top-level parse position into `file`.
    parse_pos: usize,

    moov:         Option<Moov>,
    ready_sent:   bool,
    finished:     bool,
    video:        Option<VideoTrackInfo>,
    audio:        Option<AudioTrackInfo>,
    duration_us:  Option<i64>,

    /// Fragment state: the last moof waiting for its mdat, with its absolute
    /// file offset (trun data offsets are moof-relative by default).
    pending_moof: Option<(Moof, u64)>,
    /// Decode timestamp continuation per track for fragments missing tfdt.
    frag_dts:     std::collections::HashMap<u32, u64>,

    /// Plain-MP4 sample tables expanded from stbl, plus emission cursors.
    plain_video:      Vec<PendingSample>,
    plain_audio:      Vec<PendingSample>,
    next_plain_video: usize,
    next_plain_audio: usize,
}

impl Demuxer {
    pub fn new() -> Self {
        Self {
            file:             Vec::new(),
            parse_pos:        0,
            moov:             None,
            ready_sent:       false,
            finished:         false,
            video:            None,
            audio:            None,
            duration_us:      None,
            pending_moof:     None,
            frag_dts:         std::collections::HashMap::new(),
            plain_video:      Vec::new(),
            plain_audio:      Vec::new(),
            next_plain_video: 0,
            next_plain_audio: 0,
        }
    }

    /// Total bytes accepted so far — the only valid offset for the next append.
    #[inline]
    pub fn byte_offset(&self) -> u64 {
        self.file.len() as u64
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Append a chunk at `file_offset`. Offsets must be contiguous — the
    /// transport layer re-orders, not the demuxer.
    pub fn append(&mut self, bytes: &[u8], file_offset: u64) -> Result<Vec<DemuxEvent>> {
        if file_offset != self.byte_offset() {
            return Err(EngineError::DemuxParse(format!(
                "non-contiguous append: got offset {file_offset}, expected {}",
                self.byte_offset()
            )));
        }
        self.file.extend_from_slice(bytes);
        self.parse_available()
    }

    /// Parse whatever is buffered to completion. append() already parses
    /// eagerly, so this only picks up work after direct buffer manipulation.
    pub fn flush(&mut self) -> Result<Vec<DemuxEvent>> {
        self.parse_available()
    }

    /// No more bytes will arrive. Emits any tail samples and `Finished`.
    pub fn finish(&mut self) -> Result<Vec<DemuxEvent>> {
        self.finished = true;
        let mut events = self.parse_available()?;
        if !self.ready_sent {
            return Err(EngineError::DemuxParse(
                "stream ended before the header (moov) completed".into(),
            ));
        }
        if self.pending_moof.is_some() {
            return Err(EngineError::DemuxParse(
                "stream ended with a fragment header but no sample data".into(),
            ));
        }
        if self.next_plain_video < self.plain_video.len()
            || self.next_plain_audio < self.plain_audio.len()
        {
            return Err(EngineError::DemuxParse(
                "stream ended before all sample data arrived".into(),
            ));
        }
        events.push(DemuxEvent::Finished);
        Ok(events)
    }

    // ── Top-level box scan ───────────────────────────────────────────────────

    fn parse_available(&mut self) -> Result<Vec<DemuxEvent>> {
        let mut events = Vec::new();

        loop {
            let remaining = self.file.len() - self.parse_pos;
            if remaining < 8 {
                break;
            }
            let pos = self.parse_pos;
            let size32 = u32::from_be_bytes(self.file[pos..pos + 4].try_into().unwrap());
            let fourcc: [u8; 4] = self.file[pos + 4..pos + 8].try_into().unwrap();

            let (header_len, box_size) = match size32 {
                0 => {
                    // Box extends to end of file — only resolvable once the
                    // stream has finished.
                    if !self.finished {
                        break;
                    }
                    (8usize, (self.file.len() - pos) as u64)
                }
                1 => {
                    if remaining < 16 {
                        break;
                    }
                    let large =
                        u64::from_be_bytes(self.file[pos + 8..pos + 16].try_into().unwrap());
                    (16usize, large)
                }
                n => (8usize, n as u64),
            };
            if box_size < header_len as u64 {
                return Err(EngineError::DemuxParse(format!(
                    "box {} has impossible size {box_size}",
                    fourcc_str(&fourcc)
                )));
            }
            let box_end = pos as u64 + box_size;

            if &fourcc == b"mdat" {
                // Never buffered through the atom parser: fragments slice it
                // directly and plain-MP4 samples address it via stco offsets.
                if let Some((moof, moof_start)) = self.pending_moof.take() {
                    if (self.file.len() as u64) < box_end {
                        // Fragment incomplete — put the moof back and wait.
                        self.pending_moof = Some((moof, moof_start));
                        break;
                    }
                    self.extract_fragment(&moof, moof_start, &mut events)?;
                    self.parse_pos = box_end as usize;
                    continue;
                }
                if (self.file.len() as u64) < box_end {
                    // Plain mdat still streaming in; sample emission below
                    // works off availability, so just wait here.
                    break;
                }
                self.parse_pos = box_end as usize;
                continue;
            }

            // Everything else must be complete before decoding.
            if (self.file.len() as u64) < box_end {
                break;
            }

            match &fourcc {
                b"moov" => {
                    let mut slice = &self.file[pos..box_end as usize];
                    let moov = Moov::decode(&mut slice)
                        .map_err(|e| EngineError::DemuxParse(e.to_string()))?;
                    self.init_tracks(&moov, &mut events)?;
                    self.moov = Some(moov);
                }
                b"moof" => {
                    if self.pending_moof.is_some() {
                        return Err(EngineError::DemuxParse(
                            "two moof boxes without sample data between them".into(),
                        ));
                    }
                    let mut slice = &self.file[pos..box_end as usize];
                    let moof = Moof::decode(&mut slice)
                        .map_err(|e| EngineError::DemuxParse(e.to_string()))?;
                    self.pending_moof = Some((moof, pos as u64));
                }
                // ftyp/styp/free/sidx/… carry nothing the sample pipeline needs.
                _ => {}
            }

            self.parse_pos = box_end as usize;
        }

        self.emit_available_plain(&mut events);
        Ok(events)
    }

    // ── Header (moov) ────────────────────────────────────────────────────────

    fn init_tracks(&mut self, moov: &Moov, events: &mut Vec<DemuxEvent>) -> Result<()> {
        if self.ready_sent {
            return Err(EngineError::DemuxParse("duplicate moov".into()));
        }

        for trak in &moov.trak {
            let track_id = trak.tkhd.track_id;
            let timescale = trak.mdia.mdhd.timescale;
            let handler = &trak.mdia.hdlr.handler;
            let stbl = &trak.mdia.minf.stbl;

            let handler_kind = match handler.as_ref() {
                b"vide" => TrackHandler::Video,
                b"soun" => TrackHandler::Audio,
                _ => TrackHandler::Other,
            };

            if handler_kind == TrackHandler::Video && self.video.is_none() {
                let codec = match stbl.stsd.codecs.first() {
                    Some(mp4_atom::Codec::Avc1(avc1)) => {
                        let mut body = BytesMut::new();
                        avc1.avcc
                            .encode_body(&mut body)
                            .map_err(|e| EngineError::DemuxParse(e.to_string()))?;
                        VideoTrackInfo {
                            track_id,
                            codec: VideoCodec::H264,
                            width: avc1.visual.width as u32,
                            height: avc1.visual.height as u32,
                            codec_private: Some(body.freeze()),
                            timescale,
                        }
                    }
                    Some(mp4_atom::Codec::Hev1(hev1)) => {
                        let mut body = BytesMut::new();
                        hev1.hvcc
                            .encode_body(&mut body)
                            .map_err(|e| EngineError::DemuxParse(e.to_string()))?;
                        VideoTrackInfo {
                            track_id,
                            codec: VideoCodec::H265,
                            width: hev1.visual.width as u32,
                            height: hev1.visual.height as u32,
                            codec_private: Some(body.freeze()),
                            timescale,
                        }
                    }
                    Some(mp4_atom::Codec::Hvc1(hvc1)) => {
                        let mut body = BytesMut::new();
                        hvc1.hvcc
                            .encode_body(&mut body)
                            .map_err(|e| EngineError::DemuxParse(e.to_string()))?;
                        VideoTrackInfo {
                            track_id,
                            codec: VideoCodec::H265,
                            width: hvc1.visual.width as u32,
                            height: hvc1.visual.height as u32,
                            codec_private: Some(body.freeze()),
                            timescale,
                        }
                    }
                    Some(mp4_atom::Codec::Vp09(vp09)) => VideoTrackInfo {
                        track_id,
                        codec: VideoCodec::Vp9,
                        width: vp09.visual.width as u32,
                        height: vp09.visual.height as u32,
                        codec_private: None,
                        timescale,
                    },
                    Some(other) => {
                        return Err(EngineError::UnsupportedCodec(format!("{other:?}")));
                    }
                    None => {
                        return Err(EngineError::DemuxParse("video track without stsd".into()));
                    }
                };
                self.plain_video = expand_stbl(stbl, true)?;
                self.video = Some(codec);
            } else if handler_kind == TrackHandler::Audio && self.audio.is_none() {
                match stbl.stsd.codecs.first() {
                    Some(mp4_atom::Codec::Mp4a(mp4a)) => {
                        let desc = &mp4a.esds.es_desc.dec_config;
                        // 0x40 = MPEG-4 Audio (AAC). Anything else is out of contract.
                        if desc.object_type_indication != 0x40 {
                            return Err(EngineError::UnsupportedCodec(format!(
                                "mp4a object type {:#x}",
                                desc.object_type_indication
                            )));
                        }
                        let sample_rate = mp4a.audio.sample_rate.integer() as u32;
                        let channels = mp4a.audio.channel_count;
                        let asc = audio_specific_config(
                            desc.dec_specific.profile,
                            sample_rate,
                            channels as u8,
                        )?;
                        self.plain_audio = expand_stbl(stbl, false)?;
                        self.audio = Some(AudioTrackInfo {
                            track_id,
                            sample_rate,
                            channels,
                            codec_private: asc,
                            timescale,
                        });
                    }
                    Some(other) => {
                        eprintln!("[demux] skipping unsupported audio codec {other:?}");
                    }
                    None => {}
                }
            }
        }

        let video = self
            .video
            .clone()
            .ok_or_else(|| EngineError::DemuxParse("no video track".into()))?;

        // mvhd duration of 0 means "unknown" (live/streaming init segments).
        let mvhd = &moov.mvhd;
        self.duration_us = (mvhd.duration > 0 && mvhd.timescale > 0)
            .then(|| rescale_to_micros(mvhd.duration as i64, mvhd.timescale));

        self.ready_sent = true;
        events.push(DemuxEvent::Ready {
            video,
            audio: self.audio.clone(),
            duration_us: self.duration_us,
        });
        Ok(())
    }

    // ── Fragmented path (moof + mdat) ────────────────────────────────────────

    fn extract_fragment(
        &mut self,
        moof: &Moof,
        moof_start: u64,
        events: &mut Vec<DemuxEvent>,
    ) -> Result<()> {
        let moov = self
            .moov
            .as_ref()
            .ok_or_else(|| EngineError::DemuxParse("moof before moov".into()))?;

        let video_id = self.video.as_ref().map(|v| v.track_id);
        let audio_id = self.audio.as_ref().map(|a| a.track_id);

        let mut video_batch = Vec::new();
        let mut audio_batch = Vec::new();

        for traf in &moof.traf {
            let tfhd = &traf.tfhd;
            let track_id = tfhd.track_id;

            let is_video = Some(track_id) == video_id;
            let is_audio = Some(track_id) == audio_id;
            if !is_video && !is_audio {
                continue;
            }

            let trak = moov
                .trak
                .iter()
                .find(|t| t.tkhd.track_id == track_id)
                .ok_or_else(|| EngineError::DemuxParse(format!("traf for unknown track {track_id}")))?;
            let timescale = trak.mdia.mdhd.timescale;

            // trex carries the movie-level defaults the tfhd may override.
            let trex = moov
                .mvex
                .as_ref()
                .and_then(|mvex| mvex.trex.iter().find(|t| t.track_id == track_id));
            let trex_duration = trex.map(|t| t.default_sample_duration).unwrap_or_default();
            let trex_size = trex.map(|t| t.default_sample_size).unwrap_or_default();
            let trex_flags = trex.map(|t| t.default_sample_flags).unwrap_or_default();

            // Decode time: tfdt if present, else continue from the previous
            // fragment of this track.
            let mut dts: u64 = match traf.tfdt.as_ref() {
                Some(tfdt) => tfdt.base_media_decode_time,
                None => *self.frag_dts.get(&track_id).unwrap_or(&0),
            };

            for trun in &traf.trun {
                // Data offsets are relative to base_data_offset, which
                // defaults to the start of this moof.
                let base = tfhd.base_data_offset.unwrap_or(moof_start);
                let mut pos = match trun.data_offset {
                    Some(off) => base
                        .checked_add_signed(off as i64)
                        .ok_or_else(|| EngineError::DemuxParse("negative trun offset".into()))?,
                    None => base,
                };

                for entry in &trun.entries {
                    let flags = entry
                        .flags
                        .unwrap_or(tfhd.default_sample_flags.unwrap_or(trex_flags));
                    let duration = entry
                        .duration
                        .unwrap_or(tfhd.default_sample_duration.unwrap_or(trex_duration));
                    let size = entry
                        .size
                        .unwrap_or(tfhd.default_sample_size.unwrap_or(trex_size))
                        as u64;

                    let end = pos + size;
                    if end > self.file.len() as u64 {
                        return Err(EngineError::DemuxParse(format!(
                            "sample range {pos}..{end} outside buffered data"
                        )));
                    }
                    let data = Bytes::copy_from_slice(&self.file[pos as usize..end as usize]);

                    let cts = dts as i64 + entry.cts.unwrap_or_default() as i64;
                    let cts_us = rescale_to_micros(cts, timescale);
                    let duration_us = rescale_to_micros(duration as i64, timescale);

                    if is_video {
                        // sample_depends_on == 2 (depends on no other) and the
                        // non-sync bit clear mark a keyframe.
                        let depends_none = (flags >> 24) & 0x3 == 0x2;
                        let non_sync = (flags >> 16) & 0x1 == 0x1;
                        video_batch.push(VideoSample {
                            data,
                            cts_us,
                            dts_us: rescale_to_micros(dts as i64, timescale),
                            duration_us,
                            is_keyframe: depends_none && !non_sync,
                            sample_index: 0,
                        });
                    } else {
                        audio_batch.push(AudioSample { data, cts_us, duration_us });
                    }

                    dts += duration as u64;
                    pos = end;
                }
            }

            self.frag_dts.insert(track_id, dts);
        }

        if !video_batch.is_empty() {
            events.push(DemuxEvent::VideoSamples(video_batch));
        }
        if !audio_batch.is_empty() {
            events.push(DemuxEvent::AudioSamples(audio_batch));
        }
        Ok(())
    }

    // ── Plain-MP4 path (stbl tables over a streaming mdat) ───────────────────

    /// Emit every pending stbl sample whose byte range is now buffered.
    fn emit_available_plain(&mut self, events: &mut Vec<DemuxEvent>) {
        if !self.ready_sent {
            return;
        }
        let have = self.file.len() as u64;

        if let Some(video) = &self.video {
            let mut batch = Vec::new();
            while let Some(p) = self.plain_video.get(self.next_plain_video) {
                if p.offset + p.size as u64 > have {
                    break;
                }
                let range = p.offset as usize..(p.offset + p.size as u64) as usize;
                batch.push(VideoSample {
                    data:         Bytes::copy_from_slice(&self.file[range]),
                    cts_us:       rescale_to_micros(p.cts, video.timescale),
                    dts_us:       rescale_to_micros(p.dts, video.timescale),
                    duration_us:  rescale_to_micros(p.duration, video.timescale),
                    is_keyframe:  p.keyframe,
                    sample_index: 0,
                });
                self.next_plain_video += 1;
            }
            if !batch.is_empty() {
                events.push(DemuxEvent::VideoSamples(batch));
            }
        }

        if let Some(audio) = &self.audio {
            let mut batch = Vec::new();
            while let Some(p) = self.plain_audio.get(self.next_plain_audio) {
                if p.offset + p.size as u64 > have {
                    break;
                }
                let range = p.offset as usize..(p.offset + p.size as u64) as usize;
                batch.push(AudioSample {
                    data:        Bytes::copy_from_slice(&self.file[range]),
                    cts_us:      rescale_to_micros(p.cts, audio.timescale),
                    duration_us: rescale_to_micros(p.duration, audio.timescale),
                });
                self.next_plain_audio += 1;
            }
            if !batch.is_empty() {
                events.push(DemuxEvent::AudioSamples(batch));
            }
        }
    }
}

impl Default for Demuxer {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(PartialEq, Eq, Clone, Copy)]
enum TrackHandler {
    Video,
    Audio,
    Other,
}

// ── stbl expansion ────────────────────────────────────────────────────────────

/// Walk stts/ctts/stss/stsz/stsc/stco into one flat row list.
/// Empty tables (fMP4 init segments) produce an empty list.
fn expand_stbl(stbl: &mp4_atom::Stbl, is_video: bool) -> Result<Vec<PendingSample>> {
    let sizes: Vec<u32> = match &stbl.stsz.samples {
        mp4_atom::StszSamples::Identical { count, size } => vec![*size; *count as usize],
        mp4_atom::StszSamples::Different { sizes } => sizes.clone(),
    };
    if sizes.is_empty() {
        return Ok(Vec::new());
    }
    let sample_count = sizes.len();

    // Decode timestamps from stts run-lengths.
    let mut dts = Vec::with_capacity(sample_count);
    let mut durations = Vec::with_capacity(sample_count);
    let mut t: i64 = 0;
    for entry in &stbl.stts.entries {
        for _ in 0..entry.count {
            dts.push(t);
            durations.push(entry.delta as i64);
            t += entry.delta as i64;
        }
    }
    if dts.len() != sample_count {
        return Err(EngineError::DemuxParse(format!(
            "stts covers {} samples, stsz {}",
            dts.len(),
            sample_count
        )));
    }

    // Composition offsets from ctts, when present.
    let mut cts = dts.clone();
    if let Some(ctts) = &stbl.ctts {
        let mut i = 0;
        for entry in &ctts.entries {
            for _ in 0..entry.count {
                if i >= sample_count {
                    return Err(EngineError::DemuxParse("ctts overruns sample count".into()));
                }
                cts[i] = dts[i] + entry.offset as i64;
                i += 1;
            }
        }
    }

    // Keyframes: stss (1-based sample numbers) or everything when absent.
    // Audio tracks are all sync regardless.
    let mut keyframe = vec![!is_video || stbl.stss.is_none(); sample_count];
    if is_video {
        if let Some(stss) = &stbl.stss {
            for &num in &stss.entries {
                let idx = num as usize;
                if idx == 0 || idx > sample_count {
                    return Err(EngineError::DemuxParse(format!(
                        "stss entry {num} out of range"
                    )));
                }
                keyframe[idx - 1] = true;
            }
        }
    }

    // Chunk offsets: stco or co64.
    let chunk_offsets: Vec<u64> = if let Some(stco) = &stbl.stco {
        stco.entries.iter().map(|&o| o as u64).collect()
    } else if let Some(co64) = &stbl.co64 {
        co64.entries.clone()
    } else {
        return Err(EngineError::DemuxParse("stbl without stco/co64".into()));
    };

    // stsc maps chunks → samples-per-chunk runs; each run holds until the
    // next entry's first_chunk.
    let stsc = &stbl.stsc.entries;
    if stsc.is_empty() {
        return Err(EngineError::DemuxParse("empty stsc".into()));
    }

    let mut rows = Vec::with_capacity(sample_count);
    let mut sample = 0usize;
    for (chunk_idx, &chunk_offset) in chunk_offsets.iter().enumerate() {
        let chunk_number = chunk_idx as u32 + 1;
        let run = stsc
            .iter()
            .rev()
            .find(|e| e.first_chunk <= chunk_number)
            .ok_or_else(|| EngineError::DemuxParse("stsc does not cover chunk 1".into()))?;

        let mut offset = chunk_offset;
        for _ in 0..run.samples_per_chunk {
            if sample >= sample_count {
                break;
            }
            rows.push(PendingSample {
                offset,
                size:     sizes[sample],
                dts:      dts[sample],
                cts:      cts[sample],
                duration: durations[sample],
                keyframe: keyframe[sample],
            });
            offset += sizes[sample] as u64;
            sample += 1;
        }
    }
    if sample != sample_count {
        return Err(EngineError::DemuxParse(format!(
            "chunk layout covers {sample} of {sample_count} samples"
        )));
    }

    Ok(rows)
}

// ── AAC AudioSpecificConfig ───────────────────────────────────────────────────

const AAC_SAMPLE_RATES: [u32; 13] = [
    96_000, 88_200, 64_000, 48_000, 44_100, 32_000, 24_000, 22_050, 16_000, 12_000, 11_025,
    8_000, 7_350,
];

/// Build the 2-byte AudioSpecificConfig FFmpeg expects as AAC extradata:
/// 5 bits object type, 4 bits frequency index, 4 bits channel config.
fn audio_specific_config(profile: u8, sample_rate: u32, channels: u8) -> Result<Bytes> {
    let freq_index = AAC_SAMPLE_RATES
        .iter()
        .position(|&r| r == sample_rate)
        .ok_or_else(|| {
            EngineError::DemuxParse(format!("no AAC frequency index for {sample_rate} Hz"))
        })? as u8;
    // esds stores the raw audioObjectType; 0 means "unspecified", default to LC.
    let object_type = if profile == 0 { 2 } else { profile };
    let bytes = [
        (object_type << 3) | (freq_index >> 1),
        ((freq_index & 1) << 7) | ((channels & 0xF) << 3),
    ];
    Ok(Bytes::copy_from_slice(&bytes))
}

fn fourcc_str(fourcc: &[u8; 4]) -> String {
    String::from_utf8_lossy(fourcc).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal box: size + fourcc + payload.
    fn make_box(fourcc: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&((payload.len() + 8) as u32).to_be_bytes());
        out.extend_from_slice(fourcc);
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn append_rejects_non_contiguous_offsets() {
        let mut d = Demuxer::new();
        assert!(d.append(&[0u8; 4], 0).is_ok());
        assert!(matches!(
            d.append(&[0u8; 4], 100),
            Err(EngineError::DemuxParse(_))
        ));
        assert!(d.append(&[0u8; 4], 4).is_ok());
        assert_eq!(d.byte_offset(), 8);
    }

    #[test]
    fn unknown_boxes_are_skipped_across_split_appends() {
        let mut d = Demuxer::new();
        let ftyp = make_box(b"ftyp", b"isom\0\0\0\x01isomavc1");
        let free = make_box(b"free", &[0u8; 32]);

        // Feed byte-by-byte: nothing should error or emit.
        let mut offset = 0u64;
        for chunk in ftyp.iter().chain(free.iter()) {
            let events = d.append(&[*chunk], offset).unwrap();
            assert!(events.is_empty());
            offset += 1;
        }
        // Parser consumed both boxes.
        assert_eq!(d.parse_pos, (ftyp.len() + free.len()));
    }

    #[test]
    fn incomplete_box_waits_for_more_bytes() {
        let mut d = Demuxer::new();
        let free = make_box(b"free", &[0u8; 16]);
        d.append(&free[..10], 0).unwrap();
        assert_eq!(d.parse_pos, 0);
        d.append(&free[10..], 10).unwrap();
        assert_eq!(d.parse_pos, free.len());
    }

    #[test]
    fn finish_without_header_is_a_parse_error() {
        let mut d = Demuxer::new();
        d.append(&make_box(b"free", &[]), 0).unwrap();
        assert!(matches!(d.finish(), Err(EngineError::DemuxParse(_))));
    }

    #[test]
    fn undersized_box_is_rejected() {
        let mut d = Demuxer::new();
        // size 4 < 8-byte header.
        let mut bad = 4u32.to_be_bytes().to_vec();
        bad.extend_from_slice(b"free");
        assert!(matches!(
            d.append(&bad, 0),
            Err(EngineError::DemuxParse(_))
        ));
    }

    #[test]
    fn asc_encodes_aac_lc_48k_stereo() {
        // AAC-LC (2), 48 kHz (index 3), 2 channels → 0x11 0x90.
        let asc = audio_specific_config(2, 48_000, 2).unwrap();
        assert_eq!(&asc[..], &[0x11, 0x90]);
    }

    #[test]
    fn asc_encodes_44_1k() {
        // 44.1 kHz is index 4 → 0x12 0x10 for LC stereo.
        let asc = audio_specific_config(2, 44_100, 2).unwrap();
        assert_eq!(&asc[..], &[0x12, 0x10]);
    }

    #[test]
    fn asc_defaults_unspecified_profile_to_lc() {
        let asc = audio_specific_config(0, 48_000, 2).unwrap();
        assert_eq!(&asc[..], &[0x11, 0x90]);
    }

    #[test]
    fn asc_rejects_unknown_rate() {
        assert!(audio_specific_config(2, 12_345, 2).is_err());
    }
}
