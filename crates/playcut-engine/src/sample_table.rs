// crates/playcut-engine/src/sample_table.rs
//
// The per-source video sample table the demuxer fills and the scheduler
// searches. Rows are stored in decode (container) order; composition
// timestamps are non-decreasing per the demuxer contract, so both lookups
// are binary searches. Keyframe indices are cached in a sorted side list.

use bytes::Bytes;

/// One encoded video access unit.
#[derive(Clone, Debug)]
pub struct VideoSample {
    pub data:         Bytes,
    pub cts_us:       i64,
    pub dts_us:       i64,
    pub duration_us:  i64,
    pub is_keyframe:  bool,
    /// Position in the table; also the decode order.
    pub sample_index: usize,
}

/// One encoded audio access unit. AAC frames are all independently
/// decodable, so no keyframe flag is carried.
#[derive(Clone, Debug)]
pub struct AudioSample {
    pub data:        Bytes,
    pub cts_us:      i64,
    pub duration_us: i64,
}

#[derive(Default)]
pub struct SampleTable {
    samples:   Vec<VideoSample>,
    /// Sorted indices of keyframe samples.
    keyframes: Vec<usize>,
}

impl SampleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one sample in decode order. The index recorded on the sample
    /// is overwritten with its table position.
    pub fn push(&mut self, mut sample: VideoSample) {
        sample.sample_index = self.samples.len();
        if sample.is_keyframe {
            self.keyframes.push(sample.sample_index);
        }
        self.samples.push(sample);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<&VideoSample> {
        self.samples.get(index)
    }

    #[inline]
    pub fn last_index(&self) -> Option<usize> {
        self.samples.len().checked_sub(1)
    }

    pub fn keyframe_count(&self) -> usize {
        self.keyframes.len()
    }

    /// End of the last sample in source time — the observed duration.
    pub fn end_us(&self) -> Option<i64> {
        self.samples
            .iter()
            .map(|s| s.cts_us + s.duration_us)
            .max()
    }

    /// Smallest index whose `cts_us ≥ t_us` — the sample the scheduler
    /// decodes *toward*. None when every sample is before `t_us`.
    pub fn sample_at_or_after(&self, t_us: i64) -> Option<usize> {
        let idx = self.samples.partition_point(|s| s.cts_us < t_us);
        (idx < self.samples.len()).then_some(idx)
    }

    /// Largest index whose `cts_us ≤ t_us` — the frame that should be on
    /// screen at `t_us`. None when `t_us` precedes the first sample.
    pub fn latest_sample_at(&self, t_us: i64) -> Option<usize> {
        let idx = self.samples.partition_point(|s| s.cts_us <= t_us);
        idx.checked_sub(1)
    }

    /// Largest keyframe index `≤ sample_index` — where a decoder must
    /// (re)start to reach `sample_index`.
    pub fn keyframe_at_or_before(&self, sample_index: usize) -> Option<usize> {
        let idx = self.keyframes.partition_point(|&k| k <= sample_index);
        idx.checked_sub(1).map(|i| self.keyframes[i])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 10 samples at 33 367 µs spacing (30 fps), keyframes every 5.
    fn table_30fps(n: usize) -> SampleTable {
        let mut t = SampleTable::new();
        for i in 0..n {
            t.push(VideoSample {
                data:         Bytes::from_static(b"x"),
                cts_us:       i as i64 * 33_367,
                dts_us:       i as i64 * 33_367,
                duration_us:  33_367,
                is_keyframe:  i % 5 == 0,
                sample_index: 0,
            });
        }
        t
    }

    #[test]
    fn indices_follow_push_order() {
        let t = table_30fps(10);
        assert_eq!(t.len(), 10);
        for i in 0..10 {
            assert_eq!(t.get(i).unwrap().sample_index, i);
        }
    }

    #[test]
    fn sample_at_or_after_boundaries() {
        let t = table_30fps(10);
        assert_eq!(t.sample_at_or_after(0), Some(0));
        assert_eq!(t.sample_at_or_after(1), Some(1));
        assert_eq!(t.sample_at_or_after(33_367), Some(1));
        assert_eq!(t.sample_at_or_after(9 * 33_367), Some(9));
        assert_eq!(t.sample_at_or_after(9 * 33_367 + 1), None);
    }

    #[test]
    fn latest_sample_at_boundaries() {
        let t = table_30fps(10);
        assert_eq!(t.latest_sample_at(-1), None);
        assert_eq!(t.latest_sample_at(0), Some(0));
        assert_eq!(t.latest_sample_at(33_366), Some(0));
        assert_eq!(t.latest_sample_at(33_367), Some(1));
        assert_eq!(t.latest_sample_at(i64::MAX), Some(9));
    }

    #[test]
    fn keyframe_lookup_snaps_backward() {
        let t = table_30fps(12); // keyframes at 0, 5, 10
        assert_eq!(t.keyframe_count(), 3);
        assert_eq!(t.keyframe_at_or_before(0), Some(0));
        assert_eq!(t.keyframe_at_or_before(4), Some(0));
        assert_eq!(t.keyframe_at_or_before(5), Some(5));
        assert_eq!(t.keyframe_at_or_before(9), Some(5));
        assert_eq!(t.keyframe_at_or_before(11), Some(10));
    }

    #[test]
    fn observed_end_matches_last_sample() {
        let t = table_30fps(10);
        assert_eq!(t.end_us(), Some(10 * 33_367));
        assert!(SampleTable::new().end_us().is_none());
    }
}
