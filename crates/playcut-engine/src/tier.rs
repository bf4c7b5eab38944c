// crates/playcut-engine/src/tier.rs
//
// Device-tier detection and the knobs derived from it. Detected once at
// startup from the logical core count and immutable afterward — the only
// process-wide state in the engine. Tier affects internal queue depths and
// pacing only, never observable output.

use std::sync::OnceLock;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceTier {
    Low,
    Medium,
    High,
}

/// Scheduler and pacing knobs for one tier.
#[derive(Clone, Copy, Debug)]
pub struct TierParams {
    /// Decoder backpressure limit: skip feeding a source once this many
    /// samples are in flight.
    pub max_pending:             usize,
    /// How far past the target sample the scheduler queues ahead.
    pub look_ahead_samples:      usize,
    /// A frame older than this at presentation time counts as dropped.
    pub frame_drop_threshold_ms: u64,
    /// Display tick rate the worker loop paces itself at.
    pub target_fps:              u32,
}

impl DeviceTier {
    pub fn params(self) -> TierParams {
        match self {
            DeviceTier::Low => TierParams {
                max_pending:             4,
                look_ahead_samples:      4,
                frame_drop_threshold_ms: 50,
                target_fps:              24,
            },
            DeviceTier::Medium => TierParams {
                max_pending:             8,
                look_ahead_samples:      8,
                frame_drop_threshold_ms: 33,
                target_fps:              30,
            },
            DeviceTier::High => TierParams {
                max_pending:             16,
                look_ahead_samples:      12,
                frame_drop_threshold_ms: 16,
                target_fps:              60,
            },
        }
    }

    fn from_core_count(cores: usize) -> Self {
        match cores {
            0..=4  => DeviceTier::Low,
            5..=8  => DeviceTier::Medium,
            _      => DeviceTier::High,
        }
    }
}

static DETECTED: OnceLock<DeviceTier> = OnceLock::new();

/// Tier for this machine, detected on first call and cached.
pub fn detect() -> DeviceTier {
    *DETECTED.get_or_init(|| {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        let tier = DeviceTier::from_core_count(cores);
        eprintln!("[tier] {cores} logical cores → {tier:?}");
        tier
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_count_mapping() {
        assert_eq!(DeviceTier::from_core_count(2), DeviceTier::Low);
        assert_eq!(DeviceTier::from_core_count(4), DeviceTier::Low);
        assert_eq!(DeviceTier::from_core_count(6), DeviceTier::Medium);
        assert_eq!(DeviceTier::from_core_count(8), DeviceTier::Medium);
        assert_eq!(DeviceTier::from_core_count(16), DeviceTier::High);
    }

    #[test]
    fn pending_limits_scale_with_tier() {
        assert_eq!(DeviceTier::Low.params().max_pending, 4);
        assert_eq!(DeviceTier::Medium.params().max_pending, 8);
        assert_eq!(DeviceTier::High.params().max_pending, 16);
    }
}
