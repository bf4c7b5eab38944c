// crates/playcut-core/src/helpers/time.rs
//
// Shared time math. Every timestamp in playcut is a signed 64-bit count of
// microseconds; container timescales are converted exactly once, on ingest.

pub const MICROS_PER_SEC: i64 = 1_000_000;
pub const MICROS_PER_MS: i64 = 1_000;

/// Rescale a container timestamp to microseconds: `round(value * 1e6 / timescale)`.
///
/// Computed in i128 so a 4-hour 90 kHz track doesn't overflow the
/// intermediate product. `value` may be negative (ctts offsets can push a
/// composition time below zero on the first samples of some encoders).
#[inline]
pub fn rescale_to_micros(value: i64, timescale: u32) -> i64 {
    debug_assert!(timescale > 0, "rescale_to_micros: zero timescale");
    let ts = timescale as i128;
    let scaled = value as i128 * MICROS_PER_SEC as i128;
    // div_euclid + adjusted half gives round-half-up for both signs.
    ((scaled + ts / 2).div_euclid(ts)) as i64
}

#[inline]
pub fn ms_to_us(ms: i64) -> i64 {
    ms * MICROS_PER_MS
}

#[inline]
pub fn us_to_secs_f64(us: i64) -> f64 {
    us as f64 / MICROS_PER_SEC as f64
}

#[inline]
pub fn secs_f64_to_us(secs: f64) -> i64 {
    (secs * MICROS_PER_SEC as f64).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rescale_common_timescales() {
        // 90 kHz (MPEG) — one tick is 11.11… µs.
        assert_eq!(rescale_to_micros(90_000, 90_000), 1_000_000);
        assert_eq!(rescale_to_micros(3_003, 90_000), 33_367); // one 29.97 fps frame
        // 1000 (ms timescale) maps 1:1000.
        assert_eq!(rescale_to_micros(1, 1_000), 1_000);
        // 30 fps in a 30 000 timescale.
        assert_eq!(rescale_to_micros(1_001, 30_000), 33_367);
    }

    #[test]
    fn rescale_rounds_to_nearest() {
        // 1/3 µs should round down, 2/3 up.
        assert_eq!(rescale_to_micros(1, 3_000_000), 0);
        assert_eq!(rescale_to_micros(2, 3_000_000), 1);
    }

    #[test]
    fn rescale_negative_values() {
        assert_eq!(rescale_to_micros(-90_000, 90_000), -1_000_000);
    }

    #[test]
    fn rescale_no_overflow_on_long_track() {
        // 4 hours at 90 kHz.
        let four_hours_ticks = 4 * 3600 * 90_000_i64;
        assert_eq!(
            rescale_to_micros(four_hours_ticks, 90_000),
            4 * 3600 * MICROS_PER_SEC
        );
    }

    #[test]
    fn secs_round_trip() {
        assert_eq!(secs_f64_to_us(1.5), 1_500_000);
        assert!((us_to_secs_f64(1_500_000) - 1.5).abs() < 1e-9);
    }
}
