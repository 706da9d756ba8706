//! Tick period and percentage helpers.

/// Number of microseconds in one second.
pub const MICROS_PER_SEC: u64 = 1_000_000;

/// Compute the tick period in microseconds for a given rate in Hz.
/// - Clamps `hz` to at least 1 to avoid division by zero.
/// - Ensures result is at least 1 microsecond.
#[inline]
pub fn period_us(hz: u32) -> u64 {
    (MICROS_PER_SEC / u64::from(hz.max(1))).max(1)
}

/// Clamp a percentage into [0, 100], mapping NaN to 0.
#[inline]
pub fn clamp_pct(v: f32) -> f32 {
    if v.is_nan() { 0.0 } else { v.clamp(0.0, 100.0) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn period_helpers_clamp_zero_rate() {
        assert_eq!(period_us(0), MICROS_PER_SEC);
        assert_eq!(period_us(200), 5_000);
        assert_eq!(period_us(2_000_000), 1);
    }

    #[test]
    fn clamp_pct_handles_nan_and_bounds() {
        assert_eq!(clamp_pct(f32::NAN), 0.0);
        assert_eq!(clamp_pct(-5.0), 0.0);
        assert_eq!(clamp_pct(140.0), 100.0);
        assert_eq!(clamp_pct(42.5), 42.5);
    }
}
