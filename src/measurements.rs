use std::time::Duration;

/// Bits per megabit, decimal (as ISPs advertise it).
pub const BITS_PER_MEGABIT: f64 = 1_000_000.0;

/// Calculate throughput in bits per second.
///
/// Returns 0.0 when no time has elapsed, so callers never divide by zero.
pub fn calculate_bandwidth_bps(bytes: u64, elapsed: Duration) -> f64 {
    let seconds = elapsed.as_secs_f64();
    if seconds <= 0.0 {
        return 0.0;
    }

    (bytes as f64 * 8.0) / seconds
}

pub fn calculate_speed_mbps(bps: f64) -> f64 {
    bps / BITS_PER_MEGABIT
}

/// Mean absolute difference between consecutive observations.
///
/// The order of `latencies` matters: it is the order in which round trips
/// completed, not a sorted order. Fewer than two observations yield 0.0.
pub fn jitter_ms(latencies: &[f64]) -> f64 {
    if latencies.len() < 2 {
        return 0.0;
    }

    let total: f64 =
        latencies.windows(2).map(|pair| (pair[1] - pair[0]).abs()).sum();

    total / (latencies.len() - 1) as f64
}

/// Round to `decimals` decimal places.
pub fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

pub fn duration_ms(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_bandwidth_ten_megabytes_one_second() {
        let bps = calculate_bandwidth_bps(10_000_000, Duration::from_secs(1));
        assert!((bps - 80_000_000.0).abs() < 1e-6);
        assert!((calculate_speed_mbps(bps) - 80.0).abs() < 1e-9);
    }

    #[test]
    fn test_bandwidth_zero_elapsed() {
        assert_eq!(calculate_bandwidth_bps(1_000, Duration::ZERO), 0.0);
    }

    #[test]
    fn test_jitter_uses_completion_order() {
        // Sorted this would be 10, 20, 30 with jitter 10.
        assert_eq!(jitter_ms(&[10.0, 30.0, 20.0]), 15.0);
    }

    #[test]
    fn test_jitter_short_input() {
        assert_eq!(jitter_ms(&[]), 0.0);
        assert_eq!(jitter_ms(&[42.0]), 0.0);
    }

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(33.333_33, 1), 33.3);
        assert_eq!(round_to(12.56, 0), 13.0);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Property: jitter is never negative.
        #[test]
        fn jitter_is_non_negative(
            latencies in prop::collection::vec(0.0f64..5000.0, 0..100),
        ) {
            prop_assert!(jitter_ms(&latencies) >= 0.0);
        }

        /// Property: identical round trips have zero jitter.
        #[test]
        fn jitter_zero_for_identical(value in 0.0f64..5000.0, n in 1usize..50) {
            prop_assert_eq!(jitter_ms(&vec![value; n]), 0.0);
        }
    }
}
