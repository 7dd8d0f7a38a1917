//! Exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;

/// Delay before retry number `attempt` (1-based). Attempt 0 waits nothing.
///
/// Doubles from `base` up to `max`, then adds up to a tenth on top so that
/// many gateways retrying one sink do not synchronize.
pub fn calculate_backoff(attempt: u32, base: Duration, max: Duration) -> Duration {
    let Some(exponent) = attempt.checked_sub(1) else {
        return Duration::ZERO;
    };

    let delay = base
        .checked_mul(2u32.saturating_pow(exponent))
        .map_or(max, |d| d.min(max));

    let spread = delay / 10;
    if spread.is_zero() {
        return delay;
    }
    delay + spread.mul_f64(rand::thread_rng().gen::<f64>())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS: Duration = Duration::from_millis(1);

    #[test]
    fn test_backoff_grows_and_caps() {
        assert_eq!(calculate_backoff(0, 100 * MS, 2000 * MS), Duration::ZERO);

        let first = calculate_backoff(1, 100 * MS, 2000 * MS);
        assert!(first >= 100 * MS && first <= 110 * MS);

        let second = calculate_backoff(2, 100 * MS, 2000 * MS);
        assert!(second >= 200 * MS && second <= 220 * MS);

        let capped = calculate_backoff(10, 100 * MS, 1000 * MS);
        assert!(capped >= 1000 * MS && capped <= 1100 * MS);
    }

    #[test]
    fn test_backoff_survives_huge_attempts() {
        let delay = calculate_backoff(u32::MAX, 250 * MS, 5_000 * MS);
        assert!(delay <= 5_500 * MS);
    }
}
