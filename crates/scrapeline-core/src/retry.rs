//! Retry backoff for requeued items

use std::time::Duration;

use tokio::time::Instant;

/// Deadline used when a backoff does not fit in an `Instant`
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Linear backoff: `unit * retry_count` (1s, 2s, 3s, ... for a 1s unit)
pub fn retry_backoff(unit: Duration, retry_count: u32) -> Duration {
    unit.saturating_mul(retry_count)
}

/// Instant at which an item retried `retry_count` times becomes ready again.
pub fn retry_deadline(now: Instant, unit: Duration, retry_count: u32) -> Instant {
    now.checked_add(retry_backoff(unit, retry_count))
        .unwrap_or(now + FAR_FUTURE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_scales_with_retry_count() {
        let unit = Duration::from_millis(250);
        assert_eq!(retry_backoff(unit, 0), Duration::ZERO);
        assert_eq!(retry_backoff(unit, 1), Duration::from_millis(250));
        assert_eq!(retry_backoff(unit, 3), Duration::from_millis(750));
    }

    #[test]
    fn backoff_zero_unit_is_immediate() {
        assert_eq!(retry_backoff(Duration::ZERO, 5), Duration::ZERO);
    }

    #[test]
    fn backoff_saturates() {
        assert_eq!(retry_backoff(Duration::MAX, 2), Duration::MAX);
    }

    #[test]
    fn deadline_adds_backoff() {
        let now = Instant::now();
        let at = retry_deadline(now, Duration::from_millis(100), 2);
        assert_eq!(at - now, Duration::from_millis(200));
    }

    #[test]
    fn deadline_overflow_is_clamped() {
        let now = Instant::now();
        let at = retry_deadline(now, Duration::MAX, 3);
        assert_eq!(at - now, FAR_FUTURE);
    }
}
