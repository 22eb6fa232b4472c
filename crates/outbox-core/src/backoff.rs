//! Retry backoff policy.

use chrono::Duration;

/// Exponential backoff with a configurable ceiling.
///
/// Retry delay follows `min(cap, 2^(attempt - 1))` minutes:
///
/// | Attempt | Delay (cap = 30) |
/// |---------|------------------|
/// | 1       | 1 min            |
/// | 2       | 2 min            |
/// | 5       | 16 min           |
/// | 6+      | 30 min (capped)  |
///
/// Deterministic on purpose: the workers run single-replica, so there is no
/// herd to de-synchronize.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Maximum delay in minutes (caps exponential growth).
    pub cap_minutes: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self { cap_minutes: 30 }
    }
}

impl BackoffPolicy {
    pub fn new(cap_minutes: u32) -> Self {
        Self { cap_minutes }
    }

    /// Delay before the retry following the given attempt number (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::zero();
        }

        let shift = attempt.saturating_sub(1);
        let minutes = 1u64
            .checked_shl(shift)
            .unwrap_or(u64::MAX)
            .min(u64::from(self.cap_minutes));

        Duration::minutes(minutes as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_exponentially_and_caps() {
        let policy = BackoffPolicy::new(30);

        assert_eq!(policy.delay(1), Duration::minutes(1));
        assert_eq!(policy.delay(2), Duration::minutes(2));
        assert_eq!(policy.delay(3), Duration::minutes(4));
        assert_eq!(policy.delay(5), Duration::minutes(16));
        assert_eq!(policy.delay(6), Duration::minutes(30));
        assert_eq!(policy.delay(10), Duration::minutes(30));
    }

    #[test]
    fn delay_is_non_decreasing() {
        let policy = BackoffPolicy::default();
        let mut last = Duration::zero();
        for attempt in 1..=64 {
            let delay = policy.delay(attempt);
            assert!(delay >= last, "delay shrank at attempt {attempt}");
            last = delay;
        }
    }

    #[test]
    fn huge_attempt_counts_saturate() {
        let policy = BackoffPolicy::new(30);
        assert_eq!(policy.delay(u32::MAX), Duration::minutes(30));
    }

    #[test]
    fn zero_attempt_yields_zero_delay() {
        assert_eq!(BackoffPolicy::default().delay(0), Duration::zero());
    }
}
