// Exponential backoff for the INSERT-IF-ABSENT retry path. Modeled as a
// value carrying remaining attempts and the next delay, the same shape the
// host service uses for its own outbox retry policy — an iterative loop
// consuming it is equally correct and easier to unit test than recursion.

use std::time::Duration;

use rand::Rng;

/// Maximum number of retry attempts after the first try.
pub const MAX_RETRIES: u32 = 3;
/// Initial delay is drawn uniformly from this range.
const INITIAL_DELAY_RANGE_MS: std::ops::Range<u64> = 20..220;

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    remaining: u32,
    next_delay: Duration,
}

impl BackoffPolicy {
    /// Start a fresh policy with a jittered initial delay and `MAX_RETRIES`
    /// attempts remaining.
    pub fn initial() -> Self {
        let delay_ms = rand::thread_rng().gen_range(INITIAL_DELAY_RANGE_MS);
        Self { remaining: MAX_RETRIES, next_delay: Duration::from_millis(delay_ms) }
    }

    #[cfg(test)]
    fn with_initial_delay(remaining: u32, next_delay: Duration) -> Self {
        Self { remaining, next_delay }
    }

    /// Consume one attempt, returning the delay to sleep before retrying, or
    /// `None` once retries are exhausted.
    pub fn next(&mut self) -> Option<Duration> {
        if self.remaining == 0 {
            return None;
        }
        let delay = self.next_delay;
        self.remaining -= 1;
        self.next_delay *= 2;
        Some(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn initial_delay_is_within_jitter_bounds() {
        for _ in 0..200 {
            let mut policy = BackoffPolicy::initial();
            let delay = policy.next().expect("first attempt should be available");
            assert!(delay.as_millis() >= 20);
            assert!(delay.as_millis() < 220);
        }
    }

    #[test]
    fn exhausts_after_max_retries() {
        let mut policy = BackoffPolicy::initial();
        let mut attempts = 0;
        while policy.next().is_some() {
            attempts += 1;
        }
        assert_eq!(attempts, MAX_RETRIES);
    }

    #[test]
    fn delay_doubles_each_attempt() {
        let mut policy = BackoffPolicy::with_initial_delay(3, Duration::from_millis(20));
        assert_eq!(policy.next(), Some(Duration::from_millis(20)));
        assert_eq!(policy.next(), Some(Duration::from_millis(40)));
        assert_eq!(policy.next(), Some(Duration::from_millis(80)));
        assert_eq!(policy.next(), None);
    }

    proptest::proptest! {
        #[test]
        fn delay_never_exceeds_max_retries_attempts(seed in 0u64..1000) {
            let _ = seed;
            let mut policy = BackoffPolicy::initial();
            let mut attempts = 0u32;
            while policy.next().is_some() {
                attempts += 1;
                proptest::prop_assert!(attempts <= MAX_RETRIES);
            }
        }
    }
}
