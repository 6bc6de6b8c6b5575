//! Exponential backoff with jitter.

use std::time::Duration;
use rand::Rng;

/// Calculate the delay before retry `attempt` (0-based) for a given jitter factor.
///
/// `base × 2^attempt × factor`, capped at `max`.
pub fn backoff_with_factor(attempt: u32, base: Duration, max: Duration, factor: f64) -> Duration {
    let nanos = base.as_nanos() as f64 * 2f64.powi(attempt.min(1024) as i32) * factor.max(0.0);
    if !nanos.is_finite() || nanos >= max.as_nanos() as f64 {
        return max;
    }
    Duration::from_nanos(nanos.round() as u64)
}

/// Calculate exponential backoff delay with jitter in `[0.5, 1.5)`.
pub fn calculate_backoff(attempt: u32, base: Duration, max: Duration) -> Duration {
    let factor = rand::thread_rng().gen_range(0.5..1.5);
    backoff_with_factor(attempt, base, max, factor)
}

/// Backoff sequence for one call. Delays never decrease, even with jitter.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    previous: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            previous: Duration::ZERO,
        }
    }

    /// Delay before retry `attempt` (0-based).
    pub fn next_delay(&mut self, attempt: u32) -> Duration {
        let delay = calculate_backoff(attempt, self.base, self.max).max(self.previous);
        self.previous = delay;
        delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: Duration = Duration::from_millis(100);
    const MAX: Duration = Duration::from_millis(2000);

    #[test]
    fn test_backoff_calculation() {
        assert_eq!(backoff_with_factor(0, BASE, MAX, 1.0), Duration::from_millis(100));
        assert_eq!(backoff_with_factor(1, BASE, MAX, 1.0), Duration::from_millis(200));
        assert_eq!(backoff_with_factor(2, BASE, MAX, 0.5), Duration::from_millis(200));
        assert_eq!(backoff_with_factor(3, BASE, MAX, 1.5), Duration::from_millis(1200));

        // Capped
        assert_eq!(backoff_with_factor(10, BASE, MAX, 1.0), MAX);
        assert_eq!(backoff_with_factor(u32::MAX, BASE, MAX, 1.5), MAX);
    }

    #[test]
    fn test_jitter_bounds() {
        for attempt in 0..5 {
            let nominal = BASE * 2u32.pow(attempt);
            for _ in 0..50 {
                let delay = calculate_backoff(attempt, BASE, Duration::from_secs(60));
                assert!(delay >= nominal / 2, "{delay:?} below half of {nominal:?}");
                assert!(delay < nominal * 3 / 2, "{delay:?} above 1.5x {nominal:?}");
            }
        }
    }

    #[test]
    fn test_sequence_is_non_decreasing() {
        for _ in 0..100 {
            let mut backoff = Backoff::new(BASE, MAX);
            let mut last = Duration::ZERO;
            for attempt in 0..8 {
                let delay = backoff.next_delay(attempt);
                assert!(delay >= last);
                assert!(delay <= MAX);
                last = delay;
            }
        }
    }
}
