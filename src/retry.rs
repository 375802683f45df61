//! Delay policy between failed upload attempts

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default wait between attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Upper bound for exponential delays.
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetryStrategy {
    /// Same delay before every retry.
    Fixed(Duration),
    /// `base * 2^(retry - 1)`, capped at `max`.
    Exponential { base: Duration, max: Duration },
}

impl RetryStrategy {
    /// Picks the strategy from the two user-facing settings.
    pub fn from_settings(base: Duration, exponential: bool) -> Self {
        if exponential {
            RetryStrategy::Exponential {
                base,
                max: MAX_BACKOFF.max(base),
            }
        } else {
            RetryStrategy::Fixed(base)
        }
    }

    /// Delay before retry number `retry` (1-based: the first retry is 1).
    pub fn delay(&self, retry: u32) -> Duration {
        match *self {
            RetryStrategy::Fixed(d) => d,
            RetryStrategy::Exponential { base, max } => {
                let shift = retry.saturating_sub(1).min(31);
                base.checked_mul(1u32 << shift).unwrap_or(max).min(max)
            }
        }
    }
}

impl Default for RetryStrategy {
    fn default() -> Self {
        RetryStrategy::Fixed(DEFAULT_RETRY_DELAY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_is_constant() {
        let s = RetryStrategy::Fixed(Duration::from_millis(250));
        assert_eq!(s.delay(1), Duration::from_millis(250));
        assert_eq!(s.delay(9), Duration::from_millis(250));
    }

    #[test]
    fn exponential_doubles_and_caps() {
        let s = RetryStrategy::from_settings(Duration::from_secs(1), true);
        assert_eq!(s.delay(1), Duration::from_secs(1));
        assert_eq!(s.delay(2), Duration::from_secs(2));
        assert_eq!(s.delay(3), Duration::from_secs(4));
        assert_eq!(s.delay(10), MAX_BACKOFF);
        assert_eq!(s.delay(40), MAX_BACKOFF);
    }

    #[test]
    fn settings_default_to_fixed() {
        let s = RetryStrategy::from_settings(Duration::from_secs(3), false);
        assert_eq!(s, RetryStrategy::Fixed(Duration::from_secs(3)));
        assert_eq!(RetryStrategy::default().delay(1), DEFAULT_RETRY_DELAY);
    }
}
