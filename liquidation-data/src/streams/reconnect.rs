use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Exponential backoff applied between reconnection attempts of an exchange feed.
#[derive(Copy, Clone, PartialEq, Debug, Deserialize, Serialize)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnection attempt.
    pub backoff_ms_initial: u64,
    /// Multiplier applied to the delay after every failed attempt.
    pub backoff_multiplier: u8,
    /// Upper bound of the delay, before jitter.
    pub backoff_ms_max: u64,
    /// Random extra delay as a fraction of the current delay, spreading out reconnects of
    /// feeds that dropped at the same moment.
    pub jitter: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            backoff_ms_initial: 5_000,
            backoff_multiplier: 2,
            backoff_ms_max: 30_000,
            jitter: 0.1,
        }
    }
}

/// Reconnection delay state of a single feed.
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct Backoff {
    policy: ReconnectPolicy,
    current_ms: u64,
}

impl Backoff {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            current_ms: policy.backoff_ms_initial,
        }
    }

    /// Delay to wait before the next attempt. Advances the backoff.
    ///
    /// Never shorter than the un-jittered delay.
    pub fn next_delay(&mut self) -> Duration {
        let base_ms = self.current_ms.min(self.policy.backoff_ms_max);

        self.current_ms = base_ms
            .saturating_mul(u64::from(self.policy.backoff_multiplier))
            .min(self.policy.backoff_ms_max);

        let jitter_ms = if self.policy.jitter > 0.0 {
            let max_jitter_ms = (base_ms as f64 * self.policy.jitter) as u64;
            rand::rng().random_range(0..=max_jitter_ms)
        } else {
            0
        };

        Duration::from_millis(base_ms + jitter_ms)
    }

    /// Restart from the initial delay, used once a session reached the streaming state.
    pub fn reset(&mut self) {
        self.current_ms = self.policy.backoff_ms_initial;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy_without_jitter() -> ReconnectPolicy {
        ReconnectPolicy {
            jitter: 0.0,
            ..ReconnectPolicy::default()
        }
    }

    #[test]
    fn test_backoff_doubles_up_to_cap() {
        let mut backoff = Backoff::new(policy_without_jitter());

        let actual = (0..5)
            .map(|_| backoff.next_delay().as_secs())
            .collect::<Vec<_>>();

        assert_eq!(actual, vec![5, 10, 20, 30, 30]);
    }

    #[test]
    fn test_backoff_reset() {
        let mut backoff = Backoff::new(policy_without_jitter());
        backoff.next_delay();
        backoff.next_delay();

        backoff.reset();

        assert_eq!(backoff.next_delay(), Duration::from_secs(5));
    }

    #[test]
    fn test_backoff_jitter_never_shortens_delay() {
        let policy = ReconnectPolicy::default();
        let mut backoff = Backoff::new(policy);

        for expected_base in [5_000, 10_000, 20_000, 30_000, 30_000] {
            let actual = backoff.next_delay().as_millis() as u64;
            assert!(actual >= expected_base, "{actual} < {expected_base}");
            assert!(
                actual <= expected_base + (expected_base as f64 * policy.jitter) as u64,
                "{actual} exceeds jitter bound of {expected_base}"
            );
        }
    }
}
