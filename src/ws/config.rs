#![expect(
    clippy::module_name_repetitions,
    reason = "Configuration types intentionally mirror the module name for clarity"
)]

use std::time::Duration;

use bon::Builder;

const DEFAULT_BASE_DELAY_DURATION: Duration = Duration::from_secs(2);
const DEFAULT_MAX_DELAY_DURATION: Duration = Duration::from_secs(30);
const DEFAULT_HANDSHAKE_TIMEOUT_DURATION: Duration = Duration::from_secs(10);

/// Configuration for realtime connection behavior.
#[non_exhaustive]
#[derive(Debug, Clone, Builder)]
pub struct Config {
    /// Reconnection delay schedule
    #[builder(default)]
    pub reconnect: BackoffPolicy,
    /// Maximum time to open the transport, upgrade included
    #[builder(default = DEFAULT_HANDSHAKE_TIMEOUT_DURATION)]
    pub handshake_timeout: Duration,
    /// Give up on an attempt when no application payload follows the auth frame within
    /// this window. `None` waits as long as the transport stays open; event-driven streams
    /// may legitimately stay silent after authenticating.
    pub first_payload_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            reconnect: BackoffPolicy::default(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT_DURATION,
            first_payload_timeout: None,
        }
    }
}

/// Deterministic exponential backoff: `min(base_delay * 2^attempt, max_delay)`.
///
/// There is no jitter. Many dashboards reconnecting after a shared outage will retry in
/// lockstep.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Builder)]
pub struct BackoffPolicy {
    /// Delay before the first retry
    #[builder(default = DEFAULT_BASE_DELAY_DURATION)]
    pub base_delay: Duration,
    /// Upper bound for any single delay
    #[builder(default = DEFAULT_MAX_DELAY_DURATION)]
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_BASE_DELAY_DURATION,
            max_delay: DEFAULT_MAX_DELAY_DURATION,
        }
    }
}

impl BackoffPolicy {
    /// Delay to wait before the retry that follows `attempt` previous failures.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        1_u32
            .checked_shl(attempt)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_sequence() {
        let policy = BackoffPolicy::default();

        let delays: Vec<u128> = (0..6).map(|n| policy.delay(n).as_millis()).collect();
        assert_eq!(delays, [2_000, 4_000, 8_000, 16_000, 30_000, 30_000]);
    }

    #[test]
    fn backoff_matches_closed_form() {
        let policy = BackoffPolicy::default();

        for n in 0..64_u32 {
            let expected = 2_u128
                .checked_pow(n)
                .map_or(30_000, |factor| (factor * 2_000).min(30_000));
            assert_eq!(policy.delay(n).as_millis(), expected, "attempt {n}");
        }
    }

    #[test]
    fn backoff_saturates_at_max_for_huge_attempts() {
        let policy = BackoffPolicy::default();

        assert_eq!(policy.delay(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn backoff_respects_custom_bounds() {
        let policy = BackoffPolicy::builder()
            .base_delay(Duration::from_millis(100))
            .max_delay(Duration::from_millis(250))
            .build();

        assert_eq!(policy.delay(0), Duration::from_millis(100));
        assert_eq!(policy.delay(1), Duration::from_millis(200));
        assert_eq!(policy.delay(2), Duration::from_millis(250));
    }

    #[test]
    fn builder_defaults_match_default() {
        let built = Config::builder().build();
        let default = Config::default();

        assert_eq!(built.reconnect, default.reconnect);
        assert_eq!(built.handshake_timeout, Duration::from_secs(10));
        assert_eq!(built.first_payload_timeout, None);
        assert_eq!(default.first_payload_timeout, None);
    }

    #[test]
    fn first_payload_timeout_is_opt_in() {
        let config = Config::builder()
            .first_payload_timeout(Duration::from_secs(5))
            .build();

        assert_eq!(config.first_payload_timeout, Some(Duration::from_secs(5)));
    }
}
