//! Reconnection policy and backoff calculation for the WebSocket adapter.

use std::time::Duration;

use whisk_settings::ReconnectionSettings;

/// When and how long to wait before retrying a dropped connection.
#[derive(Clone, Debug, PartialEq)]
pub struct ReconnectPolicy {
    /// Whether to retry at all.
    pub enabled: bool,
    /// Base delay for exponential backoff in ms.
    pub base_delay_ms: u64,
    /// Maximum delay between retries in ms.
    pub max_delay_ms: u64,
    /// Jitter factor 0.0–1.0.
    pub jitter_factor: f64,
    /// Consecutive failed attempts allowed (`None` = unlimited).
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from(&ReconnectionSettings::default())
    }
}

impl From<&ReconnectionSettings> for ReconnectPolicy {
    fn from(s: &ReconnectionSettings) -> Self {
        Self {
            enabled: s.enabled,
            base_delay_ms: s.base_delay_ms,
            max_delay_ms: s.max_delay_ms,
            jitter_factor: s.jitter_factor,
            max_attempts: s.max_attempts,
        }
    }
}

impl ReconnectPolicy {
    /// A policy that never retries.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Whether another attempt is allowed after `attempts` consecutive retries.
    pub fn should_retry(&self, attempts: u32) -> bool {
        self.enabled && self.max_attempts.is_none_or(|max| attempts < max)
    }

    /// Delay before retry number `attempt` (zero-based), with random jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(backoff_delay_ms(
            attempt,
            self.base_delay_ms,
            self.max_delay_ms,
            self.jitter_factor,
            rand::random::<f64>(),
        ))
    }
}

/// Exponential backoff with jitter.
///
/// `min(max_delay, base_delay * 2^attempt) * (1 + (random * 2 - 1) * jitter)`,
/// where `random` is in `[0.0, 1.0)`.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn backoff_delay_ms(
    attempt: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
    jitter_factor: f64,
    random: f64,
) -> u64 {
    let exponential = base_delay_ms.saturating_mul(1u64 << attempt.min(31));
    let capped = exponential.min(max_delay_ms);

    let jitter = 1.0 + (random * 2.0 - 1.0) * jitter_factor;
    let with_jitter = (capped as f64) * jitter;

    with_jitter.round().max(0.0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_until_cap() {
        // random = 0.5 cancels the jitter
        assert_eq!(backoff_delay_ms(0, 1000, 5000, 0.5, 0.5), 1000);
        assert_eq!(backoff_delay_ms(1, 1000, 5000, 0.5, 0.5), 2000);
        assert_eq!(backoff_delay_ms(2, 1000, 5000, 0.5, 0.5), 4000);
        assert_eq!(backoff_delay_ms(3, 1000, 5000, 0.5, 0.5), 5000);
        assert_eq!(backoff_delay_ms(40, 1000, 5000, 0.5, 0.5), 5000);
    }

    #[test]
    fn jitter_bounds() {
        assert_eq!(backoff_delay_ms(0, 1000, 5000, 0.5, 0.0), 500);
        assert_eq!(backoff_delay_ms(0, 1000, 5000, 0.5, 1.0), 1500);
        assert_eq!(backoff_delay_ms(0, 1000, 5000, 0.0, 0.9), 1000);
    }

    #[test]
    fn random_delay_within_bounds() {
        let policy = ReconnectPolicy::default();
        for attempt in 0..6 {
            let d = policy.delay(attempt).as_millis();
            assert!(d <= 7_500, "attempt {attempt} delay {d}");
        }
    }

    #[test]
    fn unlimited_attempts_by_default() {
        let policy = ReconnectPolicy::default();
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(10_000));
    }

    #[test]
    fn max_attempts_enforced() {
        let policy = ReconnectPolicy {
            max_attempts: Some(2),
            ..ReconnectPolicy::default()
        };
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(1));
        assert!(!policy.should_retry(2));
    }

    #[test]
    fn disabled_never_retries() {
        assert!(!ReconnectPolicy::disabled().should_retry(0));
    }

    #[test]
    fn from_settings() {
        let settings = ReconnectionSettings {
            enabled: false,
            base_delay_ms: 10,
            max_delay_ms: 20,
            jitter_factor: 0.0,
            max_attempts: Some(1),
        };
        let policy = ReconnectPolicy::from(&settings);
        assert!(!policy.enabled);
        assert_eq!(policy.base_delay_ms, 10);
        assert_eq!(policy.max_attempts, Some(1));
    }
}
