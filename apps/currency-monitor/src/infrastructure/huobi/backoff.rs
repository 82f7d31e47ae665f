//! Reconnect Backoff
//!
//! Fixed-delay reconnection policy. Every failed session waits the same
//! delay before the next attempt; an optional cap bounds the number of
//! consecutive failures before the feed gives up.

use std::time::Duration;

use crate::infrastructure::config::FeedSettings;

/// Reconnect delay used when none (or zero) is configured.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Configuration for reconnection behavior.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay before every reconnection attempt.
    pub delay: Duration,
    /// Maximum number of consecutive failed attempts (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            delay: DEFAULT_RECONNECT_DELAY,
            max_attempts: 0, // Unlimited
        }
    }
}

impl BackoffConfig {
    /// Create a new configuration with custom values.
    #[must_use]
    pub const fn new(delay: Duration, max_attempts: u32) -> Self {
        Self {
            delay,
            max_attempts,
        }
    }

    /// Create configuration from `FeedSettings`.
    ///
    /// A zero delay would hammer a dead endpoint, so it is replaced by
    /// [`DEFAULT_RECONNECT_DELAY`].
    #[must_use]
    pub const fn from_feed_settings(settings: &FeedSettings) -> Self {
        let delay = if settings.backoff_delay.is_zero() {
            DEFAULT_RECONNECT_DELAY
        } else {
            settings.backoff_delay
        };
        Self {
            delay,
            max_attempts: settings.max_reconnect_attempts,
        }
    }
}

/// Fixed-delay reconnection policy.
///
/// # Example
///
/// ```rust
/// use currency_monitor::infrastructure::huobi::backoff::{BackoffConfig, BackoffPolicy};
/// use std::time::Duration;
///
/// let mut policy = BackoffPolicy::new(BackoffConfig::new(Duration::from_secs(5), 0));
///
/// assert_eq!(policy.next_delay(), Some(Duration::from_secs(5)));
/// assert_eq!(policy.next_delay(), Some(Duration::from_secs(5)));
///
/// // Session reached Live
/// policy.reset();
/// assert_eq!(policy.attempt_count(), 0);
/// ```
#[derive(Debug)]
pub struct BackoffPolicy {
    config: BackoffConfig,
    attempt_count: u32,
}

impl BackoffPolicy {
    /// Create a new policy.
    #[must_use]
    pub const fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            attempt_count: 0,
        }
    }

    /// Delay before the next attempt.
    ///
    /// Returns `None` once max attempts have been used up.
    #[must_use]
    pub const fn next_delay(&mut self) -> Option<Duration> {
        if !self.should_retry() {
            return None;
        }
        self.attempt_count += 1;
        Some(self.config.delay)
    }

    /// Reset the policy after a session went live.
    pub const fn reset(&mut self) {
        self.attempt_count = 0;
    }

    /// Consecutive failed attempts so far.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Whether another attempt is allowed.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.config.max_attempts == 0 || self.attempt_count < self.config.max_attempts
    }

    /// Configured delay.
    #[must_use]
    pub const fn delay(&self) -> Duration {
        self.config.delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = BackoffConfig::default();
        assert_eq!(config.delay, Duration::from_secs(5));
        assert_eq!(config.max_attempts, 0);
    }

    #[test]
    fn from_feed_settings() {
        let settings = FeedSettings {
            backoff_delay: Duration::from_secs(2),
            max_reconnect_attempts: 7,
            ..FeedSettings::default()
        };
        let config = BackoffConfig::from_feed_settings(&settings);
        assert_eq!(config.delay, Duration::from_secs(2));
        assert_eq!(config.max_attempts, 7);
    }

    #[test]
    fn zero_delay_uses_default() {
        let settings = FeedSettings {
            backoff_delay: Duration::ZERO,
            ..FeedSettings::default()
        };
        let mut policy = BackoffPolicy::new(BackoffConfig::from_feed_settings(&settings));
        assert_eq!(policy.next_delay(), Some(DEFAULT_RECONNECT_DELAY));
    }

    #[test]
    fn delay_never_grows() {
        let mut policy = BackoffPolicy::new(BackoffConfig::new(Duration::from_millis(100), 0));
        for _ in 0..10 {
            assert_eq!(policy.next_delay(), Some(Duration::from_millis(100)));
        }
        assert_eq!(policy.attempt_count(), 10);
    }

    #[test]
    fn max_attempts() {
        let mut policy = BackoffPolicy::new(BackoffConfig::new(Duration::from_millis(100), 3));

        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_some());
        assert_eq!(policy.attempt_count(), 3);

        assert!(policy.next_delay().is_none());
        assert!(!policy.should_retry());
    }

    #[test]
    fn reset_restores_attempts() {
        let mut policy = BackoffPolicy::new(BackoffConfig::new(Duration::from_millis(100), 2));
        let _ = policy.next_delay();
        let _ = policy.next_delay();
        assert!(!policy.should_retry());

        policy.reset();

        assert_eq!(policy.attempt_count(), 0);
        assert!(policy.should_retry());
        assert_eq!(policy.delay(), Duration::from_millis(100));
    }
}
