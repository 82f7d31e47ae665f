//! Alert Throttling
//!
//! Debounces threshold alerts per symbol. The first breach of a symbol
//! always fires; later breaches of the same symbol fire only once the
//! throttle interval has fully elapsed since the last alert. Symbols are
//! independent of each other.
//!
//! Alert history lives in [`AlertState`], owned by the throttle and shared
//! by reference with the router. It is cleared whenever the monitored
//! symbol set changes so alert cadence restarts with the new universe.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;

use crate::domain::monitor::SymbolId;

/// Default minimum time between two alerts for the same symbol.
pub const DEFAULT_THROTTLE_INTERVAL: Duration = Duration::from_secs(1800);

/// Per-symbol time of the last alert sent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlertState {
    last_sent: HashMap<SymbolId, DateTime<Utc>>,
}

impl AlertState {
    /// Last alert time for a symbol.
    #[must_use]
    pub fn last_sent(&self, symbol: &str) -> Option<DateTime<Utc>> {
        self.last_sent.get(symbol).copied()
    }

    /// Number of symbols with alert history.
    #[must_use]
    pub fn len(&self) -> usize {
        self.last_sent.len()
    }

    /// Whether no symbol has alert history.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.last_sent.is_empty()
    }
}

/// Per-symbol alert debounce.
#[derive(Debug)]
pub struct NotificationThrottle {
    interval: TimeDelta,
    state: Mutex<AlertState>,
}

impl Default for NotificationThrottle {
    fn default() -> Self {
        Self::new(DEFAULT_THROTTLE_INTERVAL)
    }
}

impl NotificationThrottle {
    /// Create a throttle with the given interval.
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: TimeDelta::from_std(interval).unwrap_or(TimeDelta::MAX),
            state: Mutex::new(AlertState::default()),
        }
    }

    /// Decide whether an alert for `symbol` may be sent at `now`.
    ///
    /// Records `now` as the symbol's last alert time whenever it returns
    /// `true`.
    pub fn should_fire(&self, symbol: &str, now: DateTime<Utc>) -> bool {
        let mut state = self.state.lock();

        let allowed = state
            .last_sent
            .get(symbol)
            .is_none_or(|last| now.signed_duration_since(*last) > self.interval);

        if allowed {
            state.last_sent.insert(symbol.to_string(), now);
        }

        allowed
    }

    /// Forget the alert history of one symbol.
    pub fn reset(&self, symbol: &str) {
        self.state.lock().last_sent.remove(symbol);
    }

    /// Forget all alert history.
    pub fn reset_all(&self) {
        let mut state = self.state.lock();
        let cleared = state.last_sent.len();
        state.last_sent.clear();
        tracing::debug!(cleared, "Alert history reset");
    }

    /// Copy of the current alert state.
    #[must_use]
    pub fn snapshot(&self) -> AlertState {
        self.state.lock().clone()
    }

    /// Configured interval.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval.to_std().unwrap_or(Duration::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_600_000_000, 0).unwrap()
    }

    #[test]
    fn first_breach_always_fires() {
        let throttle = NotificationThrottle::default();
        assert!(throttle.should_fire("btcusdt", t0()));
        assert_eq!(throttle.snapshot().last_sent("btcusdt"), Some(t0()));
    }

    #[test]
    fn breaches_inside_interval_are_suppressed() {
        let throttle = NotificationThrottle::default();
        assert!(throttle.should_fire("BTC", t0()));
        assert!(!throttle.should_fire("BTC", t0() + TimeDelta::seconds(10)));
        assert!(throttle.should_fire("BTC", t0() + TimeDelta::seconds(1801)));
        assert!(throttle.should_fire("ETH", t0() + TimeDelta::seconds(10)));
    }

    #[test]
    fn interval_boundary_is_exclusive() {
        let throttle = NotificationThrottle::default();
        assert!(throttle.should_fire("BTC", t0()));
        assert!(!throttle.should_fire("BTC", t0() + TimeDelta::seconds(1800)));
        assert!(throttle.should_fire("BTC", t0() + TimeDelta::milliseconds(1_800_001)));
    }

    #[test]
    fn suppressed_breach_does_not_extend_the_window() {
        let throttle = NotificationThrottle::default();
        assert!(throttle.should_fire("BTC", t0()));
        assert!(!throttle.should_fire("BTC", t0() + TimeDelta::seconds(1000)));
        // Measured from the last sent alert, not the last breach.
        assert!(throttle.should_fire("BTC", t0() + TimeDelta::seconds(1801)));
    }

    #[test]
    fn continuous_breach_fires_once_per_interval() {
        let throttle = NotificationThrottle::new(Duration::from_secs(60));
        let fired = (0..=300)
            .filter(|s| throttle.should_fire("BTC", t0() + TimeDelta::seconds(*s)))
            .count();
        // t=0, 61, 122, 183, 244
        assert_eq!(fired, 5);
    }

    #[test]
    fn reset_clears_one_symbol() {
        let throttle = NotificationThrottle::default();
        assert!(throttle.should_fire("BTC", t0()));
        assert!(throttle.should_fire("ETH", t0()));

        throttle.reset("BTC");

        assert!(throttle.should_fire("BTC", t0() + TimeDelta::seconds(1)));
        assert!(!throttle.should_fire("ETH", t0() + TimeDelta::seconds(1)));
    }

    #[test]
    fn reset_all_clears_history() {
        let throttle = NotificationThrottle::default();
        assert!(throttle.should_fire("BTC", t0()));
        assert!(throttle.should_fire("ETH", t0()));
        assert_eq!(throttle.snapshot().len(), 2);

        throttle.reset_all();

        assert!(throttle.snapshot().is_empty());
        assert!(throttle.should_fire("BTC", t0() + TimeDelta::seconds(1)));
    }

    #[test]
    fn clock_going_backwards_does_not_fire() {
        let throttle = NotificationThrottle::default();
        assert!(throttle.should_fire("BTC", t0()));
        assert!(!throttle.should_fire("BTC", t0() - TimeDelta::seconds(5000)));
    }

    #[test]
    fn interval_round_trips() {
        let throttle = NotificationThrottle::new(Duration::from_secs(42));
        assert_eq!(throttle.interval(), Duration::from_secs(42));
    }
}
