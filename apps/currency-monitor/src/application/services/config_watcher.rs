//! Config Watcher
//!
//! Polls the configuration file's modification time and hot-reloads it.
//! A reload that adds or removes symbols clears the alert history, closes
//! the tick logs of removed symbols and asks the feed connection to rebuild
//! its session; an endpoint change rebuilds
//! the session without touching alert history; anything else is applied in
//! place. A reload that fails to load keeps the last-good configuration.
//!
//! Reloads are serialized by construction: one watcher, one poll at a time,
//! and rebuild requests to the connection coalesce.
//!
//! The file is shared with an external writer (the config web UI), so a
//! poll may observe a partially written document. That reload is rejected
//! and the next write bumps the modification time again.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio_util::sync::CancellationToken;

use crate::application::ports::{FeedControl, TickSink};
use crate::domain::monitor::{ConfigDiff, SymbolId, diff};
use crate::domain::throttle::NotificationThrottle;
use crate::infrastructure::config::{ConfigStore, load};
use crate::infrastructure::metrics::{self, ReloadOutcome};

/// Watcher configuration.
#[derive(Debug, Clone)]
pub struct WatcherSettings {
    /// File to watch.
    pub path: PathBuf,
    poll_interval: Duration,
}

impl WatcherSettings {
    /// Watch `path` at the reference one-second cadence.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            poll_interval: Duration::from_secs(1),
        }
    }

    /// Override the polling cadence. A zero interval is ignored.
    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        if poll_interval.is_zero() {
            tracing::warn!("Zero config poll interval ignored");
        } else {
            self.poll_interval = poll_interval;
        }
        self
    }

    /// Polling cadence.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}

/// What a poll did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReloadAction {
    /// Modification time unchanged, or the new document is equivalent.
    Unchanged,
    /// Parameters applied to the live snapshot.
    Applied(ConfigDiff),
    /// Snapshot replaced and a session rebuild requested.
    Resubscribed(ConfigDiff),
    /// Reload rejected; last-good configuration kept.
    Rejected(String),
}

/// Hot-reloads the monitor configuration.
pub struct ConfigWatcher {
    settings: WatcherSettings,
    store: Arc<ConfigStore>,
    throttle: Arc<NotificationThrottle>,
    feed: Arc<dyn FeedControl>,
    tick_sink: Option<Arc<dyn TickSink>>,
    last_modified: Option<SystemTime>,
    cancel: CancellationToken,
}

impl ConfigWatcher {
    /// Create a watcher.
    ///
    /// The file's current modification time is taken as the baseline, so
    /// the document already in `store` is not reloaded on the first poll.
    #[must_use]
    pub fn new(
        settings: WatcherSettings,
        store: Arc<ConfigStore>,
        throttle: Arc<NotificationThrottle>,
        feed: Arc<dyn FeedControl>,
        cancel: CancellationToken,
    ) -> Self {
        let last_modified = modified_time(&settings.path);
        Self {
            settings,
            store,
            throttle,
            feed,
            tick_sink: None,
            last_modified,
            cancel,
        }
    }

    /// Tell `sink` which symbols remain after a symbol set change.
    #[must_use]
    pub fn with_tick_sink(mut self, sink: Arc<dyn TickSink>) -> Self {
        self.tick_sink = Some(sink);
        self
    }

    /// Poll until cancelled or until the file disappears.
    pub async fn run(mut self) {
        let mut interval = tokio::time::interval(self.settings.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        tracing::info!(
            path = %self.settings.path.display(),
            interval_ms = self.settings.poll_interval.as_millis(),
            "Watching configuration file"
        );

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!("Config watcher cancelled");
                    break;
                }
                _ = interval.tick() => {
                    if self.poll().is_none() {
                        tracing::info!(
                            path = %self.settings.path.display(),
                            "Configuration file gone, config watching stopped"
                        );
                        break;
                    }
                }
            }
        }
    }

    /// Check the file once.
    ///
    /// Returns `None` if the file no longer exists.
    pub fn poll(&mut self) -> Option<ReloadAction> {
        let modified = modified_time(&self.settings.path)?;

        if self.last_modified.is_some_and(|last| modified <= last) {
            return Some(ReloadAction::Unchanged);
        }
        self.last_modified = Some(modified);

        Some(self.reload())
    }

    /// Load the file and apply it.
    pub fn reload(&self) -> ReloadAction {
        let next = match load(&self.settings.path) {
            Ok(next) => next,
            Err(e) => {
                tracing::error!(
                    path = %self.settings.path.display(),
                    error = %e,
                    "Config reload rejected, keeping last-good configuration"
                );
                metrics::record_config_reload(ReloadOutcome::Rejected);
                return ReloadAction::Rejected(e.to_string());
            }
        };

        let current = self.store.snapshot();
        let changes = diff(&current, &next);
        if changes.is_empty() {
            tracing::debug!("Config file touched without changes");
            return ReloadAction::Unchanged;
        }

        if changes.symbol_set_changed {
            self.throttle.reset_all();
            if let Some(sink) = &self.tick_sink {
                let symbols: Vec<SymbolId> = next.symbols.keys().cloned().collect();
                sink.retain_symbols(&symbols);
            }
        }
        let _previous = self.store.replace(next);

        if changes.requires_resubscribe() {
            tracing::info!(
                added = ?changes.added,
                removed = ?changes.removed,
                endpoint_changed = changes.endpoint_changed,
                "Configuration requires resubscription"
            );
            if !self.feed.request_resubscribe() {
                tracing::warn!("Feed connection stopped, resubscribe request dropped");
            }
            metrics::record_config_reload(ReloadOutcome::Resubscribed);
            ReloadAction::Resubscribed(changes)
        } else {
            tracing::info!(
                changed = ?changes.changed_symbols,
                globals_changed = changes.globals_changed,
                "Configuration applied in place"
            );
            metrics::record_config_reload(ReloadOutcome::Applied);
            ReloadAction::Applied(changes)
        }
    }
}

fn modified_time(path: &std::path::Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    use chrono::DateTime;
    use tempfile::TempDir;

    use crate::application::ports::MockFeedControl;
    use crate::infrastructure::config::parse_document;

    const BTC_ONLY: &str = r#"{"url": "wss://example.test/ws", "email": "ops@example.com",
        "currencies": {"btcusdt": {"high": 10000}}}"#;

    struct Fixture {
        _dir: TempDir,
        path: PathBuf,
        store: Arc<ConfigStore>,
        throttle: Arc<NotificationThrottle>,
    }

    fn fixture(initial: &str) -> Fixture {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("monitor.json");
        std::fs::write(&path, initial).unwrap();

        Fixture {
            store: Arc::new(ConfigStore::new(parse_document(initial).unwrap())),
            throttle: Arc::new(NotificationThrottle::default()),
            path,
            _dir: dir,
        }
    }

    fn watcher(f: &Fixture, feed: MockFeedControl) -> ConfigWatcher {
        ConfigWatcher::new(
            WatcherSettings::new(&f.path),
            Arc::clone(&f.store),
            Arc::clone(&f.throttle),
            Arc::new(feed),
            CancellationToken::new(),
        )
    }

    /// Rewrite the file with a modification time strictly after the last one.
    fn rewrite(path: &std::path::Path, text: &str) {
        let before = modified_time(path).unwrap();
        std::fs::write(path, text).unwrap();
        File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(before + Duration::from_secs(5))
            .unwrap();
    }

    fn seed_alert_history(throttle: &NotificationThrottle) {
        let t0 = DateTime::from_timestamp(1_600_000_000, 0).unwrap();
        assert!(throttle.should_fire("btcusdt", t0));
    }

    #[test]
    fn unchanged_file_is_not_reloaded() {
        let f = fixture(BTC_ONLY);
        let mut feed = MockFeedControl::new();
        feed.expect_request_resubscribe().never();

        let mut w = watcher(&f, feed);
        assert_eq!(w.poll(), Some(ReloadAction::Unchanged));
    }

    #[test]
    fn parameter_change_is_applied_in_place() {
        let f = fixture(BTC_ONLY);
        seed_alert_history(&f.throttle);

        let mut feed = MockFeedControl::new();
        feed.expect_request_resubscribe().never();
        let mut w = watcher(&f, feed);

        rewrite(
            &f.path,
            r#"{"url": "wss://example.test/ws", "email": "ops@example.com",
                "currencies": {"btcusdt": {"high": 12000}}}"#,
        );

        let action = w.poll().unwrap();
        assert!(matches!(action, ReloadAction::Applied(ref d) if !d.symbol_set_changed));

        let high = f.store.snapshot().symbol("btcusdt").unwrap().high.unwrap();
        assert_eq!(high.value.to_string(), "12000");
        assert_eq!(f.throttle.snapshot().len(), 1);
    }

    #[test]
    fn symbol_set_change_resets_history_and_resubscribes() {
        let f = fixture(BTC_ONLY);
        seed_alert_history(&f.throttle);

        let mut feed = MockFeedControl::new();
        feed.expect_request_resubscribe().times(1).return_const(true);
        let mut w = watcher(&f, feed);

        rewrite(
            &f.path,
            r#"{"url": "wss://example.test/ws", "email": "ops@example.com",
                "currencies": {"btcusdt": {"high": 10000}, "ethusdt": {}}}"#,
        );

        let action = w.poll().unwrap();
        assert!(matches!(action, ReloadAction::Resubscribed(ref d) if d.added.contains("ethusdt")));
        assert!(f.throttle.snapshot().is_empty());
        assert!(f.store.snapshot().symbol("ethusdt").is_some());
    }

    #[test]
    fn endpoint_change_resubscribes_without_reset() {
        let f = fixture(BTC_ONLY);
        seed_alert_history(&f.throttle);

        let mut feed = MockFeedControl::new();
        feed.expect_request_resubscribe().times(1).return_const(true);
        let mut w = watcher(&f, feed);

        rewrite(
            &f.path,
            r#"{"url": "wss://other.test/ws", "email": "ops@example.com",
                "currencies": {"btcusdt": {"high": 10000}}}"#,
        );

        let action = w.poll().unwrap();
        assert!(matches!(action, ReloadAction::Resubscribed(ref d) if d.endpoint_changed));
        assert_eq!(f.throttle.snapshot().len(), 1);
    }

    #[test]
    fn invalid_reload_keeps_last_good() {
        let f = fixture(BTC_ONLY);
        let mut feed = MockFeedControl::new();
        feed.expect_request_resubscribe().never();
        let mut w = watcher(&f, feed);

        rewrite(&f.path, r#"{"email": "ops@example.com"}"#);

        assert!(matches!(w.poll(), Some(ReloadAction::Rejected(_))));
        assert_eq!(f.store.snapshot().url, "wss://example.test/ws");
        // Same modification time: not retried.
        assert_eq!(w.poll(), Some(ReloadAction::Unchanged));
    }

    #[test]
    fn deleted_file_stops_polling() {
        let f = fixture(BTC_ONLY);
        let feed = MockFeedControl::new();
        let mut w = watcher(&f, feed);

        std::fs::remove_file(&f.path).unwrap();
        assert_eq!(w.poll(), None);
    }

    #[tokio::test]
    async fn run_exits_when_file_disappears() {
        let f = fixture(BTC_ONLY);
        let w = ConfigWatcher::new(
            WatcherSettings::new(&f.path).with_poll_interval(Duration::from_millis(10)),
            Arc::clone(&f.store),
            Arc::clone(&f.throttle),
            Arc::new(MockFeedControl::new()),
            CancellationToken::new(),
        );

        let handle = tokio::spawn(w.run());
        std::fs::remove_file(&f.path).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(1), handle).await;
        assert!(result.is_ok(), "watcher should stop once the file is gone");
    }

    #[derive(Default)]
    struct RetainedSymbols {
        calls: parking_lot::Mutex<Vec<Vec<SymbolId>>>,
    }

    impl TickSink for RetainedSymbols {
        fn record_tick(&self, _tick: &crate::domain::tick::TickRecord, _price: &str) {}

        fn record_alert(&self, _symbol: &str, _timestamp: DateTime<chrono::Utc>, _outcome: &str) {}

        fn retain_symbols(&self, symbols: &[SymbolId]) {
            self.calls.lock().push(symbols.to_vec());
        }
    }

    #[test]
    fn removed_symbols_are_released_from_the_tick_log() {
        let f = fixture(BTC_ONLY);
        let sink = Arc::new(RetainedSymbols::default());
        let mut feed = MockFeedControl::new();
        feed.expect_request_resubscribe().times(1).return_const(true);
        let mut w = watcher(&f, feed).with_tick_sink(Arc::clone(&sink) as Arc<dyn TickSink>);

        rewrite(
            &f.path,
            r#"{"url": "wss://example.test/ws", "email": "ops@example.com",
                "currencies": {"ethusdt": {"low": 100}}}"#,
        );
        assert!(matches!(w.poll(), Some(ReloadAction::Resubscribed(_))));
        assert_eq!(*sink.calls.lock(), vec![vec!["ethusdt".to_string()]]);

        rewrite(
            &f.path,
            r#"{"url": "wss://example.test/ws", "email": "ops@example.com",
                "currencies": {"ethusdt": {"low": 120}}}"#,
        );
        assert!(matches!(w.poll(), Some(ReloadAction::Applied(_))));
        assert_eq!(sink.calls.lock().len(), 1, "parameter edits keep every log open");
    }

    #[test]
    fn zero_poll_interval_keeps_previous_cadence() {
        let settings = WatcherSettings::new("/tmp/monitor.json")
            .with_poll_interval(Duration::from_millis(250))
            .with_poll_interval(Duration::ZERO);
        assert_eq!(settings.poll_interval(), Duration::from_millis(250));

        let settings = WatcherSettings::new("/tmp/monitor.json").with_poll_interval(Duration::ZERO);
        assert_eq!(settings.poll_interval(), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn zero_poll_interval_watcher_runs_until_cancelled() {
        let f = fixture(BTC_ONLY);
        let cancel = CancellationToken::new();
        let w = ConfigWatcher::new(
            WatcherSettings::new(&f.path).with_poll_interval(Duration::ZERO),
            Arc::clone(&f.store),
            Arc::clone(&f.throttle),
            Arc::new(MockFeedControl::new()),
            cancel.clone(),
        );

        let handle = tokio::spawn(w.run());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_finished(), "watcher should still be polling");

        cancel.cancel();
        let result = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("watcher should stop on cancel");
        assert!(result.is_ok(), "watcher task should not panic");
    }
}
