//! Keepalive Watchdog
//!
//! The feed server drives keepalives: it sends `{"ping": N}` and expects
//! the token echoed back. The client never pings. This watchdog only
//! tracks inbound traffic and reports when the server has gone silent for
//! longer than the idle timeout, so a half-open socket gets replaced.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::infrastructure::config::FeedSettings;

/// Idle timeout used when none (or zero) is configured.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for the watchdog.
#[derive(Debug, Clone)]
pub struct KeepaliveConfig {
    /// How often inbound silence is checked.
    pub check_interval: Duration,
    /// Silence after which the connection is considered dead.
    pub idle_timeout: Duration,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(1),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

impl KeepaliveConfig {
    /// Create a new configuration with custom values.
    #[must_use]
    pub const fn new(check_interval: Duration, idle_timeout: Duration) -> Self {
        Self {
            check_interval,
            idle_timeout,
        }
    }

    /// Create configuration from `FeedSettings`.
    ///
    /// A zero idle timeout would drop every session on the first check, so
    /// it is replaced by [`DEFAULT_IDLE_TIMEOUT`].
    #[must_use]
    pub const fn from_feed_settings(settings: &FeedSettings) -> Self {
        let idle_timeout = if settings.idle_timeout.is_zero() {
            DEFAULT_IDLE_TIMEOUT
        } else {
            settings.idle_timeout
        };
        Self {
            check_interval: Duration::from_secs(1),
            idle_timeout,
        }
    }
}

/// Events emitted by the watchdog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeepaliveEvent {
    /// No inbound frame within the idle timeout.
    IdleTimeout(Duration),
}

/// Inbound activity shared between the watchdog and the read loop.
#[derive(Debug)]
pub struct KeepaliveState {
    last_inbound: RwLock<Instant>,
}

impl Default for KeepaliveState {
    fn default() -> Self {
        Self::new()
    }
}

impl KeepaliveState {
    /// Create new state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_inbound: RwLock::new(Instant::now()),
        }
    }

    /// Record that a frame arrived.
    pub fn record_inbound(&self) {
        *self.last_inbound.write() = Instant::now();
    }

    /// Time since the last inbound frame.
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        self.last_inbound.read().elapsed()
    }
}

/// Watchdog that reports a silent connection.
pub struct KeepaliveMonitor {
    config: KeepaliveConfig,
    state: Arc<KeepaliveState>,
    event_tx: mpsc::Sender<KeepaliveEvent>,
    cancel: CancellationToken,
}

impl KeepaliveMonitor {
    /// Create a new watchdog.
    #[must_use]
    pub const fn new(
        config: KeepaliveConfig,
        state: Arc<KeepaliveState>,
        event_tx: mpsc::Sender<KeepaliveEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            state,
            event_tx,
            cancel,
        }
    }

    /// Run until cancelled or until one timeout has been reported.
    pub async fn run(self) {
        let mut interval = tokio::time::interval(self.config.check_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!("Keepalive watchdog cancelled");
                    break;
                }
                _ = interval.tick() => {
                    let idle = self.state.idle_for();
                    if idle > self.config.idle_timeout {
                        tracing::warn!(
                            idle_secs = idle.as_secs(),
                            timeout_secs = self.config.idle_timeout.as_secs(),
                            "Feed idle timeout detected"
                        );
                        let _ = self.event_tx.send(KeepaliveEvent::IdleTimeout(idle)).await;
                        break;
                    }
                }
            }
        }
    }
}
