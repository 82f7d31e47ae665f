//! Feed Connection
//!
//! Owns the single WebSocket session to the market feed and drives it
//! through an explicit state machine:
//!
//! ```text
//! Disconnected -> Connecting -> Subscribing -> Live
//!       ^                                        |
//!       |            (resubscribe request)       v
//!       +---------------- Closing <--------------+
//!       |
//!       +---- Backoff <---- (any transport error, from any state)
//! ```
//!
//! Every session reads the current configuration snapshot, subscribes to
//! each symbol's ticker channel and goes live once every symbol has been
//! acknowledged or the subscribe timeout elapses. Missing acknowledgments
//! are logged and never retried. Server pings are echoed from the receive
//! loop before the next frame is read.
//!
//! Symbol removal is never attempted as a live unsubscribe: a symbol-set
//! change closes the session and the next session subscribes the new set.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use super::backoff::{BackoffConfig, BackoffPolicy};
use super::codec::{CodecError, FeedCodec};
use super::keepalive::{KeepaliveConfig, KeepaliveEvent, KeepaliveMonitor, KeepaliveState};
use super::messages::{FeedMessage, SubscribeRequest};
use crate::application::ports::FeedControl;
use crate::application::services::{RouteOutcome, TickRouter};
use crate::domain::monitor::SymbolId;
use crate::infrastructure::config::{ConfigStore, FeedSettings};
use crate::infrastructure::metrics;

// =============================================================================
// Error Type
// =============================================================================

/// Errors that end a feed session.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    /// WebSocket transport error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// An outbound frame could not be encoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// No inbound frame within the idle timeout.
    #[error("feed idle for {0:?}")]
    IdleTimeout(Duration),

    /// Connection closed by the server.
    #[error("connection closed")]
    ConnectionClosed,

    /// Maximum reconnection attempts exceeded.
    #[error("maximum reconnection attempts ({0}) exceeded")]
    MaxReconnectAttemptsExceeded(u32),
}

// =============================================================================
// Connection State
// =============================================================================

/// Lifecycle state of the feed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No session.
    #[default]
    Disconnected,
    /// Transport handshake in progress.
    Connecting,
    /// Waiting for subscription acknowledgments.
    Subscribing,
    /// Streaming ticks.
    Live,
    /// Closing the session on request.
    Closing,
    /// Waiting before the next attempt after a failure.
    Backoff,
}

impl ConnectionState {
    /// Lowercase label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Subscribing => "subscribing",
            Self::Live => "live",
            Self::Closing => "closing",
            Self::Backoff => "backoff",
        }
    }

    /// Whether ticks are flowing.
    #[must_use]
    pub const fn is_live(self) -> bool {
        matches!(self, Self::Live)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only view of the connection, shared with the health endpoint.
///
/// Only [`FeedConnection`] changes it.
#[derive(Debug, Default)]
pub struct FeedStatus {
    state: RwLock<ConnectionState>,
    reconnects: AtomicU64,
    subscribed: AtomicUsize,
}

impl FeedStatus {
    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Reconnection attempts since start.
    #[must_use]
    pub fn reconnects(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }

    /// Symbols subscribed on the current session.
    #[must_use]
    pub fn subscribed_symbols(&self) -> usize {
        self.subscribed.load(Ordering::Relaxed)
    }

    fn set_state(&self, next: ConnectionState) {
        let previous = std::mem::replace(&mut *self.state.write(), next);
        if previous != next {
            tracing::debug!(from = %previous, to = %next, "Feed state changed");
            metrics::set_connection_live(next.is_live());
        }
    }

    fn set_subscribed(&self, count: usize) {
        self.subscribed.store(count, Ordering::Relaxed);
        metrics::set_subscribed_symbols(count);
    }
}

// =============================================================================
// Handle
// =============================================================================

/// Requests accepted by a running connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedCommand {
    /// Close the session and subscribe the current symbol set.
    Resubscribe,
}

/// Cloneable handle to a running connection.
#[derive(Debug, Clone)]
pub struct FeedHandle {
    commands: mpsc::Sender<FeedCommand>,
    status: Arc<FeedStatus>,
}

impl FeedControl for FeedHandle {
    /// Requests made while one is already queued are coalesced.
    fn request_resubscribe(&self) -> bool {
        match self.commands.try_send(FeedCommand::Resubscribe) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::debug!("Resubscribe already pending");
                true
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

impl FeedHandle {
    /// Shared connection status.
    #[must_use]
    pub fn status(&self) -> Arc<FeedStatus> {
        Arc::clone(&self.status)
    }
}

// =============================================================================
// Feed Connection
// =============================================================================

enum SessionEnd {
    Shutdown,
    Resubscribe,
}

/// WebSocket client for the market ticker feed.
///
/// Manages the connection lifecycle including:
/// - Per-symbol subscription and acknowledgment tracking
/// - Ping echo and idle detection
/// - Fixed-delay reconnection
/// - Session rebuild on request
pub struct FeedConnection {
    settings: FeedSettings,
    store: Arc<ConfigStore>,
    router: Arc<TickRouter>,
    codec: FeedCodec,
    status: Arc<FeedStatus>,
    commands: mpsc::Receiver<FeedCommand>,
    cancel: CancellationToken,
}

impl FeedConnection {
    /// Create a connection and its handle.
    #[must_use]
    pub fn new(
        settings: FeedSettings,
        store: Arc<ConfigStore>,
        router: Arc<TickRouter>,
        cancel: CancellationToken,
    ) -> (Self, FeedHandle) {
        let (tx, rx) = mpsc::channel(1);
        let status = Arc::new(FeedStatus::default());

        let connection = Self {
            settings,
            store,
            router,
            codec: FeedCodec::new(),
            status: Arc::clone(&status),
            commands: rx,
            cancel,
        };
        let handle = FeedHandle {
            commands: tx,
            status,
        };
        (connection, handle)
    }

    /// Run the connection loop until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `MaxReconnectAttemptsExceeded` if the attempt cap is reached.
    /// Every other failure is retried after the backoff delay.
    pub async fn run(mut self) -> Result<(), FeedError> {
        let mut backoff = BackoffPolicy::new(BackoffConfig::from_feed_settings(&self.settings));

        loop {
            if self.cancel.is_cancelled() {
                self.status.set_state(ConnectionState::Disconnected);
                tracing::info!("Feed connection cancelled");
                return Ok(());
            }

            self.status.set_state(ConnectionState::Connecting);

            match self.connect_and_run(&mut backoff).await {
                Ok(SessionEnd::Shutdown) => {
                    self.status.set_state(ConnectionState::Disconnected);
                    tracing::info!("Feed connection closed gracefully");
                    return Ok(());
                }
                Ok(SessionEnd::Resubscribe) => {
                    self.status.set_state(ConnectionState::Disconnected);
                    tracing::info!("Reconnecting with updated configuration");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Feed connection error");
                    self.status.set_state(ConnectionState::Backoff);
                    self.status.set_subscribed(0);

                    let Some(delay) = backoff.next_delay() else {
                        self.status.set_state(ConnectionState::Disconnected);
                        return Err(FeedError::MaxReconnectAttemptsExceeded(
                            backoff.attempt_count(),
                        ));
                    };

                    let attempt = backoff.attempt_count();
                    self.status.reconnects.fetch_add(1, Ordering::Relaxed);
                    metrics::record_reconnect();
                    tracing::info!(
                        attempt,
                        delay_ms = delay.as_millis(),
                        "Reconnecting to feed"
                    );

                    tokio::select! {
                        () = self.cancel.cancelled() => {
                            self.status.set_state(ConnectionState::Disconnected);
                            tracing::info!("Feed connection cancelled during backoff");
                            return Ok(());
                        }
                        () = tokio::time::sleep(delay) => {}
                        Some(FeedCommand::Resubscribe) = self.commands.recv() => {
                            self.status.set_state(ConnectionState::Closing);
                            tracing::info!("Configuration changed during backoff");
                        }
                    }

                    self.status.set_state(ConnectionState::Disconnected);
                }
            }
        }
    }

    /// Connect, subscribe, and stream until error, rebuild or cancellation.
    async fn connect_and_run(
        &mut self,
        backoff: &mut BackoffPolicy,
    ) -> Result<SessionEnd, FeedError> {
        // This session reads the latest snapshot, so queued rebuilds are moot.
        while self.commands.try_recv().is_ok() {}

        let config = self.store.snapshot();
        tracing::info!(
            url = %config.url,
            symbols = config.symbols.len(),
            "Connecting to feed"
        );

        let (ws_stream, _response) = tokio::select! {
            () = self.cancel.cancelled() => return Ok(SessionEnd::Shutdown),
            result = tokio_tungstenite::connect_async(config.url.as_str()) => result?,
        };

        let (mut write, mut read) = ws_stream.split();

        self.status.set_state(ConnectionState::Subscribing);
        let mut pending: BTreeSet<SymbolId> = config.symbol_ids();
        for symbol in &pending {
            let json = self
                .codec
                .encode_subscribe(&SubscribeRequest::for_symbol(symbol))?;
            write.send(Message::Text(json.into())).await?;
            tracing::debug!(symbol = %symbol, "Subscription requested");
        }
        self.status.set_subscribed(pending.len());

        if pending.is_empty() {
            tracing::warn!("No symbols configured, connection idle");
            self.go_live(&pending, backoff);
        }

        // Set up keepalive watchdog
        let keepalive_state = Arc::new(KeepaliveState::new());
        let (keepalive_tx, mut keepalive_rx) = mpsc::channel::<KeepaliveEvent>(1);
        let keepalive_cancel = CancellationToken::new();
        let _keepalive_guard = keepalive_cancel.clone().drop_guard();
        let keepalive = KeepaliveMonitor::new(
            KeepaliveConfig::from_feed_settings(&self.settings),
            Arc::clone(&keepalive_state),
            keepalive_tx,
            keepalive_cancel,
        );
        tokio::spawn(keepalive.run());

        let ack_deadline = tokio::time::sleep(self.settings.subscribe_timeout);
        tokio::pin!(ack_deadline);

        loop {
            let subscribing = self.status.state() == ConnectionState::Subscribing;

            tokio::select! {
                () = self.cancel.cancelled() => {
                    self.status.set_state(ConnectionState::Closing);
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(SessionEnd::Shutdown);
                }
                Some(FeedCommand::Resubscribe) = self.commands.recv() => {
                    self.status.set_state(ConnectionState::Closing);
                    tracing::info!("Closing feed session to apply new symbol set");
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(SessionEnd::Resubscribe);
                }
                () = &mut ack_deadline, if subscribing => {
                    self.go_live(&pending, backoff);
                }
                Some(KeepaliveEvent::IdleTimeout(idle)) = keepalive_rx.recv() => {
                    return Err(FeedError::IdleTimeout(idle));
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Binary(data))) => {
                            keepalive_state.record_inbound();
                            let decoded = self.codec.decode_binary(&data);
                            if let Some(reply) = self.on_frame(decoded, &mut pending, backoff) {
                                write.send(Message::Text(reply.into())).await?;
                            }
                        }
                        Some(Ok(Message::Text(text))) => {
                            keepalive_state.record_inbound();
                            let decoded = self.codec.decode_text(&text);
                            if let Some(reply) = self.on_frame(decoded, &mut pending, backoff) {
                                write.send(Message::Text(reply.into())).await?;
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            keepalive_state.record_inbound();
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            tracing::info!(frame = ?frame, "Server sent close frame");
                            return Err(FeedError::ConnectionClosed);
                        }
                        Some(Ok(_)) => {
                            keepalive_state.record_inbound();
                        }
                        Some(Err(e)) => {
                            return Err(e.into());
                        }
                        None => {
                            tracing::info!("WebSocket stream ended");
                            return Err(FeedError::ConnectionClosed);
                        }
                    }
                }
            }
        }
    }

    /// Route one decoded frame. Returns the reply to send, if any.
    fn on_frame(
        &self,
        decoded: Result<FeedMessage, CodecError>,
        pending: &mut BTreeSet<SymbolId>,
        backoff: &mut BackoffPolicy,
    ) -> Option<String> {
        let message = match decoded {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "Undecodable frame");
                metrics::record_undecodable_frame();
                return None;
            }
        };

        match self.router.route(message, Utc::now()) {
            RouteOutcome::Pong(token) => Some(self.codec.encode_pong(token)),
            RouteOutcome::Subscribed(symbol) => {
                if pending.remove(&symbol) {
                    self.maybe_go_live(pending, backoff);
                }
                None
            }
            RouteOutcome::Rejected {
                symbol: Some(symbol),
                reason,
            } => {
                if pending.remove(&symbol) {
                    tracing::warn!(symbol = %symbol, %reason, "Subscription rejected");
                    self.maybe_go_live(pending, backoff);
                }
                None
            }
            _ => None,
        }
    }

    fn maybe_go_live(&self, pending: &BTreeSet<SymbolId>, backoff: &mut BackoffPolicy) {
        if pending.is_empty() && self.status.state() == ConnectionState::Subscribing {
            self.go_live(pending, backoff);
        }
    }

    fn go_live(&self, pending: &BTreeSet<SymbolId>, backoff: &mut BackoffPolicy) {
        if !pending.is_empty() {
            tracing::warn!(
                missing = ?pending,
                "Subscription acknowledgments missing, continuing without them"
            );
        }
        self.status.set_state(ConnectionState::Live);
        backoff.reset();
        tracing::info!(symbols = self.status.subscribed_symbols(), "Feed live");
    }
}
