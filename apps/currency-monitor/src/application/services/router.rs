//! Tick Router
//!
//! Classifies decoded feed frames and dispatches them. Ticks are formatted
//! with the symbol's display precision, written to the tick log, then
//! checked against the symbol's bounds. A breach becomes an alert only if
//! notifications are enabled, a recipient is configured and the throttle
//! allows it; every other outcome is logged with its reason.
//!
//! The router never blocks on mail delivery. Alerts are handed to the mail
//! worker through a bounded channel with `try_send`.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::application::ports::{AlertMessage, TickSink};
use crate::domain::expression::evaluate_expression;
use crate::domain::monitor::{MonitorConfig, SymbolConfig, SymbolId, symbol_from_channel};
use crate::domain::throttle::NotificationThrottle;
use crate::domain::tick::TickRecord;
use crate::infrastructure::config::ConfigStore;
use crate::infrastructure::huobi::messages::{
    ErrorMessage, FeedMessage, SubscribedMessage, TickMessage,
};
use crate::infrastructure::metrics::{self, FrameKind};

// =============================================================================
// Outcomes
// =============================================================================

/// Why a tick did not produce an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuppressReason {
    /// Neither bound is configured.
    NoBounds,
    /// A bound could not be evaluated.
    EvaluationFailed,
    /// Notifications are disabled for the symbol.
    NotifyDisabled,
    /// No recipient address is configured.
    NoRecipient,
    /// An alert was sent too recently.
    Throttled,
    /// The mail queue is full or closed.
    QueueUnavailable,
}

impl SuppressReason {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NoBounds => "no bounds configured",
            Self::EvaluationFailed => "evaluation failed",
            Self::NotifyDisabled => "notify disabled",
            Self::NoRecipient => "no email configured",
            Self::Throttled => "throttled",
            Self::QueueUnavailable => "mail queue unavailable",
        }
    }

    const fn metric_label(self) -> &'static str {
        match self {
            Self::NoBounds => "no_bounds",
            Self::EvaluationFailed => "evaluation_failed",
            Self::NotifyDisabled => "notify_disabled",
            Self::NoRecipient => "no_recipient",
            Self::Throttled => "throttled",
            Self::QueueUnavailable => "queue_unavailable",
        }
    }
}

impl fmt::Display for SuppressReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of threshold evaluation for one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlertDecision {
    /// No configured bound was breached.
    NoBreach,
    /// An alert with these breach descriptions was queued.
    Sent(Vec<String>),
    /// Alert suppressed.
    Suppressed(SuppressReason),
}

/// What the router did with one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Ping received; the connection must reply with this token.
    Pong(i64),
    /// Tick logged and evaluated.
    Tick {
        /// Symbol of the tick.
        symbol: SymbolId,
        /// Display-formatted price.
        price: String,
        /// Threshold evaluation result.
        alert: AlertDecision,
    },
    /// Subscription acknowledged for a symbol.
    Subscribed(SymbolId),
    /// Server rejected a request.
    Rejected {
        /// Symbol named by the request id, if any.
        symbol: Option<SymbolId>,
        /// Server message.
        reason: String,
    },
    /// Tick for a channel that is not monitored.
    Ignored,
    /// Frame shape not recognized.
    Unclassified,
}

// =============================================================================
// Router
// =============================================================================

/// Dispatches decoded frames to the tick log and the alert path.
pub struct TickRouter {
    store: Arc<ConfigStore>,
    throttle: Arc<NotificationThrottle>,
    ticks: Arc<dyn TickSink>,
    alerts: mpsc::Sender<AlertMessage>,
}

impl TickRouter {
    /// Create a new router.
    #[must_use]
    pub fn new(
        store: Arc<ConfigStore>,
        throttle: Arc<NotificationThrottle>,
        ticks: Arc<dyn TickSink>,
        alerts: mpsc::Sender<AlertMessage>,
    ) -> Self {
        Self {
            store,
            throttle,
            ticks,
            alerts,
        }
    }

    /// Route one decoded frame received at `received_at`.
    pub fn route(&self, message: FeedMessage, received_at: DateTime<Utc>) -> RouteOutcome {
        match message {
            FeedMessage::Ping(ping) => {
                metrics::record_frame(FrameKind::Ping);
                tracing::trace!(token = ping.ping, "Ping received");
                RouteOutcome::Pong(ping.ping)
            }
            FeedMessage::Tick(tick) => {
                metrics::record_frame(FrameKind::Tick);
                self.route_tick(tick, received_at)
            }
            FeedMessage::Subscribed(ack) => {
                metrics::record_frame(FrameKind::Subscribed);
                Self::route_ack(&ack)
            }
            FeedMessage::Error(error) => {
                metrics::record_frame(FrameKind::Error);
                Self::route_error(error)
            }
            FeedMessage::Unknown(value) => {
                metrics::record_frame(FrameKind::Unknown);
                tracing::info!(frame = %value, "Unclassified frame");
                RouteOutcome::Unclassified
            }
        }
    }

    fn route_tick(&self, message: TickMessage, received_at: DateTime<Utc>) -> RouteOutcome {
        let Some(symbol) = symbol_from_channel(&message.ch) else {
            tracing::warn!(channel = %message.ch, "Tick on unrecognized channel");
            return RouteOutcome::Ignored;
        };

        // Held for the whole tick so evaluation never sees a half-applied reload.
        let config = self.store.snapshot();
        let Some(symbol_config) = config.symbol(symbol) else {
            tracing::debug!(symbol, "Tick for unmonitored symbol");
            return RouteOutcome::Ignored;
        };

        let tick = TickRecord::new(symbol, message.tick.close, message.ts, received_at);
        let price = symbol_config.price_format.format(tick.close);

        self.ticks.record_tick(&tick, &price);
        metrics::record_tick(symbol);

        let alert = self.evaluate(&config, symbol_config, &tick, &price, received_at);

        RouteOutcome::Tick {
            symbol: tick.symbol,
            price,
            alert,
        }
    }

    fn route_ack(ack: &SubscribedMessage) -> RouteOutcome {
        let Some(symbol) = symbol_from_channel(&ack.subbed) else {
            tracing::info!(channel = %ack.subbed, "Subscription acknowledged for unknown channel");
            return RouteOutcome::Unclassified;
        };

        tracing::info!(symbol, status = ?ack.status, "Subscription acknowledged");
        RouteOutcome::Subscribed(symbol.to_string())
    }

    fn route_error(error: ErrorMessage) -> RouteOutcome {
        let symbol = error.symbol().map(str::to_string);
        let reason = error
            .err_msg
            .or(error.err_code)
            .unwrap_or_else(|| "unspecified error".to_string());

        tracing::warn!(symbol = ?symbol, id = ?error.id, %reason, "Request rejected by server");
        RouteOutcome::Rejected { symbol, reason }
    }

    // =========================================================================
    // Threshold evaluation
    // =========================================================================

    fn evaluate(
        &self,
        config: &MonitorConfig,
        symbol_config: &SymbolConfig,
        tick: &TickRecord,
        price: &str,
        received_at: DateTime<Utc>,
    ) -> AlertDecision {
        let symbol = symbol_config.symbol.as_str();

        if !symbol_config.has_bounds() {
            tracing::debug!(symbol, reason = %SuppressReason::NoBounds, "Alert check skipped");
            return AlertDecision::Suppressed(SuppressReason::NoBounds);
        }

        let mut breaches = Vec::new();
        for bound in [symbol_config.low, symbol_config.high].into_iter().flatten() {
            let expression = format!("{price}{}{}", bound.op, bound.value);
            match evaluate_expression(&expression) {
                Ok(breached) => {
                    if config.debug {
                        tracing::info!(symbol, %expression, breached, "Threshold evaluated");
                    } else {
                        tracing::debug!(symbol, %expression, breached, "Threshold evaluated");
                    }
                    if breached {
                        breaches.push(format!("{symbol}: {expression}"));
                    }
                }
                Err(e) => {
                    tracing::warn!(symbol, %expression, error = %e, "Threshold evaluation failed");
                    return self.suppress(symbol, tick, SuppressReason::EvaluationFailed);
                }
            }
        }

        if breaches.is_empty() {
            return AlertDecision::NoBreach;
        }
        if !symbol_config.notify {
            return self.suppress(symbol, tick, SuppressReason::NotifyDisabled);
        }
        let Some(recipient) = config.email.clone() else {
            return self.suppress(symbol, tick, SuppressReason::NoRecipient);
        };
        if !self.throttle.should_fire(symbol, received_at) {
            return self.suppress(symbol, tick, SuppressReason::Throttled);
        }

        let alert = AlertMessage {
            recipient,
            symbol: symbol.to_string(),
            body: breaches.join("\n"),
            timestamp: tick.timestamp,
        };

        match self.alerts.try_send(alert) {
            Ok(()) => {
                tracing::info!(symbol, breaches = breaches.len(), "Alert queued");
                self.ticks.record_alert(symbol, tick.timestamp, "alert sent");
                metrics::record_alert_sent(symbol);
                AlertDecision::Sent(breaches)
            }
            Err(TrySendError::Full(_)) => {
                tracing::warn!(symbol, "Mail queue full, dropping alert");
                self.suppress(symbol, tick, SuppressReason::QueueUnavailable)
            }
            Err(TrySendError::Closed(_)) => {
                tracing::warn!(symbol, "Mail worker stopped, dropping alert");
                self.suppress(symbol, tick, SuppressReason::QueueUnavailable)
            }
        }
    }

    fn suppress(&self, symbol: &str, tick: &TickRecord, reason: SuppressReason) -> AlertDecision {
        tracing::info!(symbol, %reason, "Alert suppressed");
        self.ticks
            .record_alert(symbol, tick.timestamp, &format!("alert suppressed: {reason}"));
        metrics::record_alert_suppressed(reason.metric_label());
        AlertDecision::Suppressed(reason)
    }
}
