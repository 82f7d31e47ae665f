//! Prometheus Metrics Module
//!
//! Exposes monitor metrics via Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Frames**: Inbound frames by kind, undecodable frames
//! - **Ticks**: Ticks routed per symbol
//! - **Alerts**: Alerts sent, suppressed (by reason) and failed
//! - **Connection**: Reconnects, subscribed symbol count, connection state
//! - **Config**: Reload outcomes
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Recording
//! functions are no-ops until [`init_metrics`] installs the recorder.

use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Calling this again after a successful install returns the same handle.
///
/// # Errors
///
/// Returns an error if the global recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "currency_monitor_frames_received_total",
        "Total frames received from the feed by kind"
    );
    describe_counter!(
        "currency_monitor_frames_undecodable_total",
        "Total frames that failed to decompress or decode"
    );
    describe_counter!(
        "currency_monitor_ticks_total",
        "Total ticks routed per symbol"
    );

    describe_counter!(
        "currency_monitor_alerts_sent_total",
        "Total alerts handed to the mail sink"
    );
    describe_counter!(
        "currency_monitor_alerts_suppressed_total",
        "Total threshold breaches that did not produce an alert, by reason"
    );
    describe_counter!(
        "currency_monitor_alerts_failed_total",
        "Total alert deliveries that failed"
    );

    describe_counter!(
        "currency_monitor_tick_log_dropped_total",
        "Tick log lines dropped because the writer queue was full"
    );

    describe_counter!(
        "currency_monitor_reconnects_total",
        "Total feed reconnection attempts"
    );
    describe_gauge!(
        "currency_monitor_subscribed_symbols",
        "Symbols subscribed on the current connection"
    );
    describe_gauge!(
        "currency_monitor_connection_live",
        "1 while the feed connection is live, 0 otherwise"
    );

    describe_counter!(
        "currency_monitor_config_reloads_total",
        "Configuration reloads by outcome"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Metric labels for inbound frame kinds.
#[derive(Debug, Clone, Copy)]
pub enum FrameKind {
    /// Keepalive ping.
    Ping,
    /// Ticker update.
    Tick,
    /// Subscription acknowledgment.
    Subscribed,
    /// Error response.
    Error,
    /// Unrecognized shape.
    Unknown,
}

impl FrameKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::Tick => "tick",
            Self::Subscribed => "subscribed",
            Self::Error => "error",
            Self::Unknown => "unknown",
        }
    }
}

/// Metric labels for config reload outcomes.
#[derive(Debug, Clone, Copy)]
pub enum ReloadOutcome {
    /// Parameters applied in place.
    Applied,
    /// Symbol set or endpoint changed; connection rebuilt.
    Resubscribed,
    /// Reload rejected; last-good config kept.
    Rejected,
}

impl ReloadOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Resubscribed => "resubscribed",
            Self::Rejected => "rejected",
        }
    }
}

/// Record a decoded inbound frame.
pub fn record_frame(kind: FrameKind) {
    counter!(
        "currency_monitor_frames_received_total",
        "kind" => kind.as_str()
    )
    .increment(1);
}

/// Record a frame that could not be decoded.
pub fn record_undecodable_frame() {
    counter!("currency_monitor_frames_undecodable_total").increment(1);
}

/// Record a routed tick.
pub fn record_tick(symbol: &str) {
    counter!(
        "currency_monitor_ticks_total",
        "symbol" => symbol.to_string()
    )
    .increment(1);
}

/// Record an alert handed to the mail sink.
pub fn record_alert_sent(symbol: &str) {
    counter!(
        "currency_monitor_alerts_sent_total",
        "symbol" => symbol.to_string()
    )
    .increment(1);
}

/// Record a suppressed alert.
pub fn record_alert_suppressed(reason: &'static str) {
    counter!(
        "currency_monitor_alerts_suppressed_total",
        "reason" => reason
    )
    .increment(1);
}

/// Record a failed alert delivery.
pub fn record_alert_failed() {
    counter!("currency_monitor_alerts_failed_total").increment(1);
}

/// Record a tick log line dropped before reaching the writer.
pub fn record_tick_log_dropped() {
    counter!("currency_monitor_tick_log_dropped_total").increment(1);
}

/// Record a reconnection attempt.
pub fn record_reconnect() {
    counter!("currency_monitor_reconnects_total").increment(1);
}

/// Update the subscribed symbol count.
#[allow(clippy::cast_precision_loss)]
pub fn set_subscribed_symbols(count: usize) {
    gauge!("currency_monitor_subscribed_symbols").set(count as f64);
}

/// Update the connection liveness gauge.
pub fn set_connection_live(live: bool) {
    gauge!("currency_monitor_connection_live").set(if live { 1.0 } else { 0.0 });
}

/// Record a config reload.
pub fn record_config_reload(outcome: ReloadOutcome) {
    counter!(
        "currency_monitor_config_reloads_total",
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_kind_as_str() {
        assert_eq!(FrameKind::Ping.as_str(), "ping");
        assert_eq!(FrameKind::Tick.as_str(), "tick");
        assert_eq!(FrameKind::Subscribed.as_str(), "subscribed");
        assert_eq!(FrameKind::Error.as_str(), "error");
        assert_eq!(FrameKind::Unknown.as_str(), "unknown");
    }

    #[test]
    fn reload_outcome_as_str() {
        assert_eq!(ReloadOutcome::Applied.as_str(), "applied");
        assert_eq!(ReloadOutcome::Resubscribed.as_str(), "resubscribed");
        assert_eq!(ReloadOutcome::Rejected.as_str(), "rejected");
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_tick("btcusdt");
        record_alert_suppressed("throttled");
        record_tick_log_dropped();
        set_subscribed_symbols(3);
        set_connection_live(true);
    }
}
