//! Port Interfaces
//!
//! Contracts the application layer needs from the outside world,
//! following the Hexagonal Architecture pattern.
//!
//! ## Driven Ports (Outbound)
//!
//! - [`MailSink`]: Delivers one alert message to one recipient
//! - [`TickSink`]: Append-only per-symbol record of ticks and alert decisions
//! - [`FeedControl`]: Rebuild requests to the feed connection

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::monitor::SymbolId;
use crate::domain::tick::TickRecord;

// =============================================================================
// Mail
// =============================================================================

/// One alert ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertMessage {
    /// Recipient address.
    pub recipient: String,
    /// Symbol that breached.
    pub symbol: SymbolId,
    /// Breach descriptions, one per line.
    pub body: String,
    /// Time of the tick that triggered the alert.
    pub timestamp: DateTime<Utc>,
}

/// Errors from mail delivery.
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    /// The delivery program could not be started.
    #[error("failed to start mailer: {0}")]
    Spawn(#[source] std::io::Error),

    /// Writing the message or collecting output failed.
    #[error("mailer I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Delivery did not finish in time.
    #[error("mail delivery timed out after {0:?}")]
    Timeout(Duration),

    /// The delivery program reported failure.
    #[error("mailer exited with {status}: {stderr}")]
    Exit {
        /// Exit status description.
        status: String,
        /// Captured standard error.
        stderr: String,
    },
}

/// Outbound mail delivery.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MailSink: Send + Sync {
    /// Deliver one alert.
    ///
    /// # Errors
    ///
    /// Returns a `MailError` if the message could not be handed off.
    async fn send(&self, alert: &AlertMessage) -> Result<(), MailError>;
}

// =============================================================================
// Feed Control
// =============================================================================

/// Control surface of the running feed connection.
#[cfg_attr(test, mockall::automock)]
pub trait FeedControl: Send + Sync {
    /// Ask the connection to close and subscribe the current symbol set.
    ///
    /// Returns `false` if the connection has stopped.
    fn request_resubscribe(&self) -> bool;
}

// =============================================================================
// Tick Log
// =============================================================================

/// Append-only per-symbol log of ticks and alert decisions.
///
/// Called from the feed's receive loop, so implementations must not block
/// on I/O. Writes are best-effort: implementations report their own
/// failures and never propagate them into tick processing.
pub trait TickSink: Send + Sync {
    /// Record one tick with its display-formatted price.
    fn record_tick(&self, tick: &TickRecord, price: &str);

    /// Record an alert decision (`sent` or `suppressed: <reason>`).
    fn record_alert(&self, symbol: &str, timestamp: DateTime<Utc>, outcome: &str);

    /// Release per-symbol resources for symbols no longer monitored.
    fn retain_symbols(&self, _symbols: &[SymbolId]) {}
}
