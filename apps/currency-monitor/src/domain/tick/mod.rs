//! Tick Records
//!
//! One price update for one symbol, produced per inbound frame and
//! consumed immediately by the tick log and threshold evaluation.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::domain::monitor::SymbolId;

/// A single ticker update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickRecord {
    /// Symbol the tick belongs to.
    pub symbol: SymbolId,
    /// Last traded (close) price.
    pub close: Decimal,
    /// Exchange timestamp, or receipt time when the frame carried none.
    pub timestamp: DateTime<Utc>,
}

impl TickRecord {
    /// Build a tick from an optional exchange timestamp in milliseconds.
    ///
    /// Falls back to `received_at` when the timestamp is absent or out of
    /// range.
    #[must_use]
    pub fn new(
        symbol: impl Into<SymbolId>,
        close: Decimal,
        exchange_ts_ms: Option<i64>,
        received_at: DateTime<Utc>,
    ) -> Self {
        let timestamp = exchange_ts_ms
            .and_then(DateTime::from_timestamp_millis)
            .unwrap_or(received_at);

        Self {
            symbol: symbol.into(),
            close,
            timestamp,
        }
    }
}
