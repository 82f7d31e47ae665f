//! Huobi WebSocket Message Types
//!
//! Wire format types for the market ticker feed.
//!
//! # Inbound (gzip-compressed JSON)
//!
//! ```json
//! {"ping": 1600000000000}
//! {"ch": "market.btcusdt.detail", "ts": 1600000000000, "tick": {"close": 9999.99, ...}}
//! {"id": "btcusdt.detail", "status": "ok", "subbed": "market.btcusdt.detail", "ts": 1600000000000}
//! {"id": "btcusdt.detail", "status": "error", "err-code": "bad-request", "err-msg": "invalid topic"}
//! ```
//!
//! # Outbound (plain JSON text)
//!
//! ```json
//! {"sub": "market.btcusdt.detail", "id": "btcusdt.detail"}
//! {"pong": 1600000000000}
//! ```

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};

use crate::domain::monitor::channel_for;
use crate::infrastructure::config::parse_decimal;

// =============================================================================
// Inbound
// =============================================================================

/// A classified inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    /// Keepalive token that must be echoed back.
    Ping(PingMessage),
    /// Ticker update for one channel.
    Tick(TickMessage),
    /// Subscription acknowledgment.
    Subscribed(SubscribedMessage),
    /// Error response (usually a rejected subscription).
    Error(ErrorMessage),
    /// Any shape this client does not recognize.
    Unknown(serde_json::Value),
}

/// Server keepalive ping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingMessage {
    /// Opaque token to echo.
    pub ping: i64,
}

/// Ticker update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickMessage {
    /// Channel name, `market.<symbol>.detail`.
    pub ch: String,
    /// Exchange timestamp in milliseconds.
    #[serde(default)]
    pub ts: Option<i64>,
    /// Ticker body.
    pub tick: TickPayload,
}

/// Ticker body. Only the close price is used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickPayload {
    /// Last traded price.
    #[serde(deserialize_with = "decimal_from_json")]
    pub close: Decimal,
}

/// Subscription acknowledgment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribedMessage {
    /// Request id echoed by the server.
    #[serde(default)]
    pub id: Option<String>,
    /// Status, normally `ok`.
    #[serde(default)]
    pub status: Option<String>,
    /// Subscribed channel.
    pub subbed: String,
    /// Server timestamp in milliseconds.
    #[serde(default)]
    pub ts: Option<i64>,
}

/// Error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    /// Request id the error refers to.
    #[serde(default)]
    pub id: Option<String>,
    /// Always `error`.
    pub status: String,
    /// Machine-readable code.
    #[serde(rename = "err-code", default)]
    pub err_code: Option<String>,
    /// Human-readable message.
    #[serde(rename = "err-msg", default)]
    pub err_msg: Option<String>,
}

impl ErrorMessage {
    /// Symbol named by a `<symbol>.detail` request id, if any.
    #[must_use]
    pub fn symbol(&self) -> Option<&str> {
        self.id
            .as_deref()?
            .strip_suffix(".detail")
            .filter(|s| !s.is_empty())
    }
}

// =============================================================================
// Outbound
// =============================================================================

/// Subscription request for one symbol's ticker detail channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeRequest {
    /// Channel to subscribe to.
    pub sub: String,
    /// Request id, unique within the session.
    pub id: String,
}

impl SubscribeRequest {
    /// Build the request for a symbol.
    #[must_use]
    pub fn for_symbol(symbol: &str) -> Self {
        Self {
            sub: channel_for(symbol),
            id: format!("{symbol}.detail"),
        }
    }
}

fn decimal_from_json<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    let text = match &value {
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(s) => s.clone(),
        other => {
            return Err(serde::de::Error::custom(format!(
                "expected a number, got {other}"
            )));
        }
    };
    parse_decimal(&text)
        .ok_or_else(|| serde::de::Error::custom(format!("not a decimal: {text}")))
}
