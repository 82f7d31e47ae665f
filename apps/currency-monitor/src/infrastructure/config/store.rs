//! File-backed Monitor Configuration
//!
//! Parses the JSON document the config web UI writes and holds the current
//! snapshot for the rest of the process.
//!
//! # Document Format
//!
//! ```json
//! {
//!     "url": "wss://api.huobi.pro/ws",
//!     "email": "ops@example.com",
//!     "debug": false,
//!     "currencies": {
//!         "btcusdt": {"price_format": ".2f", "lowop": "<=", "low": 9000,
//!                     "highop": ">=", "high": 10000, "notify": true}
//!     }
//! }
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;

use crate::domain::expression::Comparator;
use crate::domain::monitor::{MonitorConfig, PriceFormat, SymbolConfig, Threshold};

use super::ConfigError;

/// Operator used for `low` when `lowop` is absent.
const DEFAULT_LOW_OP: Comparator = Comparator::Le;

/// Operator used for `high` when `highop` is absent.
const DEFAULT_HIGH_OP: Comparator = Comparator::Ge;

// =============================================================================
// Config Store
// =============================================================================

/// Holder of the current configuration snapshot.
///
/// Readers take an `Arc` clone and never hold the lock while working with
/// it; reloads swap the whole snapshot.
#[derive(Debug)]
pub struct ConfigStore {
    current: RwLock<Arc<MonitorConfig>>,
}

impl ConfigStore {
    /// Create a store holding `initial`.
    #[must_use]
    pub fn new(initial: MonitorConfig) -> Self {
        Self {
            current: RwLock::new(Arc::new(initial)),
        }
    }

    /// Current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<MonitorConfig> {
        Arc::clone(&self.current.read())
    }

    /// Replace the snapshot, returning the previous one.
    pub fn replace(&self, next: MonitorConfig) -> Arc<MonitorConfig> {
        std::mem::replace(&mut *self.current.write(), Arc::new(next))
    }
}

// =============================================================================
// Loading
// =============================================================================

#[derive(Debug, Deserialize)]
struct RawDocument {
    url: Option<Value>,
    email: Option<Value>,
    debug: Option<Value>,
    #[serde(default)]
    currencies: BTreeMap<String, RawCurrency>,
}

#[derive(Debug, Default, Deserialize)]
struct RawCurrency {
    price_format: Option<Value>,
    lowop: Option<Value>,
    low: Option<Value>,
    highop: Option<Value>,
    high: Option<Value>,
    notify: Option<Value>,
}

/// Load a configuration file.
///
/// # Errors
///
/// Returns `NotFound` if the file does not exist, `Io` for other read
/// failures, and the errors of [`parse_document`] for its content.
pub fn load(path: &Path) -> Result<MonitorConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ConfigError::NotFound(path.to_path_buf())
        } else {
            ConfigError::Io(e)
        }
    })?;
    parse_document(&text)
}

/// Parse a configuration document.
///
/// # Errors
///
/// - `Parse` if the text is not a JSON object
/// - `MissingField` if `url` is absent
/// - `InvalidValue` for malformed field values
pub fn parse_document(text: &str) -> Result<MonitorConfig, ConfigError> {
    let raw: RawDocument = serde_json::from_str(text).map_err(|e| {
        if e.is_data() {
            ConfigError::InvalidValue {
                field: "document".to_string(),
                reason: e.to_string(),
            }
        } else {
            ConfigError::Parse(e)
        }
    })?;

    let url = match raw.url {
        None | Some(Value::Null) => return Err(ConfigError::MissingField("url".to_string())),
        Some(value) => string_field("url", &value)?,
    };
    if !(url.starts_with("ws://") || url.starts_with("wss://")) {
        return Err(invalid("url", format!("not a WebSocket URL: {url:?}")));
    }

    let email = match raw.email {
        None | Some(Value::Null) => None,
        Some(value) => Some(string_field("email", &value)?).filter(|e| !e.trim().is_empty()),
    };

    let debug = match raw.debug {
        None | Some(Value::Null) => false,
        Some(value) => bool_field("debug", &value)?,
    };

    let mut config = MonitorConfig::new(url).with_debug(debug);
    config.email = email;

    for (symbol, currency) in raw.currencies {
        if symbol.trim().is_empty() {
            return Err(invalid("currencies", "empty symbol id".to_string()));
        }
        config = config.with_symbol(parse_currency(&symbol, currency)?);
    }

    Ok(config)
}

fn parse_currency(symbol: &str, raw: RawCurrency) -> Result<SymbolConfig, ConfigError> {
    let field = |name: &str| format!("currencies.{symbol}.{name}");

    let price_format = match raw.price_format {
        None | Some(Value::Null) => PriceFormat::default(),
        Some(value) => {
            let spec = string_field(&field("price_format"), &value)?;
            PriceFormat::parse(&spec).ok_or_else(|| {
                invalid(&field("price_format"), format!("unsupported format {spec:?}"))
            })?
        }
    };

    let low = parse_bound(&field("low"), raw.lowop, raw.low, DEFAULT_LOW_OP)?;
    let high = parse_bound(&field("high"), raw.highop, raw.high, DEFAULT_HIGH_OP)?;

    let notify = match raw.notify {
        None | Some(Value::Null) => true,
        Some(value) => bool_field(&field("notify"), &value)?,
    };

    Ok(SymbolConfig {
        symbol: symbol.to_string(),
        price_format,
        low,
        high,
        notify,
    })
}

fn parse_bound(
    field: &str,
    op: Option<Value>,
    value: Option<Value>,
    default_op: Comparator,
) -> Result<Option<Threshold>, ConfigError> {
    let op_field = format!("{field}op");
    let op = match op {
        None | Some(Value::Null) => default_op,
        Some(v) => {
            let token = string_field(&op_field, &v)?;
            let op: Comparator = token
                .parse()
                .map_err(|_| invalid(&op_field, format!("unsupported operator {token:?}")))?;
            if !op.is_ordering() {
                return Err(invalid(&op_field, format!("{token:?} cannot bound a price")));
            }
            op
        }
    };

    let value = match value {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => return Ok(None),
        Some(v) => decimal_field(field, &v)?,
    };

    Ok(Some(Threshold::new(op, value)))
}

fn string_field(field: &str, value: &Value) -> Result<String, ConfigError> {
    value
        .as_str()
        .map(|s| s.trim().to_string())
        .ok_or_else(|| invalid(field, format!("expected a string, got {value}")))
}

fn bool_field(field: &str, value: &Value) -> Result<bool, ConfigError> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::String(s) if s.eq_ignore_ascii_case("true") => Ok(true),
        Value::String(s) if s.eq_ignore_ascii_case("false") => Ok(false),
        other => Err(invalid(field, format!("expected a boolean, got {other}"))),
    }
}

fn decimal_field(field: &str, value: &Value) -> Result<Decimal, ConfigError> {
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        other => return Err(invalid(field, format!("expected a number, got {other}"))),
    };
    parse_decimal(&text).ok_or_else(|| invalid(field, format!("not a number: {text:?}")))
}

/// Parse a decimal, accepting the exponent notation JSON numbers may use.
pub(crate) fn parse_decimal(text: &str) -> Option<Decimal> {
    Decimal::from_str(text)
        .or_else(|_| Decimal::from_scientific(text))
        .ok()
}

fn invalid(field: &str, reason: String) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason,
    }
}
