//! Configuration Module
//!
//! Runtime settings from the environment and the hot-reloadable monitor
//! configuration file.

mod settings;
mod store;

use std::path::PathBuf;

pub use settings::{
    DEFAULT_CURRENCY, DEFAULT_FEED_URL, FallbackSettings, FeedSettings, MailSettings,
    RuntimeSettings, expand_home,
};
pub(crate) use store::parse_decimal;
pub use store::{ConfigStore, load, parse_document};

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required field is absent.
    #[error("missing required field: {0}")]
    MissingField(String),
    /// A field has a malformed value.
    #[error("invalid value for {field}: {reason}")]
    InvalidValue {
        /// Field path, e.g. `currencies.btcusdt.low`.
        field: String,
        /// What was wrong with it.
        reason: String,
    },
    /// The configuration file does not exist.
    #[error("config file not found: {}", .0.display())]
    NotFound(PathBuf),
    /// The configuration file could not be read.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    /// The configuration file is not valid JSON.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}
