//! Runtime Settings
//!
//! Process-level settings loaded from environment variables. These never
//! change while the monitor runs; everything hot-reloadable lives in the
//! monitor configuration file instead.

use std::path::PathBuf;
use std::time::Duration;

use crate::domain::monitor::{DEFAULT_PRICE_FORMAT, MonitorConfig, PriceFormat, SymbolConfig};
use crate::domain::throttle::DEFAULT_THROTTLE_INTERVAL;

use super::ConfigError;

/// Default feed endpoint.
pub const DEFAULT_FEED_URL: &str = "wss://api.huobi.pro/ws";

/// Default symbol monitored when nothing is configured.
pub const DEFAULT_CURRENCY: &str = "btcusdt";

/// Feed connection settings.
#[derive(Debug, Clone)]
pub struct FeedSettings {
    /// Fixed delay before reconnecting after a failure.
    pub backoff_delay: Duration,
    /// How long to wait for subscription acknowledgments before going live.
    pub subscribe_timeout: Duration,
    /// Inbound silence after which the connection is considered dead.
    pub idle_timeout: Duration,
    /// Maximum consecutive failed attempts (0 = unlimited).
    pub max_reconnect_attempts: u32,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            backoff_delay: Duration::from_secs(5),
            subscribe_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(30),
            max_reconnect_attempts: 0, // Unlimited
        }
    }
}

/// Mail delivery settings.
#[derive(Debug, Clone)]
pub struct MailSettings {
    /// Sender shown in the `From` header.
    pub from: String,
    /// Subject line.
    pub subject: String,
    /// Path of the sendmail-compatible binary.
    pub sendmail_path: PathBuf,
    /// Upper bound on a single delivery.
    pub timeout: Duration,
}

impl Default for MailSettings {
    fn default() -> Self {
        Self {
            from: "currency-monitor".to_string(),
            subject: "Currency Monitor".to_string(),
            sendmail_path: PathBuf::from("/usr/sbin/sendmail"),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Configuration used when no config file is given.
#[derive(Debug, Clone)]
pub struct FallbackSettings {
    /// Feed endpoint.
    pub url: String,
    /// Monitored symbols.
    pub currencies: Vec<String>,
    /// Display format spec applied to every symbol.
    pub price_format: String,
    /// Alert recipient.
    pub email: Option<String>,
}

impl Default for FallbackSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_FEED_URL.to_string(),
            currencies: vec![DEFAULT_CURRENCY.to_string()],
            price_format: DEFAULT_PRICE_FORMAT.to_string(),
            email: None,
        }
    }
}

impl FallbackSettings {
    /// Build a monitor configuration from these settings.
    ///
    /// # Errors
    ///
    /// Returns `InvalidValue` if the price format is not a fixed-point spec.
    pub fn to_monitor_config(&self) -> Result<MonitorConfig, ConfigError> {
        let price_format = PriceFormat::parse(&self.price_format).ok_or_else(|| {
            ConfigError::InvalidValue {
                field: "MONITOR_PRICE_FORMAT".to_string(),
                reason: format!("unsupported format {:?}", self.price_format),
            }
        })?;

        let mut config = MonitorConfig::new(self.url.clone());
        config.email.clone_from(&self.email);
        for currency in &self.currencies {
            config = config
                .with_symbol(SymbolConfig::new(currency.clone()).with_price_format(price_format));
        }
        Ok(config)
    }
}

/// Complete runtime settings.
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    /// Path of the monitor configuration file, if any.
    pub config_path: Option<PathBuf>,
    /// Directory for per-symbol tick logs (`None` = tracing only).
    pub log_dir: Option<PathBuf>,
    /// Minimum time between alerts for one symbol.
    pub throttle_interval: Duration,
    /// Config file polling cadence.
    pub poll_interval: Duration,
    /// Health/metrics HTTP port (0 = disabled).
    pub health_port: u16,
    /// Feed connection settings.
    pub feed: FeedSettings,
    /// Mail delivery settings.
    pub mail: MailSettings,
    /// Configuration used without a config file.
    pub fallback: FallbackSettings,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            config_path: None,
            log_dir: None,
            throttle_interval: DEFAULT_THROTTLE_INTERVAL,
            poll_interval: Duration::from_secs(1),
            health_port: 8085,
            feed: FeedSettings::default(),
            mail: MailSettings::default(),
            fallback: FallbackSettings::default(),
        }
    }
}

impl RuntimeSettings {
    /// Load settings from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let feed = FeedSettings {
            backoff_delay: parse_env_duration_secs(
                "MONITOR_BACKOFF_SECS",
                defaults.feed.backoff_delay,
            ),
            subscribe_timeout: parse_env_duration_secs(
                "MONITOR_SUBSCRIBE_TIMEOUT_SECS",
                defaults.feed.subscribe_timeout,
            ),
            idle_timeout: parse_env_duration_secs(
                "MONITOR_IDLE_TIMEOUT_SECS",
                defaults.feed.idle_timeout,
            ),
            max_reconnect_attempts: parse_env_u32(
                "MONITOR_MAX_RECONNECT_ATTEMPTS",
                defaults.feed.max_reconnect_attempts,
            ),
        };

        let mail = MailSettings {
            from: env_non_empty("MAIL_FROM").unwrap_or(defaults.mail.from),
            subject: env_non_empty("MAIL_SUBJECT").unwrap_or(defaults.mail.subject),
            sendmail_path: env_non_empty("SENDMAIL_PATH")
                .map_or(defaults.mail.sendmail_path, PathBuf::from),
            timeout: parse_env_duration_secs("MAIL_TIMEOUT_SECS", defaults.mail.timeout),
        };

        let fallback = FallbackSettings {
            url: env_non_empty("MONITOR_URL").unwrap_or(defaults.fallback.url),
            currencies: env_non_empty("MONITOR_CURRENCIES")
                .map(|v| parse_list(&v))
                .filter(|list| !list.is_empty())
                .unwrap_or(defaults.fallback.currencies),
            price_format: env_non_empty("MONITOR_PRICE_FORMAT")
                .unwrap_or(defaults.fallback.price_format),
            email: env_non_empty("MONITOR_EMAIL"),
        };

        Self {
            config_path: env_non_empty("MONITOR_CONFIG").map(|p| expand_home(&p)),
            log_dir: env_non_empty("MONITOR_LOG_DIR").map(|p| expand_home(&p)),
            throttle_interval: parse_env_duration_secs(
                "MONITOR_THROTTLE_SECS",
                defaults.throttle_interval,
            ),
            poll_interval: parse_env_duration_millis(
                "MONITOR_POLL_INTERVAL_MS",
                defaults.poll_interval,
            ),
            health_port: parse_env_u16("MONITOR_HEALTH_PORT", defaults.health_port),
            feed,
            mail,
            fallback,
        }
    }
}

/// Expand a leading `~` to the user's home directory.
#[must_use]
pub fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix('~'), std::env::var_os("HOME")) {
        (Some(rest), Some(home)) if rest.is_empty() || rest.starts_with('/') => {
            let mut expanded = PathBuf::from(home);
            expanded.push(rest.trim_start_matches('/'));
            expanded
        }
        _ => PathBuf::from(path),
    }
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_duration_secs(key: &str, default: Duration) -> Duration {
    duration_or(env_non_empty(key).as_deref(), default, Duration::from_secs)
}

fn parse_env_duration_millis(key: &str, default: Duration) -> Duration {
    duration_or(env_non_empty(key).as_deref(), default, Duration::from_millis)
}

/// Parse a positive integer duration. Zero is rejected along with garbage:
/// every duration here feeds a timer or a sleep that must make progress.
fn duration_or(value: Option<&str>, default: Duration, unit: fn(u64) -> Duration) -> Duration {
    value
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|&v| v > 0)
        .map_or(default, unit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feed_settings_defaults() {
        let settings = FeedSettings::default();
        assert_eq!(settings.backoff_delay, Duration::from_secs(5));
        assert_eq!(settings.subscribe_timeout, Duration::from_secs(10));
        assert_eq!(settings.idle_timeout, Duration::from_secs(30));
        assert_eq!(settings.max_reconnect_attempts, 0);
    }

    #[test]
    fn runtime_settings_defaults() {
        let settings = RuntimeSettings::default();
        assert_eq!(settings.throttle_interval, Duration::from_secs(1800));
        assert_eq!(settings.poll_interval, Duration::from_secs(1));
        assert_eq!(settings.health_port, 8085);
        assert!(settings.config_path.is_none());
    }

    #[test]
    fn fallback_builds_monitor_config() {
        let fallback = FallbackSettings {
            currencies: vec!["btcusdt".to_string(), "ethusdt".to_string()],
            price_format: ".4f".to_string(),
            email: Some("ops@example.com".to_string()),
            ..Default::default()
        };

        let config = fallback.to_monitor_config().unwrap();
        assert_eq!(config.url, DEFAULT_FEED_URL);
        assert_eq!(config.email.as_deref(), Some("ops@example.com"));
        assert_eq!(config.symbols.len(), 2);
        assert_eq!(config.symbol("ethusdt").unwrap().price_format.precision(), 4);
        assert!(!config.symbol("btcusdt").unwrap().has_bounds());
    }

    #[test]
    fn fallback_rejects_bad_format() {
        let fallback = FallbackSettings {
            price_format: "%d".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            fallback.to_monitor_config(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn zero_durations_fall_back_to_defaults() {
        let default = Duration::from_secs(5);
        assert_eq!(duration_or(Some("0"), default, Duration::from_secs), default);
        assert_eq!(duration_or(Some("0"), default, Duration::from_millis), default);
        assert_eq!(duration_or(Some("-3"), default, Duration::from_secs), default);
        assert_eq!(duration_or(Some("abc"), default, Duration::from_secs), default);
        assert_eq!(duration_or(None, default, Duration::from_secs), default);
    }

    #[test]
    fn positive_durations_use_their_unit() {
        let default = Duration::from_secs(5);
        assert_eq!(
            duration_or(Some("250"), default, Duration::from_millis),
            Duration::from_millis(250)
        );
        assert_eq!(
            duration_or(Some(" 12 "), default, Duration::from_secs),
            Duration::from_secs(12)
        );
    }

    #[test]
    fn list_parsing_trims_and_lowercases() {
        assert_eq!(parse_list(" BTCUSDT, ethusdt,,"), vec!["btcusdt", "ethusdt"]);
        assert!(parse_list(" , ").is_empty());
    }

    #[test]
    fn expand_home_leaves_plain_paths() {
        assert_eq!(expand_home("/etc/monitor.json"), PathBuf::from("/etc/monitor.json"));
        assert_eq!(expand_home("~other/x"), PathBuf::from("~other/x"));
    }
}
