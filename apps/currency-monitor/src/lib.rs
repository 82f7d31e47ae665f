#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Currency Monitor - Exchange Ticker Watcher
//!
//! A long-running client that keeps one compressed WebSocket subscription
//! to an exchange ticker feed, logs every tick per symbol, and sends
//! throttled email alerts when prices cross configured thresholds. The
//! configuration file is polled and hot-reloaded.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure types and logic
//!   - `expression`: Restricted `number <op> number` evaluator
//!   - `monitor`: Symbol/monitor configuration, price formats, diffing
//!   - `throttle`: Per-symbol alert debounce
//!   - `tick`: Ticker update records
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Mail, tick log, and feed control interfaces
//!   - `services`: Tick routing, config hot-reload
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `huobi`: Feed codec, keepalive, backoff, connection state machine
//!   - `config`: Environment settings, config file store
//!   - `ticklog`: Per-symbol log files behind a background writer
//!   - `mail`: Sendmail sink and alert worker
//!   - `health`: Health check HTTP endpoint
//!
//! # Data Flow
//!
//! ```text
//!                  ┌────────────────┐   ┌────────────┐   ┌──────────────┐
//! Feed WS ────────►│ FeedConnection │──►│ TickRouter │──►│ TickLog      │
//!   ▲  (gzip JSON) └────────────────┘   └────────────┘   └──────────────┘
//!   │ pong/sub            ▲                   │ try_send
//!   └─────────────────────┤                   ▼
//!                         │             ┌────────────┐   ┌──────────────┐
//!           resubscribe   │             │ Alert queue│──►│ sendmail     │
//!                  ┌──────┴────────┐    └────────────┘   └──────────────┘
//! config file ────►│ ConfigWatcher │
//!                  └───────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Configuration, evaluation and throttling with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::expression::{Comparator, Comparison, EvaluationError, evaluate, evaluate_expression};
pub use domain::monitor::{
    ConfigDiff, MonitorConfig, PriceFormat, SymbolConfig, SymbolId, Threshold, diff,
};
pub use domain::throttle::{AlertState, NotificationThrottle};
pub use domain::tick::TickRecord;

// Application
pub use application::ports::{AlertMessage, FeedControl, MailError, MailSink, TickSink};
pub use application::services::{
    AlertDecision, ConfigWatcher, ReloadAction, RouteOutcome, SuppressReason, TickRouter,
    WatcherSettings,
};

// Infrastructure config
pub use infrastructure::config::{
    ConfigError, ConfigStore, FallbackSettings, FeedSettings, MailSettings, RuntimeSettings,
};

// Feed connection
pub use infrastructure::huobi::{
    ConnectionState, FeedConnection, FeedError, FeedHandle, FeedStatus,
};

// Sinks
pub use infrastructure::mail::{AlertDispatcher, SendmailMailSink};
pub use infrastructure::ticklog::{TickLogError, TickLogRegistry, TickLogWriter};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
