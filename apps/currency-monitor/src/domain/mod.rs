//! Domain Layer - Monitor configuration, evaluation, and throttling.
//!
//! Pure types and logic with no I/O. Everything here is exercised by the
//! router and the config watcher in the application layer.

/// Restricted threshold comparison grammar.
pub mod expression;

/// Configuration snapshots and diffing.
pub mod monitor;

/// Per-symbol alert debounce.
pub mod throttle;

/// Ticker update records.
pub mod tick;
