//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Huobi market feed WebSocket client.
pub mod huobi;

/// Runtime settings and the monitor configuration store.
pub mod config;

/// Per-symbol tick log files.
pub mod ticklog;

/// Alert mail delivery.
pub mod mail;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Tracing subscriber and optional OpenTelemetry export.
pub mod telemetry;
