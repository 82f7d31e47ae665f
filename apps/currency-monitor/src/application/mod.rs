//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the domain interacts with external systems.

/// Port interfaces for mail, tick logging and feed control.
pub mod ports;

/// Tick routing and configuration hot-reload.
pub mod services;
