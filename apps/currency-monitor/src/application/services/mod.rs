//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `TickRouter`: Classifies frames, logs ticks, decides alerts
//! - `ConfigWatcher`: Hot-reloads the monitor configuration

mod config_watcher;
mod router;

pub use config_watcher::{ConfigWatcher, ReloadAction, WatcherSettings};
pub use router::{AlertDecision, RouteOutcome, SuppressReason, TickRouter};
