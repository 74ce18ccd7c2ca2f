//! pingmon - reachability monitoring with transition alerts
//!
//! A [`monitoring::Monitor`] probes a live target list on one background task,
//! publishes a status event for every probe, and notifies only when a target
//! flips between online and offline.

pub mod config;
pub mod journal;
pub mod monitoring;
pub mod targets;

pub use config::Config;
pub use monitoring::{Monitor, MonitorError, MonitorSettings};
pub use targets::{Target, TargetList, TargetSource};
