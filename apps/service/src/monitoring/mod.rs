/// Monitoring engine module - probes targets and reports transitions
///
/// This module is responsible for:
/// - Probing addresses with an address family fallback
/// - Remembering per-address reachability for one run
/// - Scheduling passes over the live target list
/// - Publishing status events and dispatching notifications on transitions
pub mod bus;
pub mod checker;
pub mod executor;
pub mod notifier;
pub mod scheduler;
pub mod state;
pub mod stop;
pub mod types;

pub use bus::EventBus;
pub use executor::{ProbeExecutor, Prober};
pub use notifier::{Dispatcher, Notifier, NotifyError};
pub use scheduler::{Monitor, MonitorError, MonitorSettings};
pub use stop::StopSignal;
pub use types::{MonitorEvent, ProbeResult, Status, StatusEvent, Transition};
