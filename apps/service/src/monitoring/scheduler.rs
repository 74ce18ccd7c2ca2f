use chrono::Local;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::bus::EventBus;
use super::executor::Prober;
use super::notifier::{Dispatcher, Notifier, SEND_TIMEOUT, transition_message};
use super::state::TargetState;
use super::stop::{StopHandle, StopSignal, stop_pair};
use super::types::{MonitorEvent, ProbeResult, Status, StatusEvent, Transition};
use crate::targets::{Target, TargetSource};

/// Pause between two probes of the same pass
pub const INTER_PROBE_DELAY: Duration = Duration::from_millis(60);

/// Extra time `stop` waits on top of one probe timeout
pub const STOP_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MonitorError {
    #[error("No targets configured")]
    NoTargetsConfigured,
    #[error("Monitoring is already running")]
    AlreadyRunning,
    #[error("Invalid configuration: {0}")]
    ConfigurationInvalid(String),
}

/// Timing of a monitoring run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorSettings {
    /// Pause after each full pass
    pub interval: Duration,
    /// Per attempt probe timeout
    pub timeout: Duration,
    pub inter_probe_delay: Duration,
    pub stop_grace: Duration,
    /// Notify when monitoring starts and stops
    pub lifecycle_notices: bool,
}

impl MonitorSettings {
    pub fn new(interval: Duration, timeout: Duration) -> Result<Self, MonitorError> {
        if interval.is_zero() {
            return Err(MonitorError::ConfigurationInvalid("interval must be positive".into()));
        }
        if timeout.is_zero() {
            return Err(MonitorError::ConfigurationInvalid("timeout must be positive".into()));
        }

        Ok(Self {
            interval,
            timeout,
            inter_probe_delay: INTER_PROBE_DELAY,
            stop_grace: STOP_GRACE,
            lifecycle_notices: false,
        })
    }

    /// Settings from fractional seconds as found in config files
    pub fn from_secs(interval_seconds: f64, timeout_seconds: f64) -> Result<Self, MonitorError> {
        let to_duration = |name: &str, secs: f64| {
            Duration::try_from_secs_f64(secs)
                .map_err(|_| MonitorError::ConfigurationInvalid(format!("{name} must be positive, got {secs}")))
        };
        Self::new(to_duration("interval", interval_seconds)?, to_duration("timeout", timeout_seconds)?)
    }

    pub fn with_inter_probe_delay(mut self, delay: Duration) -> Self {
        self.inter_probe_delay = delay;
        self
    }

    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    pub fn with_lifecycle_notices(mut self, enabled: bool) -> Self {
        self.lifecycle_notices = enabled;
        self
    }
}

struct Run {
    stop: StopHandle,
    task: JoinHandle<()>,
}

/// Periodically probes every configured target on one background task.
///
/// `Stopped -> Running -> Stopped`, there is no pause. Each run starts with
/// empty transition memory, so the first probe of a target after `start` is
/// never notified.
pub struct Monitor {
    settings: MonitorSettings,
    targets: Arc<dyn TargetSource>,
    prober: Arc<dyn Prober>,
    dispatcher: Dispatcher,
    bus: EventBus,
    run: Option<Run>,
}

impl Monitor {
    pub fn new(
        settings: MonitorSettings,
        targets: Arc<dyn TargetSource>,
        prober: Arc<dyn Prober>,
        notifier: Arc<dyn Notifier>,
        bus: EventBus,
    ) -> Self {
        Self { settings, targets, prober, dispatcher: Dispatcher::new(notifier), bus, run: None }
    }

    pub fn settings(&self) -> &MonitorSettings {
        &self.settings
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.bus.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.run.as_ref().is_some_and(|run| !run.task.is_finished())
    }

    /// Spawn the monitoring task. Must be called within a tokio runtime.
    pub fn start(&mut self) -> Result<(), MonitorError> {
        if self.is_running() {
            return Err(MonitorError::AlreadyRunning);
        }

        let snapshot = self.targets.targets();
        if snapshot.is_empty() {
            return Err(MonitorError::NoTargetsConfigured);
        }

        let (stop, signal) = stop_pair();
        let count = snapshot.len();
        let worker = Worker {
            settings: self.settings.clone(),
            targets: self.targets.clone(),
            prober: self.prober.clone(),
            dispatcher: self.dispatcher.clone(),
            bus: self.bus.clone(),
            state: TargetState::new(),
            stop: signal,
        };
        let task = tokio::spawn(worker.run(snapshot));
        self.run = Some(Run { stop, task });

        info!(
            targets = count,
            interval = ?self.settings.interval,
            timeout = ?self.settings.timeout,
            "Monitoring started"
        );
        self.bus.publish_log(format!("Monitoring started ({count} targets)"));
        if self.settings.lifecycle_notices {
            self.dispatcher.dispatch(format!("📡 Monitoring started\nTargets: {count}"));
        }

        Ok(())
    }

    /// Ask the task to exit and wait for it, bounded by one probe timeout
    /// plus the grace period.
    ///
    /// Probes in flight are not aborted. A task that misses the deadline is
    /// left to finish its probe and discards the result. Queued notifications
    /// then get up to [`SEND_TIMEOUT`] to go out.
    pub async fn stop(&mut self) {
        let Some(Run { stop, mut task }) = self.run.take() else {
            return;
        };
        stop.stop();

        let wait = self.settings.timeout + self.settings.stop_grace;
        match tokio::time::timeout(wait, &mut task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Monitoring task ended abnormally"),
            Err(_) => warn!(?wait, "Monitoring task did not stop in time, detaching"),
        }

        info!("Monitoring stopped");
        self.bus.publish_log("Monitoring stopped");
        if self.settings.lifecycle_notices {
            self.dispatcher.dispatch("⏹ Monitoring stopped".to_string());
        }

        self.dispatcher.flush(SEND_TIMEOUT).await;
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        if let Some(run) = self.run.take() {
            run.stop.stop();
        }
    }
}

/// State owned by the background task for one run
struct Worker {
    settings: MonitorSettings,
    targets: Arc<dyn TargetSource>,
    prober: Arc<dyn Prober>,
    dispatcher: Dispatcher,
    bus: EventBus,
    state: TargetState,
    stop: StopSignal,
}

impl Worker {
    async fn run(mut self, snapshot: Vec<Target>) {
        let mut pending = Some(snapshot);

        'passes: loop {
            if self.stop.is_stopped() {
                break;
            }

            // the list may change between passes, never during one
            let targets = pending.take().unwrap_or_else(|| self.targets.targets());
            self.state.retain_addresses(targets.iter().map(|t| t.address.as_str()));

            if targets.is_empty() {
                debug!("No targets configured, waiting");
                if self.stop.sleep(self.settings.interval).await {
                    break;
                }
                continue;
            }

            for target in &targets {
                if !self.probe_target(target).await {
                    break 'passes;
                }
                if self.stop.sleep(self.settings.inter_probe_delay).await {
                    break 'passes;
                }
            }

            if self.stop.sleep(self.settings.interval).await {
                break;
            }
        }

        debug!("Monitoring task exiting");
    }

    /// Probe, record, publish. Returns false when a stop arrived meanwhile.
    async fn probe_target(&mut self, target: &Target) -> bool {
        let address = target.address.as_str();
        let probe = self.prober.probe(address, self.settings.timeout, &self.stop);

        let result = match AssertUnwindSafe(probe).catch_unwind().await {
            Ok(result) => result,
            Err(_) => {
                warn!(address, "Probe panicked, treating target as unreachable");
                self.bus.publish_log(format!("Probe error for {address}"));
                ProbeResult::unreachable()
            }
        };

        if self.stop.is_stopped() {
            return false;
        }

        let status = Status::from_reachable(result.reachable);
        let rtt_ms = if result.reachable { result.rtt_ms } else { None };
        let transition = self.state.record(address, result.reachable);
        let now = Local::now();

        self.bus.publish_status(StatusEvent {
            address: target.address.clone(),
            group: target.group.clone(),
            status,
            rtt_ms,
            transition,
            timestamp: now,
        });

        match transition {
            Transition::FirstObservation => {
                info!(address, group = %target.group, %status, ?rtt_ms, "Initial status")
            }
            Transition::Unchanged => debug!(address, %status, ?rtt_ms, "Status unchanged"),
            Transition::Changed => {
                info!(address, group = %target.group, %status, "Status changed");
                let text = transition_message(target, status, now);
                self.bus.publish_log(text.clone());
                self.dispatcher.dispatch(text);
            }
        }

        true
    }
}
