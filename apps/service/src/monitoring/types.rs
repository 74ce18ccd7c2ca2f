use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;

/// Reachability of a target as shown to event consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    Online,
    Offline,
}

impl Status {
    pub fn from_reachable(reachable: bool) -> Self {
        if reachable { Status::Online } else { Status::Offline }
    }

    pub fn is_online(self) -> bool {
        matches!(self, Status::Online)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Online => write!(f, "ONLINE"),
            Status::Offline => write!(f, "OFFLINE"),
        }
    }
}

/// Outcome of recording a probe result against the previous one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    /// No previous value for the address in this run
    FirstObservation,
    Unchanged,
    /// Reachability flipped, the only case that is notified
    Changed,
}

/// Result of a single probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub reachable: bool,

    /// Round trip in milliseconds, only present when reachable
    pub rtt_ms: Option<u64>,

    /// Address that actually answered, when the transport reports it
    pub resolved: Option<IpAddr>,
}

impl ProbeResult {
    /// Successful probe with the measured round trip
    pub fn reachable(rtt: Duration, resolved: Option<IpAddr>) -> Self {
        Self { reachable: true, rtt_ms: Some(rtt.as_millis() as u64), resolved }
    }

    pub fn unreachable() -> Self {
        Self { reachable: false, rtt_ms: None, resolved: None }
    }
}

/// Emitted for every probe, whether or not a transition happened
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusEvent {
    pub address: String,
    pub group: String,
    pub status: Status,
    pub rtt_ms: Option<u64>,
    pub transition: Transition,
    pub timestamp: DateTime<Local>,
}

/// Free text line for journals and displays
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogLine {
    pub timestamp: DateTime<Local>,
    pub text: String,
}

/// Everything the monitor publishes to its event sinks
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MonitorEvent {
    Status(StatusEvent),
    Log(LogLine),
}
