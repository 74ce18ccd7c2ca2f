use chrono::Local;
use tokio::sync::broadcast;
use tracing::debug;

use super::types::{LogLine, MonitorEvent, StatusEvent};

pub const DEFAULT_CAPACITY: usize = 256;

/// Fan-out channel between the monitor and its event sinks.
///
/// Publishing never blocks. A consumer that falls more than the capacity
/// behind skips the oldest events and sees `RecvError::Lagged`.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<MonitorEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.tx.subscribe()
    }

    pub fn publish_status(&self, event: StatusEvent) {
        debug!(
            address = %event.address,
            status = %event.status,
            rtt_ms = ?event.rtt_ms,
            "Bus: publishing status"
        );
        self.publish(MonitorEvent::Status(event));
    }

    pub fn publish_log(&self, text: impl Into<String>) {
        self.publish(MonitorEvent::Log(LogLine { timestamp: Local::now(), text: text.into() }));
    }

    fn publish(&self, event: MonitorEvent) {
        // Ignore errors if there are no receivers
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::types::{Status, Transition};

    fn status(address: &str) -> StatusEvent {
        StatusEvent {
            address: address.to_string(),
            group: String::new(),
            status: Status::Online,
            rtt_ms: Some(3),
            transition: Transition::Unchanged,
            timestamp: Local::now(),
        }
    }

    #[tokio::test]
    async fn test_every_subscriber_sees_events_in_order() {
        let bus = EventBus::new(8);
        let mut display = bus.subscribe();
        let mut journal = bus.subscribe();

        bus.publish_status(status("a"));
        bus.publish_log("started");

        for rx in [&mut display, &mut journal] {
            assert!(matches!(rx.recv().await.unwrap(), MonitorEvent::Status(e) if e.address == "a"));
            assert!(matches!(rx.recv().await.unwrap(), MonitorEvent::Log(l) if l.text == "started"));
        }
    }

    #[test]
    fn test_publish_without_subscribers_is_fine() {
        let bus = EventBus::default();
        bus.publish_log("nobody listens");
    }

    #[tokio::test]
    async fn test_slow_consumer_lags_instead_of_blocking() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();

        for i in 0..5 {
            bus.publish_log(format!("line {i}"));
        }

        assert!(matches!(rx.recv().await, Err(broadcast::error::RecvError::Lagged(3))));
        assert!(matches!(rx.recv().await.unwrap(), MonitorEvent::Log(l) if l.text == "line 3"));
    }
}
