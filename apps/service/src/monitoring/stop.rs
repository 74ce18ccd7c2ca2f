use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

/// Cooperative stop request shared between the monitor and its worker.
///
/// Cloning is cheap, every clone observes the same request.
#[derive(Debug, Clone)]
pub struct StopSignal {
    rx: watch::Receiver<bool>,
    // only set by `never`, keeps the channel open
    _owner: Option<Arc<watch::Sender<bool>>>,
}

/// Owning side of a [`StopSignal`]
#[derive(Debug)]
pub struct StopHandle {
    tx: watch::Sender<bool>,
}

pub fn stop_pair() -> (StopHandle, StopSignal) {
    let (tx, rx) = watch::channel(false);
    (StopHandle { tx }, StopSignal { rx, _owner: None })
}

impl StopHandle {
    pub fn stop(&self) {
        // send_replace works even when every signal was dropped
        self.tx.send_replace(true);
    }
}

impl StopSignal {
    /// A signal that is never raised, for one-shot probes
    pub fn never() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { rx, _owner: Some(Arc::new(tx)) }
    }

    /// True once a stop was requested or the handle is gone
    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    /// Resolves once a stop was requested
    pub async fn stopped(&mut self) {
        // errors only when the handle was dropped, which counts as a stop
        let _ = self.rx.wait_for(|stopped| *stopped).await;
    }

    /// Sleep for `duration`, returns true when woken early by a stop
    pub async fn sleep(&mut self, duration: Duration) -> bool {
        if self.is_stopped() {
            return true;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.stopped() => {}
        }
        self.is_stopped()
    }
}
