use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::checker::{AddressFamily, Checker};
use super::stop::StopSignal;
use super::types::ProbeResult;

/// Slack on top of the probe timeout before an attempt is abandoned
pub const ATTEMPT_OVERHEAD: Duration = Duration::from_secs(1);

/// Full reachability probe of one address.
///
/// Never fails: every transport problem is reported as unreachable.
#[async_trait::async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, address: &str, timeout: Duration, stop: &StopSignal) -> ProbeResult;
}

/// Runs a [`Checker`] with a hard deadline and a single address family retry
pub struct ProbeExecutor {
    checker: Arc<dyn Checker>,
    overhead: Duration,
}

impl ProbeExecutor {
    pub fn new(checker: Arc<dyn Checker>) -> Self {
        Self { checker, overhead: ATTEMPT_OVERHEAD }
    }

    /// Override the per attempt slack
    pub fn with_overhead(mut self, overhead: Duration) -> Self {
        self.overhead = overhead;
        self
    }

    /// Worst case duration of one probe
    pub fn max_duration(&self, timeout: Duration) -> Duration {
        (timeout + self.overhead) * 2
    }

    async fn attempt(&self, address: &str, family: AddressFamily, timeout: Duration) -> ProbeResult {
        let deadline = timeout + self.overhead;
        let check = AssertUnwindSafe(self.checker.check(address, family, timeout)).catch_unwind();

        match tokio::time::timeout(deadline, check).await {
            Ok(Ok(Ok(reply))) => ProbeResult::reachable(reply.rtt, reply.resolved),
            Ok(Ok(Err(e))) => {
                debug!(address, %family, error = %e, "Probe attempt failed");
                ProbeResult::unreachable()
            }
            Ok(Err(_panic)) => {
                warn!(address, %family, "Probe attempt panicked");
                ProbeResult::unreachable()
            }
            Err(_) => {
                debug!(address, %family, ?deadline, "Probe attempt exceeded deadline");
                ProbeResult::unreachable()
            }
        }
    }
}

#[async_trait::async_trait]
impl Prober for ProbeExecutor {
    async fn probe(&self, address: &str, timeout: Duration, stop: &StopSignal) -> ProbeResult {
        let result = self.attempt(address, AddressFamily::Any, timeout).await;
        if result.reachable || stop.is_stopped() {
            return result;
        }

        self.attempt(address, AddressFamily::fallback_for(address), timeout).await
    }
}
