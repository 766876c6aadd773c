//! Runtime stop signal
//!
//! `ChargePoint::stop()` flips the signal once; the transport loop, the
//! queue send worker, and the orchestrator's event task all watch it and
//! wind down in their own time. Later triggers are no-ops, and waiters
//! that subscribe after the stop resolve immediately.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

/// One-shot, clonable stop signal for the station's worker tasks.
#[derive(Clone)]
pub struct ShutdownSignal {
    stopped: Arc<watch::Sender<bool>>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (stopped, _) = watch::channel(false);
        Self {
            stopped: Arc::new(stopped),
        }
    }

    pub fn is_triggered(&self) -> bool {
        *self.stopped.borrow()
    }

    /// Stop the station's workers. Idempotent.
    pub fn trigger(&self) {
        if !self.stopped.send_replace(true) {
            info!("Station runtime stopping, winding down workers");
        }
    }

    pub fn notified(&self) -> ShutdownNotified {
        ShutdownNotified {
            stopped: self.stopped.subscribe(),
        }
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// A future that resolves once the station is stopping.
pub struct ShutdownNotified {
    stopped: watch::Receiver<bool>,
}

impl ShutdownNotified {
    pub async fn wait(mut self) {
        let _ = self.stopped.wait_for(|stopped| *stopped).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wait_resolves_after_trigger() {
        let signal = ShutdownSignal::new();
        let notified = signal.notified();
        signal.trigger();
        notified.wait().await;
        assert!(signal.is_triggered());
    }

    #[tokio::test]
    async fn wait_resolves_when_already_triggered() {
        let signal = ShutdownSignal::new();
        signal.trigger();
        signal.trigger(); // second trigger is a no-op
        signal.notified().wait().await;
    }
}
