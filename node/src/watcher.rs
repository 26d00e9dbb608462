//! Background confirmation polling.
//!
//! Steps signed outside the node, and steps whose submission ended in a
//! transport error, only reach the mirror when somebody reads them back.
//! The watcher does that on a fixed interval.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::service::RemittanceService;

pub struct ConfirmationWatcher {
    service: Arc<RemittanceService>,
    interval: Duration,
}

impl ConfirmationWatcher {
    pub fn new(service: Arc<RemittanceService>, interval: Duration) -> Self {
        Self { service, interval }
    }

    /// Runs one poll.
    pub async fn tick(&self) -> usize {
        let applied = self.service.poll_confirmations().await;
        if applied > 0 {
            tracing::debug!(applied, "confirmations applied");
        }
        applied
    }

    /// Polls forever on a tokio interval. Abort the handle to stop.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                self.tick().await;
            }
        })
    }
}
