//! ReaperLoop: periodic `retry()`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::ports::Activator;
use crate::queue::{Queue, RetrySummary};

/// Requeues expired leases and dead-letters exhausted messages on a fixed
/// interval while the activator is enabled.
pub struct ReaperLoop {
    queue: Arc<dyn Queue>,
    activator: Arc<dyn Activator>,
    interval: Duration,
}

impl ReaperLoop {
    pub fn new(queue: Arc<dyn Queue>, activator: Arc<dyn Activator>, interval: Duration) -> Self {
        Self {
            queue,
            activator,
            interval,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                _ = ticker.tick() => {}
            }
            if !self.activator.is_enabled() {
                continue;
            }

            match self.queue.retry().await {
                Ok(summary) if summary != RetrySummary::default() => info!(
                    released_claims = summary.released_claims,
                    retried = summary.retried,
                    dead_lettered = summary.dead_lettered,
                    "retry pass"
                ),
                Ok(_) => {}
                Err(err) => warn!(error = %err, "retry pass failed"),
            }
        }
    }
}
