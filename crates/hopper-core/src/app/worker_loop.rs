//! WorkerLoop: poll -> dispatch -> ack.
//!
//! Each tick claims as many messages as there are free handler slots and
//! runs every handler on its own task. A handler that succeeds acks its
//! message; one that fails leaves the lease to expire so `retry()` can
//! redeliver it.

use std::sync::Arc;

use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use super::processor::ProcessorConfig;
use crate::domain::Envelope;
use crate::ports::Activator;
use crate::queue::{Ack, Queue};
use crate::typed::HandlerRegistry;

pub struct WorkerLoop {
    queue: Arc<dyn Queue>,
    registry: Arc<HandlerRegistry>,
    activator: Arc<dyn Activator>,
    config: ProcessorConfig,
}

impl WorkerLoop {
    pub fn new(
        queue: Arc<dyn Queue>,
        registry: Arc<HandlerRegistry>,
        activator: Arc<dyn Activator>,
        config: ProcessorConfig,
    ) -> Self {
        Self {
            queue,
            registry,
            activator,
            config,
        }
    }

    /// Runs until `shutdown` turns true (or its sender is dropped), then
    /// waits for in-flight handlers.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let slots = Arc::new(Semaphore::new(self.config.max_in_flight));
        let mut in_flight = JoinSet::new();
        let mut ticker = tokio::time::interval(self.config.poll_interval());
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

            while in_flight.try_join_next().is_some() {}

            if !self.activator.is_enabled() {
                continue;
            }
            let free = slots.available_permits();
            if free == 0 {
                continue;
            }
            let max = if self.queue.can_poll_many() { free } else { 1 };

            let mut claimed: Vec<(Envelope, Ack)> = Vec::new();
            if let Err(err) = self
                .queue
                .poll_many(max, &mut |envelope, ack| claimed.push((envelope, ack)))
                .await
            {
                warn!(error = %err, "poll failed");
                continue;
            }

            for (envelope, ack) in claimed {
                let Ok(permit) = Arc::clone(&slots).acquire_owned().await else {
                    break;
                };
                let registry = Arc::clone(&self.registry);
                in_flight.spawn(async move {
                    let _permit = permit;
                    handle(&registry, envelope, ack).await;
                });
            }
        }

        debug!(in_flight = in_flight.len(), "worker loop stopping");
        while in_flight.join_next().await.is_some() {}
    }
}

async fn handle(registry: &HandlerRegistry, envelope: Envelope, ack: Ack) {
    let fingerprint = ack.fingerprint().clone();
    match registry.dispatch(&envelope).await {
        Ok(()) => {
            if let Err(err) = ack.ack().await {
                warn!(
                    fingerprint = %fingerprint,
                    error = %err,
                    "ack failed, message will be redelivered"
                );
            }
        }
        Err(err) => warn!(
            kind = %envelope.kind(),
            fingerprint = %fingerprint,
            error = %err,
            "handler failed, message will be redelivered after its lease expires"
        ),
    }
}
