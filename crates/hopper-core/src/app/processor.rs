//! QueueProcessor: runs the worker loop and the reaper loop of one queue.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::reaper_loop::ReaperLoop;
use super::worker_loop::WorkerLoop;
use crate::ports::Activator;
use crate::queue::Queue;
use crate::typed::HandlerRegistry;

/// Poll loop settings, deserializable from TOML.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    pub poll_interval_ms: u64,
    pub retry_interval_ms: u64,
    /// Handlers allowed to run at once. Also caps the batch size of a poll.
    pub max_in_flight: usize,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 50,
            retry_interval_ms: 10_000,
            max_in_flight: 16,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessorConfigError {
    #[error("{0} must be positive")]
    Zero(&'static str),
}

impl ProcessorConfig {
    pub fn validate(&self) -> Result<(), ProcessorConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(ProcessorConfigError::Zero("poll_interval_ms"));
        }
        if self.retry_interval_ms == 0 {
            return Err(ProcessorConfigError::Zero("retry_interval_ms"));
        }
        if self.max_in_flight == 0 {
            return Err(ProcessorConfigError::Zero("max_in_flight"));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

/// Handle of the running loops.
/// - dropping it does not stop them; call `shutdown_and_join`
/// - shutdown stops new polls and waits for in-flight handlers
pub struct QueueProcessor {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl QueueProcessor {
    pub fn spawn(
        queue: Arc<dyn Queue>,
        registry: Arc<HandlerRegistry>,
        activator: Arc<dyn Activator>,
        config: ProcessorConfig,
    ) -> Result<Self, ProcessorConfigError> {
        config.validate()?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let reaper = ReaperLoop::new(
            Arc::clone(&queue),
            Arc::clone(&activator),
            config.retry_interval(),
        );
        let worker = WorkerLoop::new(queue, registry, activator, config);

        let joins = vec![
            tokio::spawn(worker.run(shutdown_rx.clone())),
            tokio::spawn(reaper.run(shutdown_rx)),
        ];
        tracing::info!("queue processor started");
        Ok(Self { shutdown_tx, joins })
    }

    /// Stops taking new messages. In-flight handlers keep running.
    pub fn request_shutdown(&self) {
        // receivers may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            if let Err(err) = join.await {
                tracing::error!(error = %err, "queue processor task failed");
            }
        }
        tracing::info!("queue processor stopped");
    }
}
