//! QueueBuilder: wires ports into a `StoreQueue`.
//!
//! Config, store and namespace are all checked in `build()`.

use std::sync::Arc;

use crate::error::ConfigError;
use crate::impls::NoopEventPublisher;
use crate::ports::{
    Clock, DeadMessageHandler, EventPublisher, IdGenerator, MessageStore, SystemClock,
    UlidGenerator,
};
use crate::queue::{QueueConfig, StoreQueue};

/// Builds a `StoreQueue`.
///
/// ```ignore
/// let config = QueueConfig::default();
/// let store = Arc::new(SqliteStore::open("hopper.db", config.namespace())?);
/// let queue = QueueBuilder::new(config)
///     .store(store)
///     .dead_message_handler(Arc::new(LoggingDeadMessageHandler))
///     .build()?;
/// ```
pub struct QueueBuilder {
    config: QueueConfig,
    store: Option<Arc<dyn MessageStore>>,
    clock: Arc<dyn Clock>,
    ids: Option<Arc<dyn IdGenerator>>,
    publisher: Arc<dyn EventPublisher>,
    dead_handlers: Vec<Arc<dyn DeadMessageHandler>>,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("no message store configured")]
    MissingStore,

    #[error("store is scoped to queue '{store}' (schema v{store_version}) but the config names '{config}' (schema v{config_version})")]
    NamespaceMismatch {
        config: String,
        config_version: u32,
        store: String,
        store_version: u32,
    },
}

impl QueueBuilder {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            store: None,
            clock: Arc::new(SystemClock),
            ids: None,
            publisher: Arc::new(NoopEventPublisher),
            dead_handlers: Vec::new(),
        }
    }

    pub fn store(mut self, store: Arc<dyn MessageStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Defaults to a `UlidGenerator` over the configured clock.
    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn event_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.publisher = publisher;
        self
    }

    /// Adds a handler. Handlers run in registration order.
    pub fn dead_message_handler(mut self, handler: Arc<dyn DeadMessageHandler>) -> Self {
        self.dead_handlers.push(handler);
        self
    }

    pub fn build(self) -> Result<StoreQueue, BuildError> {
        self.config.validate()?;
        let store = self.store.ok_or(BuildError::MissingStore)?;

        let expected = self.config.namespace();
        let actual = store.namespace();
        if *actual != expected {
            return Err(BuildError::NamespaceMismatch {
                config: expected.queue_name,
                config_version: expected.schema_version,
                store: actual.queue_name.clone(),
                store_version: actual.schema_version,
            });
        }

        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(Arc::clone(&self.clock))));
        let poller = ids.poller_id();
        tracing::info!(
            queue = %expected.queue_name,
            dead_letter_queue = %expected.dead_letter_queue_name,
            poller = %poller,
            ack_timeout_ms = self.config.ack_timeout_ms,
            "queue built"
        );

        Ok(StoreQueue {
            store,
            clock: self.clock,
            ids,
            publisher: self.publisher,
            dead_handlers: self.dead_handlers,
            poller,
            ack_timeout: self.config.ack_timeout(),
            lock_ttl: self.config.lock_ttl(),
            transactions: self.config.retries.transactions.policy(),
            reads: self.config.retries.reads.policy(),
            retry_guard: tokio::sync::Mutex::new(()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::InMemoryStore;
    use crate::queue::{Queue, QueueNamespace};

    #[test]
    fn build_with_store_succeeds() {
        let config = QueueConfig::default();
        let store = Arc::new(InMemoryStore::new(config.namespace()));

        let queue = QueueBuilder::new(config).store(store).build().unwrap();
        assert_eq!(queue.queue_name(), "default");
        assert!(queue.can_poll_many());
    }

    #[test]
    fn build_without_store_fails() {
        let result = QueueBuilder::new(QueueConfig::default()).build();
        assert!(matches!(result, Err(BuildError::MissingStore)));
    }

    #[test]
    fn build_rejects_invalid_config() {
        let config = QueueConfig {
            queue_name: "not valid".into(),
            ..Default::default()
        };
        let store = Arc::new(InMemoryStore::new(QueueNamespace::default()));

        let result = QueueBuilder::new(config).store(store).build();
        assert!(matches!(
            result,
            Err(BuildError::Config(ConfigError::InvalidName { .. }))
        ));
    }

    #[test]
    fn build_rejects_store_of_another_queue() {
        let config = QueueConfig {
            queue_name: "orca".into(),
            ..Default::default()
        };
        let store = Arc::new(InMemoryStore::new(QueueNamespace::default()));

        let result = QueueBuilder::new(config).store(store).build();
        assert!(matches!(
            result,
            Err(BuildError::NamespaceMismatch { config, store, .. }) if config == "orca" && store == "default"
        ));
    }
}
