//! EventPublisher implementations.

use std::sync::Mutex;

use crate::domain::QueueEvent;
use crate::ports::EventPublisher;

/// Drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventPublisher;

impl EventPublisher for NoopEventPublisher {
    fn publish(&self, _event: &QueueEvent) {}
}

/// Renders events as `debug` logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventPublisher;

impl EventPublisher for TracingEventPublisher {
    fn publish(&self, event: &QueueEvent) {
        if tracing::enabled!(tracing::Level::DEBUG) {
            let fields = serde_json::to_string(event).unwrap_or_default();
            tracing::debug!(event = event.name(), %fields, "queue event");
        }
    }
}

/// Keeps every event in memory, for assertions.
#[derive(Debug, Default)]
pub struct RecordingEventPublisher {
    events: Mutex<Vec<QueueEvent>>,
}

impl RecordingEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<QueueEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Names of the recorded events, in order.
    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(QueueEvent::name).collect()
    }

    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }
}

impl EventPublisher for RecordingEventPublisher {
    fn publish(&self, event: &QueueEvent) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event.clone());
    }
}
