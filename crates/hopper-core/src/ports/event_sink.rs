//! EventPublisher port.

use crate::domain::QueueEvent;

/// Receives queue events.
///
/// Called inline from queue operations, so implementations must be cheap and
/// must not fail.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: &QueueEvent);
}
