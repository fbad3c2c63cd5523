//! DeadMessageHandler port.

use async_trait::async_trait;

use crate::queue::record::DeadLetter;

/// Invoked once per message that exhausted its retries.
///
/// By the time this runs the message has left the working set and its dead
/// letter record is written. An error is logged and nothing else happens: the
/// message is not re-queued.
#[async_trait]
pub trait DeadMessageHandler: Send + Sync {
    async fn handle(&self, queue_name: &str, letter: &DeadLetter) -> Result<(), String>;
}
