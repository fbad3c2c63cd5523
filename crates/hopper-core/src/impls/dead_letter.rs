//! DeadMessageHandler implementations.

use async_trait::async_trait;

use crate::ports::DeadMessageHandler;
use crate::queue::record::DeadLetter;

/// Logs every dead letter at `error` level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingDeadMessageHandler;

#[async_trait]
impl DeadMessageHandler for LoggingDeadMessageHandler {
    async fn handle(&self, queue_name: &str, letter: &DeadLetter) -> Result<(), String> {
        tracing::error!(
            queue = %queue_name,
            fingerprint = %letter.fingerprint,
            kind = %letter.envelope.kind(),
            attempts = letter.attempts,
            dead_at = %letter.dead_at,
            "message dead-lettered"
        );
        Ok(())
    }
}
