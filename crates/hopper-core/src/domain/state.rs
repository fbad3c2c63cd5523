//! Message states and queue-level counts.

use serde::{Deserialize, Serialize};

/// State of one stored copy of a message.
///
/// Transitions:
/// - Queued -> Leased (poll)
/// - Leased -> deleted (ack)
/// - Leased -> Queued (retry: lease expired, attempts <= MAX_RETRIES)
/// - Leased -> DeadLettered (retry: lease expired, attempts > MAX_RETRIES)
///
/// An expired lease stays `Leased` until `retry()` moves it. It is not
/// claimable in the meantime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageState {
    Queued,
    Leased,
    DeadLettered,
}

impl MessageState {
    pub fn is_terminal(self) -> bool {
        matches!(self, MessageState::DeadLettered)
    }

    /// Part of the working set that `ensure` deduplicates against.
    pub fn is_live(self) -> bool {
        matches!(self, MessageState::Queued | MessageState::Leased)
    }
}

/// Point-in-time counts for one queue namespace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    /// Queued copies, ready or not.
    pub depth: usize,
    /// Queued copies with `deliver_after <= now`.
    pub ready: usize,
    /// Leased copies, expired or not.
    pub unacked: usize,
    /// Dead letter records in this queue's dead letter namespace.
    pub dead: usize,
    /// Message bodies with neither a queued nor a leased copy.
    pub orphaned: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_dead_lettered_is_terminal() {
        assert!(!MessageState::Queued.is_terminal());
        assert!(!MessageState::Leased.is_terminal());
        assert!(MessageState::DeadLettered.is_terminal());
    }

    #[test]
    fn live_states_are_queued_and_leased() {
        assert!(MessageState::Queued.is_live());
        assert!(MessageState::Leased.is_live());
        assert!(!MessageState::DeadLettered.is_live());
    }
}
