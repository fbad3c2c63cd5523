//! Queue events, published for observability only.
//!
//! Nothing in the queue reads these back. Dropping every event must leave the
//! queue's behaviour unchanged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Fingerprint, MessageKind};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum QueueEvent {
    MessagePushed {
        kind: MessageKind,
        fingerprint: Fingerprint,
        deliver_after: DateTime<Utc>,
    },

    /// `ensure` found a live copy and did nothing.
    MessageDuplicate {
        kind: MessageKind,
        fingerprint: Fingerprint,
    },

    MessageRescheduled {
        fingerprint: Fingerprint,
        deliver_after: DateTime<Utc>,
    },

    /// `reschedule` found no queued copy.
    MessageNotFound { fingerprint: Fingerprint },

    /// Handed to a poll callback.
    MessageProcessing {
        kind: MessageKind,
        fingerprint: Fingerprint,
        scheduled_at: DateTime<Utc>,
        started_at: DateTime<Utc>,
    },

    MessageAcknowledged { fingerprint: Fingerprint },

    MessageRetried {
        fingerprint: Fingerprint,
        attempts: u32,
    },

    MessageDead {
        fingerprint: Fingerprint,
        attempts: u32,
    },

    QueuePolled { claimed: usize },

    RetryPolled {
        released_claims: usize,
        retried: usize,
        dead_lettered: usize,
    },
}

impl QueueEvent {
    /// Short stable name, used as a log field.
    pub fn name(&self) -> &'static str {
        match self {
            QueueEvent::MessagePushed { .. } => "message_pushed",
            QueueEvent::MessageDuplicate { .. } => "message_duplicate",
            QueueEvent::MessageRescheduled { .. } => "message_rescheduled",
            QueueEvent::MessageNotFound { .. } => "message_not_found",
            QueueEvent::MessageProcessing { .. } => "message_processing",
            QueueEvent::MessageAcknowledged { .. } => "message_acknowledged",
            QueueEvent::MessageRetried { .. } => "message_retried",
            QueueEvent::MessageDead { .. } => "message_dead",
            QueueEvent::QueuePolled { .. } => "queue_polled",
            QueueEvent::RetryPolled { .. } => "retry_polled",
        }
    }
}
