//! Queue contract and its store-backed implementation.
//!
//! Producers `push`, `ensure` and `reschedule`. A poll loop calls `poll` or
//! `poll_many`, which hand each claimed message to a callback together with
//! an [`Ack`]. A maintenance loop calls `retry` to requeue or dead-letter
//! messages whose lease expired.

pub mod config;
pub mod record;
mod retry;
mod store_queue;


pub use config::{QueueConfig, QueueNamespace, RetriesConfig, RetrySettings};
pub use record::DeadLetter;
pub use retry::{RetryPolicy, with_retry};
pub use store_queue::StoreQueue;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use crate::domain::{Envelope, Fingerprint, LeaseId, Message, MessageState, QueueCounts, QueueEvent};
use crate::error::QueueError;
use crate::ports::{EventPublisher, MessageStore};

/// Deliveries after the first one before a message is dead-lettered.
///
/// A message is handed out at most `MAX_RETRIES + 1` times.
pub const MAX_RETRIES: u32 = 5;

/// Receives each claimed message. Call `ack.ack()` once the message has been
/// handled; dropping the `Ack` leaves the message to be redelivered after its
/// lease expires.
pub type PollCallback<'a> = dyn FnMut(Envelope, Ack) + Send + 'a;

/// Outcome of one `retry()` pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RetrySummary {
    /// Claim markers left by crashed pollers and released.
    pub released_claims: usize,
    /// Expired leases put back in the queue.
    pub retried: usize,
    pub dead_lettered: usize,
}

#[async_trait]
pub trait Queue: Send + Sync {
    /// Lease duration of messages without their own override.
    fn ack_timeout(&self) -> Duration;

    /// Whether `poll_many` can hand out more than one message per call.
    fn can_poll_many(&self) -> bool;

    /// Stores `message` for delivery after `delay`. Identical content that is
    /// still queued is overwritten, not duplicated.
    async fn push(&self, message: Envelope, delay: Duration) -> Result<(), QueueError>;

    /// Like `push`, but does nothing if a queued or leased copy exists.
    /// Returns whether the message was stored.
    async fn ensure(&self, message: Envelope, delay: Duration) -> Result<bool, QueueError>;

    /// Moves the queued copy of `message` to `now + delay`. Returns false
    /// (and changes nothing) if there is no queued copy.
    async fn reschedule(&self, message: &Envelope, delay: Duration) -> Result<bool, QueueError>;

    /// Claims up to `max_messages` ready messages and invokes `callback` once
    /// per message. Returns how many were claimed.
    async fn poll_many(
        &self,
        max_messages: usize,
        callback: &mut PollCallback<'_>,
    ) -> Result<usize, QueueError>;

    async fn poll(&self, callback: &mut PollCallback<'_>) -> Result<usize, QueueError> {
        self.poll_many(1, callback).await
    }

    /// Requeues or dead-letters every message whose lease expired.
    async fn retry(&self) -> Result<RetrySummary, QueueError>;

    /// Removes every record of this queue. Meant for tests.
    async fn clear(&self) -> Result<(), QueueError>;

    async fn counts(&self) -> Result<QueueCounts, QueueError>;

    /// Whether a queued or leased copy with this fingerprint exists.
    async fn contains(&self, fingerprint: &Fingerprint) -> Result<bool, QueueError>;

    async fn states(&self, fingerprint: &Fingerprint) -> Result<Vec<MessageState>, QueueError>;

    /// Most recent dead letters first.
    async fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetter>, QueueError>;
}

/// Typed producer calls over any `Queue`.
#[async_trait]
pub trait QueueExt: Queue {
    async fn push_message<M: Message>(&self, message: &M, delay: Duration) -> Result<(), QueueError> {
        self.push(Envelope::wrap(message)?, delay).await
    }

    async fn ensure_message<M: Message>(&self, message: &M, delay: Duration) -> Result<bool, QueueError> {
        self.ensure(Envelope::wrap(message)?, delay).await
    }

    async fn reschedule_message<M: Message>(
        &self,
        message: &M,
        delay: Duration,
    ) -> Result<bool, QueueError> {
        self.reschedule(&Envelope::wrap(message)?, delay).await
    }
}

impl<Q: Queue + ?Sized> QueueExt for Q {}

/// Acknowledgement handle of one lease.
pub struct Ack {
    store: Arc<dyn MessageStore>,
    publisher: Arc<dyn EventPublisher>,
    policy: RetryPolicy,
    fingerprint: Fingerprint,
    lease_id: LeaseId,
}

impl Ack {
    pub(crate) fn new(
        store: Arc<dyn MessageStore>,
        publisher: Arc<dyn EventPublisher>,
        policy: RetryPolicy,
        fingerprint: Fingerprint,
        lease_id: LeaseId,
    ) -> Self {
        Self {
            store,
            publisher,
            policy,
            fingerprint,
            lease_id,
        }
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn lease_id(&self) -> LeaseId {
        self.lease_id
    }

    /// Deletes the message for good.
    ///
    /// Returns false if the lease is no longer held, e.g. because it expired
    /// and `retry()` requeued the message. A newer lease on the same message
    /// is never touched.
    pub async fn ack(self) -> Result<bool, QueueError> {
        let deleted = with_retry(&self.policy, "ack", || {
            self.store.delete(&self.fingerprint, self.lease_id)
        })
        .await?;

        if deleted {
            self.publisher.publish(&QueueEvent::MessageAcknowledged {
                fingerprint: self.fingerprint.clone(),
            });
        } else {
            debug!(
                queue = %self.store.namespace().queue_name,
                fingerprint = %self.fingerprint,
                lease = %self.lease_id,
                "ack of a lease that is no longer held"
            );
        }
        Ok(deleted)
    }
}

impl std::fmt::Debug for Ack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ack")
            .field("fingerprint", &self.fingerprint)
            .field("lease_id", &self.lease_id)
            .finish()
    }
}
