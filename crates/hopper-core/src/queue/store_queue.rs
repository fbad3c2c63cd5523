//! `Queue` over any `MessageStore`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use super::record::{ClaimRequest, DeadLetter, ExpiredLease, NewEntry, saturating_after};
use super::{Ack, MAX_RETRIES, PollCallback, Queue, RetryPolicy, RetrySummary, with_retry};
use crate::domain::{Envelope, Fingerprint, MessageState, PollerId, QueueCounts, QueueEvent};
use crate::error::QueueError;
use crate::ports::{Clock, DeadMessageHandler, EventPublisher, IdGenerator, MessageStore};

/// The queue. Built by `QueueBuilder`.
///
/// Holds no message state of its own: everything lives in the store, so any
/// number of `StoreQueue`s (in this process or others) can work one namespace.
pub struct StoreQueue {
    pub(crate) store: Arc<dyn MessageStore>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) ids: Arc<dyn IdGenerator>,
    pub(crate) publisher: Arc<dyn EventPublisher>,
    pub(crate) dead_handlers: Vec<Arc<dyn DeadMessageHandler>>,
    pub(crate) poller: PollerId,
    pub(crate) ack_timeout: Duration,
    pub(crate) lock_ttl: Duration,
    /// Policy of store calls that write.
    pub(crate) transactions: RetryPolicy,
    /// Policy of store calls that only read.
    pub(crate) reads: RetryPolicy,
    /// Serializes `retry()` within this process.
    pub(crate) retry_guard: tokio::sync::Mutex<()>,
}

impl StoreQueue {
    pub fn queue_name(&self) -> &str {
        &self.store.namespace().queue_name
    }

    /// Owner recorded on every lease this queue takes.
    pub fn poller_id(&self) -> PollerId {
        self.poller
    }

    fn deliver_at(&self, delay: Duration) -> DateTime<Utc> {
        saturating_after(self.clock.now(), delay)
    }

    fn new_entry(&self, envelope: Envelope, delay: Duration) -> NewEntry {
        NewEntry {
            entry_id: self.ids.entry_id(),
            fingerprint: envelope.fingerprint(),
            envelope,
            deliver_after: self.deliver_at(delay),
        }
    }

    fn publish(&self, event: QueueEvent) {
        self.publisher.publish(&event);
    }

    async fn dead_letter(
        &self,
        lease: &ExpiredLease,
        attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<bool, QueueError> {
        let letter = DeadLetter {
            id: self.ids.dead_letter_id(),
            queue_name: self.queue_name().to_string(),
            fingerprint: lease.fingerprint.clone(),
            envelope: lease.envelope.clone(),
            attempts,
            dead_at: now,
        };
        let store = &self.store;
        let removed = with_retry(&self.transactions, "remove_and_dead_letter", || {
            store.remove_and_dead_letter(lease, letter.clone())
        })
        .await?;
        if !removed {
            debug!(queue = %self.queue_name(), fingerprint = %lease.fingerprint, "lease gone before dead-lettering");
            return Ok(false);
        }

        warn!(
            queue = %self.queue_name(),
            fingerprint = %letter.fingerprint,
            kind = %letter.envelope.kind(),
            attempts,
            "message exhausted its retries"
        );
        for handler in &self.dead_handlers {
            if let Err(err) = handler.handle(self.queue_name(), &letter).await {
                error!(
                    queue = %self.queue_name(),
                    fingerprint = %letter.fingerprint,
                    error = %err,
                    "dead message handler failed"
                );
            }
        }
        self.publish(QueueEvent::MessageDead {
            fingerprint: letter.fingerprint,
            attempts,
        });
        Ok(true)
    }

    async fn requeue(
        &self,
        lease: &ExpiredLease,
        attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<bool, QueueError> {
        let entry_id = self.ids.entry_id();
        let store = &self.store;
        let released = with_retry(&self.transactions, "release_lease", || {
            store.release_lease(lease, entry_id, now, attempts)
        })
        .await?;
        if released {
            info!(
                queue = %self.queue_name(),
                fingerprint = %lease.fingerprint,
                attempts,
                "lease expired, message requeued"
            );
            self.publish(QueueEvent::MessageRetried {
                fingerprint: lease.fingerprint.clone(),
                attempts,
            });
        }
        Ok(released)
    }
}

#[async_trait]
impl Queue for StoreQueue {
    fn ack_timeout(&self) -> Duration {
        self.ack_timeout
    }

    fn can_poll_many(&self) -> bool {
        true
    }

    async fn push(&self, message: Envelope, delay: Duration) -> Result<(), QueueError> {
        let entry = self.new_entry(message, delay);
        let store = &self.store;
        with_retry(&self.transactions, "insert", || store.insert(entry.clone())).await?;

        debug!(
            queue = %self.queue_name(),
            fingerprint = %entry.fingerprint,
            deliver_after = %entry.deliver_after,
            "message pushed"
        );
        self.publish(QueueEvent::MessagePushed {
            kind: entry.envelope.kind().clone(),
            fingerprint: entry.fingerprint,
            deliver_after: entry.deliver_after,
        });
        Ok(())
    }

    async fn ensure(&self, message: Envelope, delay: Duration) -> Result<bool, QueueError> {
        let entry = self.new_entry(message, delay);
        let store = &self.store;
        let inserted = with_retry(&self.transactions, "insert_if_absent", || {
            store.insert_if_absent(entry.clone())
        })
        .await?;

        if inserted {
            self.publish(QueueEvent::MessagePushed {
                kind: entry.envelope.kind().clone(),
                fingerprint: entry.fingerprint,
                deliver_after: entry.deliver_after,
            });
        } else {
            debug!(queue = %self.queue_name(), fingerprint = %entry.fingerprint, "message already queued");
            self.publish(QueueEvent::MessageDuplicate {
                kind: entry.envelope.kind().clone(),
                fingerprint: entry.fingerprint,
            });
        }
        Ok(inserted)
    }

    async fn reschedule(&self, message: &Envelope, delay: Duration) -> Result<bool, QueueError> {
        let fingerprint = message.fingerprint();
        let deliver_after = self.deliver_at(delay);
        let store = &self.store;
        let updated = with_retry(&self.transactions, "update_deliver_after", || {
            store.update_deliver_after(&fingerprint, deliver_after)
        })
        .await?;

        if updated {
            self.publish(QueueEvent::MessageRescheduled {
                fingerprint,
                deliver_after,
            });
        } else {
            debug!(queue = %self.queue_name(), fingerprint = %fingerprint, "nothing queued to reschedule");
            self.publish(QueueEvent::MessageNotFound { fingerprint });
        }
        Ok(updated)
    }

    async fn poll_many(
        &self,
        max_messages: usize,
        callback: &mut PollCallback<'_>,
    ) -> Result<usize, QueueError> {
        if max_messages == 0 {
            return Ok(0);
        }
        let now = self.clock.now();
        let request = ClaimRequest {
            now,
            poller: self.poller,
            lease_ids: (0..max_messages).map(|_| self.ids.lease_id()).collect(),
            ack_timeout: self.ack_timeout,
        };
        let store = &self.store;
        let claimed = with_retry(&self.transactions, "claim_ready", || {
            store.claim_ready(request.clone())
        })
        .await?;

        let count = claimed.len();
        for message in claimed {
            debug!(
                queue = %self.queue_name(),
                fingerprint = %message.fingerprint,
                lease = %message.lease_id,
                attempts = message.attempts,
                expires_at = %message.expires_at,
                "message leased"
            );
            self.publish(QueueEvent::MessageProcessing {
                kind: message.envelope.kind().clone(),
                fingerprint: message.fingerprint.clone(),
                scheduled_at: message.scheduled_at,
                started_at: now,
            });
            let ack = Ack::new(
                Arc::clone(&self.store),
                Arc::clone(&self.publisher),
                self.transactions.clone(),
                message.fingerprint,
                message.lease_id,
            );
            callback(message.envelope, ack);
        }

        self.publish(QueueEvent::QueuePolled { claimed: count });
        Ok(count)
    }

    async fn retry(&self) -> Result<RetrySummary, QueueError> {
        let Ok(_guard) = self.retry_guard.try_lock() else {
            debug!(queue = %self.queue_name(), "retry already running in this process");
            return Ok(RetrySummary::default());
        };

        let now = self.clock.now();
        let store = &self.store;
        let lock_ttl = self.lock_ttl;
        let mut summary = RetrySummary {
            released_claims: with_retry(&self.transactions, "release_stale_claims", || {
                store.release_stale_claims(now, lock_ttl)
            })
            .await?,
            ..RetrySummary::default()
        };
        if summary.released_claims > 0 {
            warn!(
                queue = %self.queue_name(),
                released = summary.released_claims,
                "released claims abandoned by a poller"
            );
        }

        let expired = with_retry(&self.reads, "find_expired_leases", || {
            store.find_expired_leases(now)
        })
        .await?;

        for lease in &expired {
            let attempts = lease.attempts + 1;
            if attempts > MAX_RETRIES {
                if self.dead_letter(lease, attempts, now).await? {
                    summary.dead_lettered += 1;
                }
            } else if self.requeue(lease, attempts, now).await? {
                summary.retried += 1;
            }
        }

        self.publish(QueueEvent::RetryPolled {
            released_claims: summary.released_claims,
            retried: summary.retried,
            dead_lettered: summary.dead_lettered,
        });
        Ok(summary)
    }

    async fn clear(&self) -> Result<(), QueueError> {
        let store = &self.store;
        with_retry(&self.transactions, "clear", || store.clear()).await?;
        info!(queue = %self.queue_name(), "queue cleared");
        Ok(())
    }

    async fn counts(&self) -> Result<QueueCounts, QueueError> {
        let now = self.clock.now();
        let store = &self.store;
        Ok(with_retry(&self.reads, "counts", || store.counts(now)).await?)
    }

    async fn contains(&self, fingerprint: &Fingerprint) -> Result<bool, QueueError> {
        let store = &self.store;
        Ok(with_retry(&self.reads, "exists_live", || store.exists_live(fingerprint)).await?)
    }

    async fn states(&self, fingerprint: &Fingerprint) -> Result<Vec<MessageState>, QueueError> {
        let store = &self.store;
        Ok(with_retry(&self.reads, "states", || store.states(fingerprint)).await?)
    }

    async fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetter>, QueueError> {
        let store = &self.store;
        Ok(with_retry(&self.reads, "dead_letters", || store.dead_letters(limit)).await?)
    }
}
