//! In-memory store.
//!
//! Several stores (one per namespace) can share one backend, the way several
//! queues share one database file. Claims are atomic because every operation
//! runs under the backend lock, so no claim marker is ever left behind.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::{
    EntryId, Envelope, Fingerprint, LeaseId, MessageState, PollerId, QueueCounts,
};
use crate::error::StoreError;
use crate::ports::MessageStore;
use crate::queue::config::QueueNamespace;
use crate::queue::record::{ClaimRequest, ClaimedMessage, DeadLetter, ExpiredLease, NewEntry};

#[derive(Debug, Clone)]
struct QueuedCopy {
    entry_id: EntryId,
    deliver_after: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct LeasedCopy {
    lease_id: LeaseId,
    #[allow(dead_code)]
    owner: PollerId,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct Body {
    envelope: Envelope,
    attempts: u32,
}

/// Working set of one `(schema_version, queue_name)`.
#[derive(Debug, Default)]
struct WorkingSet {
    queued: HashMap<Fingerprint, QueuedCopy>,
    leased: HashMap<Fingerprint, LeasedCopy>,
    bodies: HashMap<Fingerprint, Body>,
}

impl WorkingSet {
    fn write_queued(&mut self, entry: NewEntry) {
        let entry_id = self
            .queued
            .get(&entry.fingerprint)
            .map_or(entry.entry_id, |existing| existing.entry_id);
        self.queued.insert(
            entry.fingerprint.clone(),
            QueuedCopy {
                entry_id,
                deliver_after: entry.deliver_after,
            },
        );
        self.bodies.insert(
            entry.fingerprint,
            Body {
                envelope: entry.envelope,
                attempts: 0,
            },
        );
    }

    fn is_live(&self, fingerprint: &Fingerprint) -> bool {
        self.queued.contains_key(fingerprint) || self.leased.contains_key(fingerprint)
    }

    fn holds_lease(&self, lease: &ExpiredLease) -> bool {
        self.leased
            .get(&lease.fingerprint)
            .is_some_and(|copy| copy.lease_id == lease.lease_id)
    }
}

#[derive(Debug, Default)]
struct Backend {
    working: HashMap<(u32, String), WorkingSet>,
    /// Dead letters by `(schema_version, dead_letter_queue_name)`, oldest first.
    dead: HashMap<(u32, String), Vec<DeadLetter>>,
}

/// `MessageStore` backed by process memory.
pub struct InMemoryStore {
    namespace: QueueNamespace,
    backend: Arc<Mutex<Backend>>,
}

impl InMemoryStore {
    pub fn new(namespace: QueueNamespace) -> Self {
        Self {
            namespace,
            backend: Arc::new(Mutex::new(Backend::default())),
        }
    }

    /// A store for another namespace over the same backend.
    pub fn share(&self, namespace: QueueNamespace) -> Self {
        Self {
            namespace,
            backend: Arc::clone(&self.backend),
        }
    }

    fn working_key(&self) -> (u32, String) {
        (
            self.namespace.schema_version,
            self.namespace.queue_name.clone(),
        )
    }

    fn dead_key(&self) -> (u32, String) {
        (
            self.namespace.schema_version,
            self.namespace.dead_letter_queue_name.clone(),
        )
    }
}

#[async_trait]
impl MessageStore for InMemoryStore {
    fn namespace(&self) -> &QueueNamespace {
        &self.namespace
    }

    async fn insert(&self, entry: NewEntry) -> Result<(), StoreError> {
        let mut backend = self.backend.lock().await;
        backend
            .working
            .entry(self.working_key())
            .or_default()
            .write_queued(entry);
        Ok(())
    }

    async fn insert_if_absent(&self, entry: NewEntry) -> Result<bool, StoreError> {
        let mut backend = self.backend.lock().await;
        let set = backend.working.entry(self.working_key()).or_default();
        if set.is_live(&entry.fingerprint) {
            return Ok(false);
        }
        set.write_queued(entry);
        Ok(true)
    }

    async fn exists_live(&self, fingerprint: &Fingerprint) -> Result<bool, StoreError> {
        let backend = self.backend.lock().await;
        Ok(backend
            .working
            .get(&self.working_key())
            .is_some_and(|set| set.is_live(fingerprint)))
    }

    async fn states(&self, fingerprint: &Fingerprint) -> Result<Vec<MessageState>, StoreError> {
        let backend = self.backend.lock().await;
        let mut states = Vec::new();
        if let Some(set) = backend.working.get(&self.working_key()) {
            if set.queued.contains_key(fingerprint) {
                states.push(MessageState::Queued);
            }
            if set.leased.contains_key(fingerprint) {
                states.push(MessageState::Leased);
            }
        }
        let dead = backend.dead.get(&self.dead_key()).is_some_and(|letters| {
            letters.iter().any(|letter| {
                &letter.fingerprint == fingerprint
                    && letter.queue_name == self.namespace.queue_name
            })
        });
        if dead {
            states.push(MessageState::DeadLettered);
        }
        Ok(states)
    }

    async fn update_deliver_after(
        &self,
        fingerprint: &Fingerprint,
        deliver_after: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut backend = self.backend.lock().await;
        let Some(copy) = backend
            .working
            .get_mut(&self.working_key())
            .and_then(|set| set.queued.get_mut(fingerprint))
        else {
            return Ok(false);
        };
        copy.deliver_after = deliver_after;
        Ok(true)
    }

    async fn claim_ready(&self, request: ClaimRequest) -> Result<Vec<ClaimedMessage>, StoreError> {
        let mut backend = self.backend.lock().await;
        let Some(set) = backend.working.get_mut(&self.working_key()) else {
            return Ok(Vec::new());
        };

        let mut ready: Vec<(DateTime<Utc>, EntryId, Fingerprint)> = set
            .queued
            .iter()
            .filter(|(fp, copy)| copy.deliver_after <= request.now && !set.leased.contains_key(*fp))
            .map(|(fp, copy)| (copy.deliver_after, copy.entry_id, fp.clone()))
            .collect();
        ready.sort();

        let mut claimed = Vec::with_capacity(request.limit());
        let mut lease_ids = request.lease_ids.iter().copied().peekable();
        for (scheduled_at, _, fingerprint) in ready {
            if lease_ids.peek().is_none() {
                break;
            }
            let Some(body) = set.bodies.get(&fingerprint).cloned() else {
                set.queued.remove(&fingerprint);
                tracing::warn!(
                    queue = %self.namespace.queue_name,
                    fingerprint = %fingerprint,
                    "dropping queued copy without a message body"
                );
                continue;
            };
            let Some(lease_id) = lease_ids.next() else {
                break;
            };
            let expires_at = request.expiry_for(&body.envelope);
            set.queued.remove(&fingerprint);
            set.leased.insert(
                fingerprint.clone(),
                LeasedCopy {
                    lease_id,
                    owner: request.poller,
                    expires_at,
                },
            );
            claimed.push(ClaimedMessage {
                lease_id,
                fingerprint,
                envelope: body.envelope,
                attempts: body.attempts,
                scheduled_at,
                expires_at,
            });
        }
        Ok(claimed)
    }

    async fn delete(&self, fingerprint: &Fingerprint, lease_id: LeaseId) -> Result<bool, StoreError> {
        let mut backend = self.backend.lock().await;
        let Some(set) = backend.working.get_mut(&self.working_key()) else {
            return Ok(false);
        };
        let held = set
            .leased
            .get(fingerprint)
            .is_some_and(|copy| copy.lease_id == lease_id);
        if !held {
            return Ok(false);
        }
        set.leased.remove(fingerprint);
        if !set.queued.contains_key(fingerprint) {
            set.bodies.remove(fingerprint);
        }
        Ok(true)
    }

    async fn find_expired_leases(&self, now: DateTime<Utc>) -> Result<Vec<ExpiredLease>, StoreError> {
        let backend = self.backend.lock().await;
        let Some(set) = backend.working.get(&self.working_key()) else {
            return Ok(Vec::new());
        };
        let mut expired: Vec<ExpiredLease> = set
            .leased
            .iter()
            .filter(|(_, copy)| copy.expires_at <= now)
            .filter_map(|(fp, copy)| {
                let body = set.bodies.get(fp)?;
                Some(ExpiredLease {
                    lease_id: copy.lease_id,
                    fingerprint: fp.clone(),
                    envelope: body.envelope.clone(),
                    attempts: body.attempts,
                    expired_at: copy.expires_at,
                })
            })
            .collect();
        expired.sort_by(|a, b| {
            (a.expired_at, a.lease_id).cmp(&(b.expired_at, b.lease_id))
        });
        Ok(expired)
    }

    async fn release_lease(
        &self,
        lease: &ExpiredLease,
        entry_id: EntryId,
        deliver_after: DateTime<Utc>,
        attempts: u32,
    ) -> Result<bool, StoreError> {
        let mut backend = self.backend.lock().await;
        let Some(set) = backend.working.get_mut(&self.working_key()) else {
            return Ok(false);
        };
        if !set.holds_lease(lease) {
            return Ok(false);
        }
        set.leased.remove(&lease.fingerprint);

        let entry_id = set
            .queued
            .get(&lease.fingerprint)
            .map_or(entry_id, |existing| existing.entry_id);
        set.queued.insert(
            lease.fingerprint.clone(),
            QueuedCopy {
                entry_id,
                deliver_after,
            },
        );
        // a newer body pushed during the lease wins
        set.bodies
            .entry(lease.fingerprint.clone())
            .or_insert_with(|| Body {
                envelope: lease.envelope.clone(),
                attempts,
            })
            .attempts = attempts;
        Ok(true)
    }

    async fn remove_and_dead_letter(
        &self,
        lease: &ExpiredLease,
        letter: DeadLetter,
    ) -> Result<bool, StoreError> {
        let dead_key = self.dead_key();
        let mut backend = self.backend.lock().await;
        let Some(set) = backend.working.get_mut(&self.working_key()) else {
            return Ok(false);
        };
        if !set.holds_lease(lease) {
            return Ok(false);
        }
        set.leased.remove(&lease.fingerprint);
        set.queued.remove(&lease.fingerprint);
        set.bodies.remove(&lease.fingerprint);
        backend.dead.entry(dead_key).or_default().push(letter);
        Ok(true)
    }

    async fn release_stale_claims(
        &self,
        _now: DateTime<Utc>,
        _lock_ttl: Duration,
    ) -> Result<usize, StoreError> {
        Ok(0)
    }

    async fn counts(&self, now: DateTime<Utc>) -> Result<QueueCounts, StoreError> {
        let backend = self.backend.lock().await;
        let mut counts = QueueCounts {
            dead: backend.dead.get(&self.dead_key()).map_or(0, Vec::len),
            ..QueueCounts::default()
        };
        if let Some(set) = backend.working.get(&self.working_key()) {
            counts.depth = set.queued.len();
            counts.ready = set
                .queued
                .values()
                .filter(|copy| copy.deliver_after <= now)
                .count();
            counts.unacked = set.leased.len();
            counts.orphaned = set.bodies.keys().filter(|fp| !set.is_live(fp)).count();
        }
        Ok(counts)
    }

    async fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetter>, StoreError> {
        let backend = self.backend.lock().await;
        Ok(backend
            .dead
            .get(&self.dead_key())
            .map(|letters| letters.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let dead_key = self.dead_key();
        let mut backend = self.backend.lock().await;
        backend.working.remove(&self.working_key());
        if let Some(letters) = backend.dead.get_mut(&dead_key) {
            letters.retain(|letter| letter.queue_name != self.namespace.queue_name);
        }
        Ok(())
    }
}
