//! MessageStore port: the durable source of truth.
//!
//! Every coordination between pollers (in this process or others) happens
//! through a store's state transitions. Implementations must make
//! `claim_ready` atomic: a message is never handed to two concurrent callers.
//! All other mutations are guarded by state predicates (lease id, expiry), so
//! repeating one after an ambiguous failure is safe.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{EntryId, Fingerprint, LeaseId, MessageState, QueueCounts};
use crate::error::StoreError;
use crate::queue::config::QueueNamespace;
use crate::queue::record::{ClaimRequest, ClaimedMessage, DeadLetter, ExpiredLease, NewEntry};

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Namespace every operation is scoped to.
    fn namespace(&self) -> &QueueNamespace;

    /// Writes a queued copy. An existing queued copy with the same
    /// fingerprint is overwritten (body and delivery time), and the message's
    /// attempts are reset to 0.
    async fn insert(&self, entry: NewEntry) -> Result<(), StoreError>;

    /// Writes a queued copy only if no queued or leased copy exists.
    /// Returns whether it wrote.
    async fn insert_if_absent(&self, entry: NewEntry) -> Result<bool, StoreError>;

    async fn exists_live(&self, fingerprint: &Fingerprint) -> Result<bool, StoreError>;

    /// States of every stored copy with this fingerprint.
    async fn states(&self, fingerprint: &Fingerprint) -> Result<Vec<MessageState>, StoreError>;

    /// Moves the queued copy's delivery time. Returns false if there is none.
    async fn update_deliver_after(
        &self,
        fingerprint: &Fingerprint,
        deliver_after: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Atomically leases up to `request.limit()` ready messages.
    ///
    /// A message is ready when its queued copy has `deliver_after <= now`,
    /// is not claimed by anyone else, and no leased copy of the same
    /// fingerprint exists.
    async fn claim_ready(&self, request: ClaimRequest) -> Result<Vec<ClaimedMessage>, StoreError>;

    /// Acknowledges a lease: removes it, and the message body if no other
    /// copy remains. Returns false if the lease no longer exists.
    async fn delete(&self, fingerprint: &Fingerprint, lease_id: LeaseId) -> Result<bool, StoreError>;

    /// Leases with `expires_at <= now`.
    async fn find_expired_leases(&self, now: DateTime<Utc>) -> Result<Vec<ExpiredLease>, StoreError>;

    /// Converts an expired lease back into a queued copy delivered at
    /// `deliver_after`, recording `attempts`. Merges with a queued copy that
    /// already exists. Returns false if the lease was already gone.
    async fn release_lease(
        &self,
        lease: &ExpiredLease,
        entry_id: EntryId,
        deliver_after: DateTime<Utc>,
        attempts: u32,
    ) -> Result<bool, StoreError>;

    /// Removes an expired lease, every other working copy of the message and
    /// its body, and records `letter`. Returns false if the lease was already
    /// gone, in which case nothing is written.
    async fn remove_and_dead_letter(
        &self,
        lease: &ExpiredLease,
        letter: DeadLetter,
    ) -> Result<bool, StoreError>;

    /// Makes queued copies claimable again whose claim marker is older than
    /// `lock_ttl`. Markers are left behind when a poller dies between marking
    /// a copy and leasing it.
    async fn release_stale_claims(
        &self,
        now: DateTime<Utc>,
        lock_ttl: Duration,
    ) -> Result<usize, StoreError>;

    async fn counts(&self, now: DateTime<Utc>) -> Result<QueueCounts, StoreError>;

    /// Most recent dead letters first.
    async fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetter>, StoreError>;

    /// Removes every record of the namespace, dead letters included.
    async fn clear(&self) -> Result<(), StoreError>;
}
