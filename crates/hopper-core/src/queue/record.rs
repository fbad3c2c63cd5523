//! Records exchanged between the queue and its store.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{DeadLetterId, EntryId, Envelope, Fingerprint, LeaseId, PollerId};

/// A copy to be written into the queued set.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub entry_id: EntryId,
    pub fingerprint: Fingerprint,
    pub envelope: Envelope,
    pub deliver_after: DateTime<Utc>,
}

/// Parameters of one claim.
///
/// `lease_ids` holds one pre-generated id per message that may be claimed, so
/// its length is the claim limit.
#[derive(Debug, Clone)]
pub struct ClaimRequest {
    pub now: DateTime<Utc>,
    pub poller: PollerId,
    pub lease_ids: Vec<LeaseId>,
    pub ack_timeout: Duration,
}

impl ClaimRequest {
    pub fn limit(&self) -> usize {
        self.lease_ids.len()
    }

    /// Lock expiry for a claimed message, honouring its own override.
    pub fn expiry_for(&self, envelope: &Envelope) -> DateTime<Utc> {
        let timeout = envelope.ack_timeout().unwrap_or(self.ack_timeout);
        saturating_after(self.now, timeout)
    }
}

/// `at + delay`, clamped to the latest instant chrono can represent.
pub fn saturating_after(at: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delay| at.checked_add_signed(delay))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// A message moved from queued to leased by `claim_ready`.
#[derive(Debug, Clone)]
pub struct ClaimedMessage {
    pub lease_id: LeaseId,
    pub fingerprint: Fingerprint,
    pub envelope: Envelope,
    pub attempts: u32,
    pub scheduled_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// A lease whose lock expiry has passed.
#[derive(Debug, Clone)]
pub struct ExpiredLease {
    pub lease_id: LeaseId,
    pub fingerprint: Fingerprint,
    pub envelope: Envelope,
    /// Attempts recorded so far, not counting this expiry.
    pub attempts: u32,
    pub expired_at: DateTime<Utc>,
}

/// Terminal record of a message that exhausted its retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub id: DeadLetterId,
    /// Queue the message was dead-lettered from.
    pub queue_name: String,
    pub fingerprint: Fingerprint,
    pub envelope: Envelope,
    pub attempts: u32,
    pub dead_at: DateTime<Utc>,
}
