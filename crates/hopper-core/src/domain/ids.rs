//! Strongly-typed row identifiers.
//!
//! Every row the store writes (queue entries, leases, dead letters) and every
//! poller gets a ULID. ULIDs sort by creation time, can be generated on any
//! node without coordination, and fit in 128 bits.
//!
//! `Id<T>` carries a zero-sized marker so that a `LeaseId` can never be passed
//! where an `EntryId` is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use ulid::Ulid;

/// Marker trait for each id kind. Supplies the `Display` prefix.
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }

    /// Parses the bare ULID form used as a database key (no prefix).
    pub fn parse(s: &str) -> Result<Self, ulid::DecodeError> {
        Ulid::from_string(s).map(Self::from_ulid)
    }

    /// The bare ULID form used as a database key.
    pub fn to_key(&self) -> String {
        self.ulid.to_string()
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

// ========================================
// Markers
// ========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Entry {}

impl IdMarker for Entry {
    fn prefix() -> &'static str {
        "entry-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Lease {}

impl IdMarker for Lease {
    fn prefix() -> &'static str {
        "lease-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Poller {}

impl IdMarker for Poller {
    fn prefix() -> &'static str {
        "poller-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Dead {}

impl IdMarker for Dead {
    fn prefix() -> &'static str {
        "dead-"
    }
}

/// A row in the queued set.
pub type EntryId = Id<Entry>;

/// A row in the leased (unacked) set.
pub type LeaseId = Id<Lease>;

/// One `StoreQueue` instance. Recorded as the owner of the leases it takes.
pub type PollerId = Id<Poller>;

/// A dead letter record.
pub type DeadLetterId = Id<Dead>;
