//! IdGenerator port.
//!
//! Row ids are ULIDs whose timestamp comes from the injected `Clock`, so ids
//! generated under a `FixedClock` sort by the clock's time, not the wall's.

use std::sync::Arc;

use ulid::Ulid;

use crate::domain::{DeadLetterId, EntryId, LeaseId, PollerId};
use crate::ports::Clock;

pub trait IdGenerator: Send + Sync {
    fn entry_id(&self) -> EntryId;

    fn lease_id(&self) -> LeaseId;

    fn poller_id(&self) -> PollerId;

    fn dead_letter_id(&self) -> DeadLetterId;
}

/// ULID generator: clock millis + 80 random bits.
pub struct UlidGenerator {
    clock: Arc<dyn Clock>,
}

impl UlidGenerator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    fn next(&self) -> Ulid {
        let timestamp_ms = self.clock.now_millis().max(0) as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl IdGenerator for UlidGenerator {
    fn entry_id(&self) -> EntryId {
        EntryId::from(self.next())
    }

    fn lease_id(&self) -> LeaseId {
        LeaseId::from(self.next())
    }

    fn poller_id(&self) -> PollerId {
        PollerId::from(self.next())
    }

    fn dead_letter_id(&self) -> DeadLetterId {
        DeadLetterId::from(self.next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{FixedClock, SystemClock};
    use chrono::{TimeZone, Utc};

    #[test]
    fn generates_unique_ids() {
        let ids = UlidGenerator::new(Arc::new(SystemClock));

        let a = ids.entry_id();
        let b = ids.entry_id();
        assert_ne!(a, b);
    }

    #[test]
    fn timestamp_comes_from_the_clock() {
        let fixed_time = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let ids = UlidGenerator::new(Arc::new(FixedClock::new(fixed_time)));

        let a = ids.lease_id();
        let b = ids.lease_id();
        assert_ne!(a, b);
        assert_eq!(a.as_ulid().timestamp_ms(), fixed_time.timestamp_millis() as u64);
        assert_eq!(b.as_ulid().timestamp_ms(), fixed_time.timestamp_millis() as u64);
    }

    #[test]
    fn display_prefix_follows_the_id_kind() {
        let ids = UlidGenerator::new(Arc::new(SystemClock));

        assert!(ids.entry_id().to_string().starts_with("entry-"));
        assert!(ids.lease_id().to_string().starts_with("lease-"));
        assert!(ids.poller_id().to_string().starts_with("poller-"));
        assert!(ids.dead_letter_id().to_string().starts_with("dead-"));
    }
}
