//! Domain model: ids, messages, states, events.

pub mod events;
pub mod ids;
pub mod message;
pub mod state;

pub use events::QueueEvent;
pub use ids::{DeadLetterId, EntryId, Id, IdMarker, LeaseId, PollerId};
pub use message::{Envelope, Fingerprint, Message, MessageKind};
pub use state::{MessageState, QueueCounts};
