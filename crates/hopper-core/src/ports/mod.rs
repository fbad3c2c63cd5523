//! Ports: the capabilities the queue consumes.
//!
//! Each trait is handed to the queue at construction time (see
//! `app::QueueBuilder`). Implementations live in `impls`.

pub mod activator;
pub mod clock;
pub mod dead_letter;
pub mod event_sink;
pub mod id_generator;
pub mod message_store;

pub use self::activator::{Activator, AlwaysActive, ToggleActivator};
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::dead_letter::DeadMessageHandler;
pub use self::event_sink::EventPublisher;
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::message_store::MessageStore;
