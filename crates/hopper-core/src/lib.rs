//! hopper-core
//!
//! A durable, at-least-once work queue with delayed delivery, lease-based
//! acknowledgement, automatic retry and dead-lettering.
//!
//! # Modules
//! - **domain**: messages, fingerprints, ids, states, events
//! - **ports**: what the queue consumes (MessageStore, Clock, EventPublisher, ...)
//! - **impls**: SQLite and in-memory stores, publishers, dead message handlers
//! - **queue**: the `Queue` contract, `StoreQueue`, config and store retries
//! - **typed**: typed handlers and their registry
//! - **app**: builder, worker/reaper loops, processor

pub mod app;
pub mod domain;
pub mod error;
pub mod impls;
pub mod ports;
pub mod queue;
pub mod typed;

pub use app::{BuildError, ProcessorConfig, QueueBuilder, QueueProcessor};
pub use domain::{Envelope, Fingerprint, Message, MessageKind, QueueCounts, QueueEvent};
pub use error::{ConfigError, HandlerError, QueueError, StoreError};
pub use queue::{Ack, MAX_RETRIES, Queue, QueueConfig, QueueExt, RetrySummary, StoreQueue};
