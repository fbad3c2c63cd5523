//! Port implementations shipped with the core.
//!
//! - **SqliteStore**: durable store, shareable across processes through one file
//! - **InMemoryStore**: store for tests and local runs
//! - event publishers and the logging dead message handler

pub mod dead_letter;
pub mod events;
pub mod memory_store;
pub mod sqlite_store;

pub use self::dead_letter::LoggingDeadMessageHandler;
pub use self::events::{NoopEventPublisher, RecordingEventPublisher, TracingEventPublisher};
pub use self::memory_store::InMemoryStore;
pub use self::sqlite_store::SqliteStore;
