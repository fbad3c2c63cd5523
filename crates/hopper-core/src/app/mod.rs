//! App: wires ports into a queue and runs it.
//!
//! - **QueueBuilder**: validates config and ports, builds a `StoreQueue`
//! - **WorkerLoop**: poll -> dispatch -> ack
//! - **ReaperLoop**: periodic `retry()`
//! - **QueueProcessor**: spawns both loops and shuts them down

pub mod builder;
pub mod processor;
pub mod reaper_loop;
pub mod worker_loop;

pub use self::builder::{BuildError, QueueBuilder};
pub use self::processor::{ProcessorConfig, ProcessorConfigError, QueueProcessor};
pub use self::reaper_loop::ReaperLoop;
pub use self::worker_loop::WorkerLoop;
