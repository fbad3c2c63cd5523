//! Typed message handling.
//!
//! - **Surface (typed)**: `Message` + `Handler<M>`, checked at compile time
//! - **Inside (dyn)**: `DynHandler`, so handlers of every kind share one map

pub mod handler;
pub mod registry;

pub use self::handler::{DynHandler, Handler, TypedHandler};
pub use self::registry::{HandlerRegistry, RegistryError};
