//! HandlerRegistry: message kind -> handler.
//!
//! Built once during start-up, then shared read-only by the poll loop.

use std::collections::HashMap;
use std::sync::Arc;

use super::handler::{DynHandler, Handler, TypedHandler};
use crate::domain::{Envelope, Message};
use crate::error::HandlerError;

#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<&'static str, Arc<dyn DynHandler>>,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("handler for message kind '{0}' is already registered")]
    AlreadyRegistered(&'static str),
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<M: Message, H: Handler<M> + 'static>(
        &mut self,
        handler: H,
    ) -> Result<(), RegistryError> {
        if self.handlers.contains_key(M::KIND) {
            return Err(RegistryError::AlreadyRegistered(M::KIND));
        }
        self.handlers
            .insert(M::KIND, Arc::new(TypedHandler::<M, H>::new(handler)));
        Ok(())
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn DynHandler>> {
        self.handlers.get(kind).cloned()
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> Vec<&'static str> {
        let mut kinds: Vec<_> = self.handlers.keys().copied().collect();
        kinds.sort_unstable();
        kinds
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Runs the handler registered for the envelope's kind.
    pub async fn dispatch(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        let handler = self
            .get(envelope.kind().as_str())
            .ok_or_else(|| HandlerError::NotFound(envelope.kind().clone()))?;
        handler.handle_envelope(envelope).await
    }
}
