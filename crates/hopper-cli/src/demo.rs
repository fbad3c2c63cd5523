//! Demo workload: greetings that fail a few times before they succeed.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use hopper_core::error::HandlerError;
use hopper_core::typed::{Handler, HandlerRegistry, RegistryError};
use hopper_core::Message;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Serialize, Deserialize)]
pub struct Greet {
    pub name: String,
}

impl Message for Greet {
    const KIND: &'static str = "demo.greet.v1";

    fn ack_timeout(&self) -> Option<Duration> {
        Some(Duration::from_secs(2))
    }
}

/// Fails the first `failures` deliveries of every run.
pub struct GreetHandler {
    failures: AtomicU32,
}

impl GreetHandler {
    pub fn new(failures: u32) -> Self {
        Self {
            failures: AtomicU32::new(failures),
        }
    }
}

#[async_trait]
impl Handler<Greet> for GreetHandler {
    async fn handle(&self, message: Greet) -> Result<(), HandlerError> {
        let left = self.failures.load(Ordering::SeqCst);
        if left > 0 {
            self.failures.fetch_sub(1, Ordering::SeqCst);
            return Err(HandlerError::Failed(format!("planned failure, {left} left")));
        }
        info!(name = %message.name, "hello");
        Ok(())
    }
}

pub fn registry(failures: u32) -> Result<Arc<HandlerRegistry>, RegistryError> {
    let mut registry = HandlerRegistry::new();
    registry.register::<Greet, _>(GreetHandler::new(failures))?;
    Ok(Arc::new(registry))
}
