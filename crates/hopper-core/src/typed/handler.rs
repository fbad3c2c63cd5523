//! Typed handlers and their type-erased form.
//!
//! `Handler<M>` is what applications implement. The registry stores handlers
//! as `DynHandler` so that one map can hold handlers of every message type;
//! `TypedHandler` bridges the two by decoding the envelope payload into `M`.

use std::marker::PhantomData;

use async_trait::async_trait;

use crate::domain::{Envelope, Message};
use crate::error::HandlerError;

/// Handles one message type.
///
/// ```ignore
/// struct StageHandler;
///
/// #[async_trait]
/// impl Handler<StageMessage> for StageHandler {
///     async fn handle(&self, message: StageMessage) -> Result<(), HandlerError> {
///         match message {
///             StageMessage::StartStage { .. } => { /* ... */ }
///             StageMessage::CompleteStage { .. } => { /* ... */ }
///         }
///         Ok(())
///     }
/// }
/// ```
///
/// Returning an error leaves the message unacknowledged: it is delivered
/// again once its lease expires.
#[async_trait]
pub trait Handler<M: Message>: Send + Sync {
    async fn handle(&self, message: M) -> Result<(), HandlerError>;
}

/// Object-safe handler over raw envelopes.
#[async_trait]
pub trait DynHandler: Send + Sync {
    async fn handle_envelope(&self, envelope: &Envelope) -> Result<(), HandlerError>;

    fn kind(&self) -> &'static str;
}

pub struct TypedHandler<M: Message, H: Handler<M>> {
    handler: H,
    _marker: PhantomData<fn() -> M>,
}

impl<M: Message, H: Handler<M>> TypedHandler<M, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<M: Message, H: Handler<M>> DynHandler for TypedHandler<M, H> {
    async fn handle_envelope(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        let message: M = envelope.decode().map_err(|source| HandlerError::Decode {
            kind: envelope.kind().clone(),
            source,
        })?;
        self.handler.handle(message).await
    }

    fn kind(&self) -> &'static str {
        M::KIND
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MessageKind;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Debug, Serialize, Deserialize)]
    struct Ping {
        value: i32,
    }

    impl Message for Ping {
        const KIND: &'static str = "test.ping.v1";
    }

    struct PingHandler;

    #[async_trait]
    impl Handler<Ping> for PingHandler {
        async fn handle(&self, message: Ping) -> Result<(), HandlerError> {
            if message.value < 0 {
                return Err(HandlerError::Failed("negative ping".into()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn typed_handler_decodes_the_payload() {
        let handler = TypedHandler::<Ping, _>::new(PingHandler);
        let envelope = Envelope::wrap(&Ping { value: 100 }).unwrap();

        handler.handle_envelope(&envelope).await.unwrap();
        assert_eq!(handler.kind(), "test.ping.v1");
    }

    #[tokio::test]
    async fn handler_errors_pass_through() {
        let handler = TypedHandler::<Ping, _>::new(PingHandler);
        let envelope = Envelope::wrap(&Ping { value: -1 }).unwrap();

        let err = handler.handle_envelope(&envelope).await.unwrap_err();
        assert!(matches!(err, HandlerError::Failed(_)));
    }

    #[tokio::test]
    async fn undecodable_payload_is_a_decode_error() {
        let handler = TypedHandler::<Ping, _>::new(PingHandler);
        let envelope = Envelope::new(MessageKind::new(Ping::KIND), json!({ "value": "nope" }));

        let err = handler.handle_envelope(&envelope).await.unwrap_err();
        assert!(matches!(err, HandlerError::Decode { .. }));
    }
}
