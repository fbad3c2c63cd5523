//! Message model: the typed `Message` trait and the `Envelope` the queue stores.
//!
//! The queue never interprets payloads. It only needs:
//! - a kind tag, so a handler can be found and the payload decoded back,
//! - a content-derived fingerprint, so identical messages collapse to one entry.

use std::fmt;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A message type that can travel through the queue.
///
/// Usually implemented by a serde-tagged enum covering one message family:
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// #[serde(tag = "type")]
/// enum StageMessage {
///     StartStage { execution_id: String, stage_id: String },
///     CompleteStage { execution_id: String, stage_id: String },
/// }
///
/// impl Message for StageMessage {
///     const KIND: &'static str = "orca.stage.v1";
/// }
/// ```
pub trait Message: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Kind tag, `{namespace}.{family}.v{major}` by convention.
    const KIND: &'static str;

    /// Overrides the queue's ack timeout for this message.
    fn ack_timeout(&self) -> Option<Duration> {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageKind(String);

impl MessageKind {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Content-derived identity of a message (hex-encoded blake3).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Hashes `kind` and the canonical JSON form of `payload`.
    ///
    /// `serde_json::Value` keeps object keys sorted, so two payloads with the
    /// same fields always serialize identically regardless of field order in
    /// the source type.
    pub fn of(kind: &MessageKind, payload: &serde_json::Value) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"v2:");
        hasher.update(kind.as_str().as_bytes());
        hasher.update(b":");
        hasher.update(payload.to_string().as_bytes());
        Self(hex::encode(hasher.finalize().as_bytes()))
    }

    /// Wraps a fingerprint read back from the store.
    pub fn from_stored(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Kind + payload (+ attributes) as stored and delivered by the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    kind: MessageKind,
    payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ack_timeout_ms: Option<u64>,
}

impl Envelope {
    pub fn new(kind: MessageKind, payload: serde_json::Value) -> Self {
        Self {
            kind,
            payload,
            ack_timeout_ms: None,
        }
    }

    /// Encodes a typed message.
    pub fn wrap<M: Message>(message: &M) -> Result<Self, serde_json::Error> {
        let payload = serde_json::to_value(message)?;
        let mut envelope = Self::new(MessageKind::new(M::KIND), payload);
        envelope.ack_timeout_ms = message.ack_timeout().map(saturating_millis);
        Ok(envelope)
    }

    /// Decodes the payload back into `M`.
    pub fn decode<M: Message>(&self) -> Result<M, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }

    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout_ms = Some(saturating_millis(timeout));
        self
    }

    pub fn kind(&self) -> &MessageKind {
        &self.kind
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    pub fn ack_timeout(&self) -> Option<Duration> {
        self.ack_timeout_ms.map(Duration::from_millis)
    }

    /// Attributes (the ack-timeout override) do not take part in identity.
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(&self.kind, &self.payload)
    }
}

fn saturating_millis(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)
}
