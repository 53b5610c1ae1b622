use crate::nats::traits::MessageAcker;
use anyhow::{anyhow, Result};
use async_nats::jetstream::{self, AckKind};
use async_nats::HeaderMap;
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;

/// How a delivered message is settled with the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckDecision {
    /// Processed; advance past it
    Ack,
    /// Redeliver later
    Nak,
    /// Never redeliver; advance past it
    Term,
}

/// A message delivered by a pull consumer, detached from the transport so
/// the processing path only sees the payload and a settle handle
pub struct ConsumedMessage {
    pub subject: String,
    pub payload: Bytes,
    pub headers: Option<HeaderMap>,
    /// Delivery attempt, starting at 1
    pub delivered: u64,
    acker: Box<dyn MessageAcker>,
}

impl ConsumedMessage {
    pub fn new(
        subject: impl Into<String>,
        payload: Bytes,
        headers: Option<HeaderMap>,
        delivered: u64,
        acker: Box<dyn MessageAcker>,
    ) -> Self {
        Self {
            subject: subject.into(),
            payload,
            headers,
            delivered,
            acker,
        }
    }

    pub async fn settle(self, decision: AckDecision) -> Result<()> {
        self.acker.settle(decision).await
    }
}

impl fmt::Debug for ConsumedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumedMessage")
            .field("subject", &self.subject)
            .field("payload_bytes", &self.payload.len())
            .field("delivered", &self.delivered)
            .finish()
    }
}

/// Acker backed by a real JetStream message
pub struct JetStreamAcker {
    message: jetstream::Message,
}

impl JetStreamAcker {
    pub fn new(message: jetstream::Message) -> Self {
        Self { message }
    }
}

#[async_trait]
impl MessageAcker for JetStreamAcker {
    async fn settle(&self, decision: AckDecision) -> Result<()> {
        let kind = match decision {
            AckDecision::Ack => AckKind::Ack,
            AckDecision::Nak => AckKind::Nak(None),
            AckDecision::Term => AckKind::Term,
        };

        self.message
            .ack_with(kind)
            .await
            .map_err(|e| anyhow!("Failed to settle message with {:?}: {}", decision, e))
    }
}

impl From<jetstream::Message> for ConsumedMessage {
    fn from(message: jetstream::Message) -> Self {
        let delivered = message
            .info()
            .map(|info| info.delivered.max(1) as u64)
            .unwrap_or(1);

        ConsumedMessage::new(
            message.subject.to_string(),
            message.payload.clone(),
            message.headers.clone(),
            delivered,
            Box::new(JetStreamAcker::new(message)),
        )
    }
}
