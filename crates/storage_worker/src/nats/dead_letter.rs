use bytes::Bytes;
use common::nats::{JetStreamPublisher, LayeredPublisher, NatsPublisherBuilder, PublishRequest};
use std::fmt;
use std::sync::Arc;
use tower::Service;
use tracing::{debug, error};

pub const REJECT_REASON_HEADER: &str = "Sentinel-Reject-Reason";

/// Why a delivered message was discarded without being stored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    Decode,
    Timestamp,
}

impl DiscardReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscardReason::Decode => "decode",
            DiscardReason::Timestamp => "timestamp",
        }
    }
}

impl fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Republishes discarded payloads, unchanged, to `{stream}.{reason}`
pub struct DeadLetterSink {
    publisher: LayeredPublisher,
    stream: String,
}

impl DeadLetterSink {
    pub fn new(jetstream: Arc<dyn JetStreamPublisher>, stream: impl Into<String>) -> Self {
        let publisher = NatsPublisherBuilder::new(jetstream, "storage_worker_dead_letter")
            .with_logging()
            .build();

        Self {
            publisher,
            stream: stream.into(),
        }
    }

    pub fn subject_for(&self, reason: DiscardReason) -> String {
        format!("{}.{}", self.stream, reason)
    }

    /// Best effort: a failed dead-letter publish is logged and otherwise ignored
    pub async fn forward(&self, payload: Bytes, reason: DiscardReason, error_text: &str) {
        let subject = self.subject_for(reason);
        // header values are single-line
        let error_text = error_text.replace(['\r', '\n'], " ");
        let request = PublishRequest::new(subject.clone(), payload)
            .with_header(REJECT_REASON_HEADER, &error_text);

        match self.publisher.clone().call(request).await {
            Ok(response) => debug!(
                subject = %subject,
                sequence = response.sequence,
                "forwarded discarded message to dead-letter stream"
            ),
            Err(e) => error!(
                subject = %subject,
                error = %e,
                "failed to forward discarded message to dead-letter stream"
            ),
        }
    }
}
