use async_nats::HeaderMap;
use bytes::Bytes;

/// Request to publish a message to JetStream
#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub subject: String,
    pub payload: Bytes,
    /// Trace context is injected here by the tracing layer
    pub headers: HeaderMap,
}

impl PublishRequest {
    pub fn new(subject: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            subject: subject.into(),
            payload: payload.into(),
            headers: HeaderMap::new(),
        }
    }

    pub fn with_header(mut self, name: &'static str, value: &str) -> Self {
        self.headers.insert(name, value);
        self
    }
}

/// Response from an acknowledged publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishResponse {
    pub subject: String,
    /// Stream sequence assigned by the broker
    pub sequence: u64,
}
