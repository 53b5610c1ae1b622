use crate::domain::{DomainError, SecurityEvent};
use bytes::Bytes;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("failed to decode security event: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("failed to encode security event: {0}")]
    Encode(#[source] serde_json::Error),
}

impl From<WireError> for DomainError {
    fn from(err: WireError) -> Self {
        DomainError::MalformedPayload(err.to_string())
    }
}

/// Encode a security event as a flat UTF-8 JSON object.
///
/// Keys are emitted in declaration order, so equal events encode to equal bytes.
pub fn encode_security_event(event: &SecurityEvent) -> Result<Bytes, WireError> {
    serde_json::to_vec(event)
        .map(Bytes::from)
        .map_err(WireError::Encode)
}

/// Decode a security event from its wire form.
///
/// All four fields must be present as strings. Unknown keys are ignored.
pub fn decode_security_event(payload: &[u8]) -> Result<SecurityEvent, WireError> {
    serde_json::from_slice(payload).map_err(WireError::Decode)
}
