use crate::domain::result::{DomainError, DomainResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::{self, IgnoredAny, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Security event as reported by an agent and carried through the queue.
///
/// Field names are the wire contract: producers and consumers agree on them
/// and nothing else, so either side can be redeployed independently.
/// Deserialization accepts only a keyed object, never a positional array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecurityEvent {
    /// RFC3339 instant at which the event occurred on the agent
    pub timestamp: String,
    pub hostname: String,
    pub event_type: String,
    pub details: String,
}

const SECURITY_EVENT_FIELDS: &[&str] = &["timestamp", "hostname", "event_type", "details"];

impl<'de> Deserialize<'de> for SecurityEvent {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_struct("SecurityEvent", SECURITY_EVENT_FIELDS, SecurityEventVisitor)
    }
}

struct SecurityEventVisitor;

impl<'de> Visitor<'de> for SecurityEventVisitor {
    type Value = SecurityEvent;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a security event object")
    }

    // No visit_seq: arrays are rejected as an invalid type
    fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut timestamp: Option<String> = None;
        let mut hostname: Option<String> = None;
        let mut event_type: Option<String> = None;
        let mut details: Option<String> = None;

        while let Some(key) = map.next_key::<String>()? {
            let slot = match key.as_str() {
                "timestamp" => &mut timestamp,
                "hostname" => &mut hostname,
                "event_type" => &mut event_type,
                "details" => &mut details,
                _ => {
                    map.next_value::<IgnoredAny>()?;
                    continue;
                }
            };
            if slot.is_some() {
                return Err(de::Error::custom(format_args!("duplicate field `{}`", key)));
            }
            *slot = Some(map.next_value()?);
        }

        Ok(SecurityEvent {
            timestamp: timestamp.ok_or_else(|| de::Error::missing_field("timestamp"))?,
            hostname: hostname.ok_or_else(|| de::Error::missing_field("hostname"))?,
            event_type: event_type.ok_or_else(|| de::Error::missing_field("event_type"))?,
            details: details.ok_or_else(|| de::Error::missing_field("details"))?,
        })
    }
}

/// Validated, storage-ready form of a security event.
///
/// Immutable once written; the store exposes no update or delete path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub timestamp: DateTime<Utc>,
    pub hostname: String,
    pub event_type: String,
    pub details: String,
}

impl TryFrom<SecurityEvent> for StoredEvent {
    type Error = DomainError;

    fn try_from(event: SecurityEvent) -> Result<Self, Self::Error> {
        let timestamp = DateTime::parse_from_rfc3339(&event.timestamp)
            .map_err(|e| DomainError::InvalidTimestamp {
                value: event.timestamp.clone(),
                reason: e.to_string(),
            })?
            .with_timezone(&Utc);

        Ok(StoredEvent {
            timestamp,
            hostname: event.hostname,
            event_type: event.event_type,
            details: event.details,
        })
    }
}

/// Input for appending security events (batch operation)
#[derive(Debug, Clone)]
pub struct AppendEventsInput {
    pub events: Vec<StoredEvent>,
}

/// Trait for publishing security events to the queue
///
/// Implementations should:
/// - Serialize the event with the wire codec
/// - Route it by hostname so one host's events stay in order
/// - Return only after the broker acknowledged durable acceptance
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait SecurityEventProducer: Send + Sync {
    /// Publish a single security event
    ///
    /// # Returns
    /// () once the broker acknowledged the message, `DomainError::PublishError` otherwise
    async fn publish(&self, event: &SecurityEvent) -> DomainResult<()>;
}

/// Repository trait for security event storage
/// Infrastructure layer (ClickHouse) implements this trait
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait SecurityEventRepository: Send + Sync {
    /// Create the events table if it does not exist. Safe to call repeatedly.
    async fn ensure_schema(&self) -> DomainResult<()>;

    /// Append a batch of events. An empty batch is a no-op.
    /// Failure handling: the whole batch fails together
    async fn append_batch(&self, input: AppendEventsInput) -> DomainResult<()>;
}

/// Read-only access for the dashboard
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait SecurityEventReader: Send + Sync {
    /// Most recent events, newest first
    async fn recent_events(&self, limit: u32) -> DomainResult<Vec<StoredEvent>>;
}
