use common::domain::{DomainResult, SecurityEvent, SecurityEventProducer};
use garde::Validate;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Event as submitted by an agent
#[derive(Debug, Clone, Validate)]
pub struct IngestEventInput {
    #[garde(skip)]
    pub timestamp: String,
    #[garde(length(min = 1))]
    pub hostname: String,
    #[garde(skip)]
    pub event_type: String,
    #[garde(skip)]
    pub details: String,
}

impl From<SecurityEvent> for IngestEventInput {
    fn from(event: SecurityEvent) -> Self {
        Self {
            timestamp: event.timestamp,
            hostname: event.hostname,
            event_type: event.event_type,
            details: event.details,
        }
    }
}

/// Accepts events at the boundary and hands them to the queue.
///
/// Timestamps are not interpreted here; an unparseable timestamp is only
/// detected (and discarded) on the storage side.
pub struct EventIngestionService {
    producer: Arc<dyn SecurityEventProducer>,
}

impl EventIngestionService {
    pub fn new(producer: Arc<dyn SecurityEventProducer>) -> Self {
        Self { producer }
    }

    #[instrument(skip(self, input), fields(hostname = %input.hostname, event_type = %input.event_type))]
    pub async fn ingest(&self, input: IngestEventInput) -> DomainResult<()> {
        common::garde::validate_struct(&input)?;

        let event = SecurityEvent {
            timestamp: input.timestamp,
            hostname: input.hostname,
            event_type: input.event_type,
            details: input.details,
        };

        self.producer.publish(&event).await?;

        debug!("accepted security event");
        Ok(())
    }
}
