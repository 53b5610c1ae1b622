use common::domain::{DomainResult, SecurityEventReader, StoredEvent};
use std::sync::Arc;
use tracing::instrument;

pub const MAX_EVENTS_LIMIT: u32 = 1000;

/// Read path for the dashboard
pub struct EventQueryService {
    reader: Arc<dyn SecurityEventReader>,
    default_limit: u32,
}

impl EventQueryService {
    pub fn new(reader: Arc<dyn SecurityEventReader>, default_limit: u32) -> Self {
        Self {
            reader,
            default_limit: default_limit.clamp(1, MAX_EVENTS_LIMIT),
        }
    }

    /// Most recent events, newest first. `limit` is clamped to 1..=1000.
    #[instrument(skip(self))]
    pub async fn recent_events(&self, limit: Option<u32>) -> DomainResult<Vec<StoredEvent>> {
        let limit = limit
            .unwrap_or(self.default_limit)
            .clamp(1, MAX_EVENTS_LIMIT);

        self.reader.recent_events(limit).await
    }
}
