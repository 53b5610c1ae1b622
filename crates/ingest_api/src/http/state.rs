use crate::domain::{EventIngestionService, EventQueryService};
use std::sync::Arc;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub ingestion: Arc<EventIngestionService>,
    pub query: Arc<EventQueryService>,
}

impl AppState {
    pub fn new(ingestion: Arc<EventIngestionService>, query: Arc<EventQueryService>) -> Self {
        Self { ingestion, query }
    }
}
