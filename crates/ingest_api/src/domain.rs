mod event_ingestion_service;
mod event_query_service;

pub use event_ingestion_service::*;
pub use event_query_service::*;
