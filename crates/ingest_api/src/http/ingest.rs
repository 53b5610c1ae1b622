use crate::domain::IngestEventInput;
use crate::http::{ApiError, AppState};
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use common::domain::SecurityEvent;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct IngestResponse {
    status: &'static str,
}

/// `POST /ingest`: accept one event and queue it
pub async fn ingest_event(
    State(state): State<AppState>,
    payload: Result<Json<SecurityEvent>, JsonRejection>,
) -> Result<Json<IngestResponse>, ApiError> {
    let Json(event) = payload?;

    state.ingestion.ingest(IngestEventInput::from(event)).await?;

    Ok(Json(IngestResponse {
        status: "event received",
    }))
}
