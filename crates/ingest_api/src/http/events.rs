use crate::http::{ApiError, AppState};
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::Json;
use common::domain::StoredEvent;
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub struct EventsQuery {
    pub limit: Option<u32>,
}

/// `GET /events`: most recent stored events, newest first
pub async fn recent_events(
    State(state): State<AppState>,
    query: Result<Query<EventsQuery>, QueryRejection>,
) -> Result<Json<Vec<StoredEvent>>, ApiError> {
    let Query(query) = query?;
    let events = state.query.recent_events(query.limit).await?;
    Ok(Json(events))
}
