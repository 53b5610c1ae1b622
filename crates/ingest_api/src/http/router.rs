use crate::http::{health_check, ingest_event, recent_events, AppState};
use axum::http::Request;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::Level;

/// Build the API router.
///
/// - `POST /ingest` - accept a security event
/// - `GET /events?limit=N` - recent stored events, newest first
/// - `GET /health` - liveness
pub fn router(state: AppState, cors: CorsLayer) -> Router {
    Router::new()
        .route("/ingest", post(ingest_event))
        .route("/events", get(recent_events))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<_>| {
                tracing::span!(
                    Level::INFO,
                    "http_request",
                    method = %request.method(),
                    path = %request.uri().path(),
                    query = request.uri().query().unwrap_or("")
                )
            }),
        )
        .layer(cors)
}
