use axum::Json;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    status: &'static str,
}

/// Liveness endpoint; the broker and the store are not contacted.
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse { status: "UP" })
}
