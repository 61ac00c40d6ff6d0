use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use hub::message::now_rfc3339;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: &'static str,
    time: String,
}

/// GET liveness of the HTTP router. Does not consult the hub.
pub async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy",
            time: now_rfc3339(),
        }),
    )
}
