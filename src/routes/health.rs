use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::state::SharedState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub started_at: String,
    pub active_workers: usize,
    pub max_workers: Option<usize>,
    pub seo_configured: bool,
}

/// GET /health
pub async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        started_at: state.started_at.to_rfc3339(),
        active_workers: state.launcher.active_count().await,
        max_workers: state.config.max_workers,
        seo_configured: state.config.seo_api_key.is_some(),
    })
}
