use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::error::OrchestratorError;
use crate::model::TestConfiguration;
use crate::runs::{self, PollResponse};
use crate::state::SharedState;

/// POST /api/runs — validate the configuration and start its workers.
pub async fn submit_run(
    State(state): State<SharedState>,
    Json(config): Json<TestConfiguration>,
) -> Result<impl IntoResponse, OrchestratorError> {
    let submission = runs::submit(&state, config).await?;
    Ok((StatusCode::CREATED, Json(submission)))
}

/// GET /api/runs/{run_id}/{kind} — 200 with the artifact (exactly once),
/// 404 while it is still pending.
pub async fn poll_result(
    State(state): State<SharedState>,
    Path((run_id, kind)): Path<(String, String)>,
) -> Result<Response, OrchestratorError> {
    let response = match runs::poll(&state, &run_id, &kind).await? {
        PollResponse::Found(value) => (StatusCode::OK, Json(value)).into_response(),
        PollResponse::Pending { worker } => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({
                "status": "pending",
                "run_id": run_id,
                "kind": kind,
                "worker": worker,
            })),
        )
            .into_response(),
    };
    Ok(response)
}

/// GET /api/workers
pub async fn list_workers(State(state): State<SharedState>) -> impl IntoResponse {
    let workers = state.launcher.active_workers().await;
    Json(serde_json::json!({
        "count": workers.len(),
        "max_workers": state.config.max_workers,
        "workers": workers,
    }))
}

/// GET /api/recent-urls
pub async fn recent_urls(State(state): State<SharedState>) -> impl IntoResponse {
    Json(serde_json::json!({ "urls": state.recent_urls.list() }))
}

/// DELETE /api/recent-urls
pub async fn clear_recent_urls(
    State(state): State<SharedState>,
) -> Result<impl IntoResponse, OrchestratorError> {
    state.recent_urls.clear()?;
    Ok(StatusCode::NO_CONTENT)
}
