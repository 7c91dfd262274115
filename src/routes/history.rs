use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::Value;

use crate::error::OrchestratorError;
use crate::history::HistoryItem;
use crate::log_capture::{LogLevel, LogSource};
use crate::model::TestConfiguration;
use crate::state::SharedState;

#[derive(Deserialize)]
pub struct SaveHistoryRequest {
    /// Usually the run id the result came from.
    #[serde(default)]
    pub id: Option<String>,
    pub config: TestConfiguration,
    #[serde(default)]
    pub result: Value,
}

#[derive(Deserialize)]
pub struct PruneRequest {
    pub keep: usize,
}

/// GET /api/history
pub async fn list_history(State(state): State<SharedState>) -> impl IntoResponse {
    let items = state.history.read_all();
    Json(serde_json::json!({
        "count": items.len(),
        "items": items,
    }))
}

/// POST /api/history
pub async fn save_history(
    State(state): State<SharedState>,
    Json(body): Json<SaveHistoryRequest>,
) -> Result<impl IntoResponse, OrchestratorError> {
    let id = body
        .id
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let item = HistoryItem::new(id, body.config, body.result);
    state.history.append(item.clone())?;
    Ok((StatusCode::CREATED, Json(item)))
}

/// DELETE /api/history
pub async fn clear_history(
    State(state): State<SharedState>,
) -> Result<impl IntoResponse, OrchestratorError> {
    state.history.clear()?;
    state
        .logs
        .emit(LogSource::Store, LogLevel::Info, "History cleared")
        .await;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /api/history/{id}
pub async fn delete_history_item(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, OrchestratorError> {
    if !state.history.remove(&id)? {
        return Err(OrchestratorError::NotFound(format!("history item {}", id)));
    }
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/history/export — the full list as a downloadable JSON array.
pub async fn export_history(
    State(state): State<SharedState>,
) -> Result<impl IntoResponse, OrchestratorError> {
    let json = state.history.export()?;
    Ok((
        [
            (header::CONTENT_TYPE, "application/json"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"loadscope-history.json\"",
            ),
        ],
        json,
    ))
}

/// POST /api/history/import — replaces the whole history. The body is taken
/// raw so shape errors come back as 400 with a precise message.
pub async fn import_history(
    State(state): State<SharedState>,
    body: String,
) -> Result<impl IntoResponse, OrchestratorError> {
    let imported = match state.history.import(&body) {
        Ok(count) => count,
        Err(e) => {
            state
                .logs
                .emit(
                    LogSource::Store,
                    LogLevel::Warn,
                    format!("History import rejected: {}", e),
                )
                .await;
            return Err(e.into());
        }
    };

    state
        .logs
        .emit(
            LogSource::Store,
            LogLevel::Info,
            format!("Imported {} history items", imported),
        )
        .await;

    Ok(Json(serde_json::json!({ "imported": imported })))
}

/// POST /api/history/prune
pub async fn prune_history(
    State(state): State<SharedState>,
    Json(body): Json<PruneRequest>,
) -> Result<impl IntoResponse, OrchestratorError> {
    let removed = state.history.prune(body.keep)?;
    Ok(Json(serde_json::json!({
        "removed": removed,
        "remaining": state.history.read_all().len(),
    })))
}
