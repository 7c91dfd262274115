use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use tracing::warn;

use crate::collections::{self, ApiRequest};
use crate::error::OrchestratorError;
use crate::state::SharedState;

#[derive(Deserialize)]
pub struct CreateCollectionRequest {
    pub name: String,
}

/// GET /api/collections
pub async fn list_collections(State(state): State<SharedState>) -> impl IntoResponse {
    Json(serde_json::json!({ "collections": state.collections.list() }))
}

/// POST /api/collections
pub async fn create_collection(
    State(state): State<SharedState>,
    Json(body): Json<CreateCollectionRequest>,
) -> Result<impl IntoResponse, OrchestratorError> {
    let collection = state.collections.create(body.name.trim())?;
    Ok((StatusCode::CREATED, Json(collection)))
}

/// DELETE /api/collections/{id}
pub async fn delete_collection(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, OrchestratorError> {
    if !state.collections.delete(&id)? {
        return Err(OrchestratorError::NotFound(format!("collection {}", id)));
    }
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/collections/{id}/items
pub async fn add_item(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(request): Json<ApiRequest>,
) -> Result<impl IntoResponse, OrchestratorError> {
    match state.collections.add_item(&id, request)? {
        Some(item) => Ok((StatusCode::CREATED, Json(item))),
        None => Err(OrchestratorError::NotFound(format!("collection {}", id))),
    }
}

/// DELETE /api/collections/{id}/items/{item_id}
pub async fn remove_item(
    State(state): State<SharedState>,
    Path((id, item_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, OrchestratorError> {
    if !state.collections.remove_item(&id, &item_id)? {
        return Err(OrchestratorError::NotFound(format!(
            "item {} in collection {}",
            item_id, id
        )));
    }
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/requests/send — run one request from the tester and return
/// whatever came back, including non-2xx responses.
pub async fn send_request(
    State(state): State<SharedState>,
    Json(request): Json<ApiRequest>,
) -> Result<impl IntoResponse, OrchestratorError> {
    match collections::send_request(&state.http_client, &request).await {
        Ok(outcome) => Ok(Json(outcome)),
        Err(e) => {
            warn!("Request to {} failed: {}", request.url, e);
            Err(OrchestratorError::Upstream(e.to_string()))
        }
    }
}
