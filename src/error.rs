use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::history::HistoryError;
use crate::local_store::LocalStoreError;
use crate::model::ValidationError;
use crate::result_store::StoreError;
use crate::worker::LaunchError;

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("Invalid configuration: {0}")]
    Validation(#[from] ValidationError),

    #[error("{0}")]
    Capacity(#[from] LaunchError),

    #[error("Unknown run id: {0}")]
    InvalidRunId(String),

    #[error("{0}")]
    InvalidArtifactKind(String),

    #[error("Result retrieval failed: {0}")]
    ResultStore(#[from] StoreError),

    #[error("{0}")]
    History(#[from] HistoryError),

    #[error("Local store error: {0}")]
    LocalStore(#[from] LocalStoreError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Request failed: {0}")]
    Upstream(String),
}

impl IntoResponse for OrchestratorError {
    fn into_response(self) -> Response {
        let status = match &self {
            OrchestratorError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            OrchestratorError::Capacity(_) => StatusCode::SERVICE_UNAVAILABLE,
            OrchestratorError::InvalidRunId(_) => StatusCode::BAD_REQUEST,
            OrchestratorError::InvalidArtifactKind(_) => StatusCode::BAD_REQUEST,
            OrchestratorError::ResultStore(_) => StatusCode::INTERNAL_SERVER_ERROR,
            OrchestratorError::History(HistoryError::Store(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            OrchestratorError::History(_) => StatusCode::BAD_REQUEST,
            OrchestratorError::LocalStore(_) => StatusCode::INTERNAL_SERVER_ERROR,
            OrchestratorError::NotFound(_) => StatusCode::NOT_FOUND,
            OrchestratorError::Upstream(_) => StatusCode::BAD_GATEWAY,
        };

        let body = serde_json::json!({
            "error": self.to_string(),
        });

        (status, axum::Json(body)).into_response()
    }
}
