use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    /// Malformed or incomplete event envelope; the caller logs and drops it.
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),

    /// File not yet materialized on disk; retried by the caller before surfacing.
    #[error("not found (transient): {0}")]
    NotFoundTransient(String),

    /// Any non-transient filesystem error.
    #[error("IO error: {0}")]
    IoFatal(#[from] std::io::Error),

    /// Shape mismatch or zero-vector from the embedder.
    #[error("embedding invalid: {0}")]
    EmbeddingInvalid(String),

    /// Vector backend unreachable or returned a non-2xx.
    #[error("vector backend unavailable: {0}")]
    VectorBackendUnavailable(String),

    /// Catalog transaction aborted.
    #[error("catalog conflict: {0}")]
    CatalogConflict(String),

    /// No project root resolved for a session; not a failure, the event stays buffered.
    #[error("session unresolved: {0}")]
    ResolutionUnresolved(String),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),

    #[error("bad request: {0}")]
    BadRequest(String),
}

impl From<rusqlite::Error> for AppError {
    fn from(e: rusqlite::Error) -> Self {
        AppError::CatalogConflict(e.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(e: reqwest::Error) -> Self {
        AppError::VectorBackendUnavailable(e.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::InvalidEnvelope(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            AppError::NotFoundTransient(_) => (StatusCode::NOT_FOUND, self.to_string()),
            AppError::IoFatal(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
            AppError::EmbeddingInvalid(_) => (StatusCode::UNPROCESSABLE_ENTITY, self.to_string()),
            AppError::VectorBackendUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, self.to_string())
            }
            AppError::CatalogConflict(_) => (StatusCode::CONFLICT, self.to_string()),
            AppError::ResolutionUnresolved(_) => (StatusCode::ACCEPTED, self.to_string()),
            AppError::Serde(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal server error".to_string(),
            ),
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
        };

        let body = json!({
            "error": message,
            "status": status.as_u16(),
        });

        (status, Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
