use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use engine::EngineError;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("Invalid query string: {0}")]
    Query(#[from] QueryRejection),
    #[error("Invalid request body: {0}")]
    Json(#[from] JsonRejection),
    #[error("Invalid path: {0}")]
    Path(#[from] PathRejection),
}

/// Converts our custom `AppError` into an HTTP response.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::Engine(EngineError::InvalidArgument(message)) => (StatusCode::BAD_REQUEST, message),
            AppError::Engine(err @ EngineError::NotFound(_)) => (StatusCode::NOT_FOUND, err.to_string()),
            AppError::Engine(EngineError::OutOfOrder(message)) => (StatusCode::CONFLICT, message),
            AppError::Engine(engine_err) => {
                tracing::error!(error = ?engine_err, "Engine error.");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal error occurred".to_string(),
                )
            }
            rejection @ (AppError::Query(_) | AppError::Json(_) | AppError::Path(_)) => {
                tracing::debug!(error = %rejection, "Rejected malformed request.");
                (StatusCode::BAD_REQUEST, rejection.to_string())
            }
        };

        let body = Json(json!({ "error": error_message }));
        (status, body).into_response()
    }
}
