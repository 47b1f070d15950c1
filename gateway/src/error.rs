// error.rs - Maps paychan_core errors onto HTTP responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use paychan_core::CoreError;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("bad request: {0}")]
    BadRequest(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Core(CoreError::NotFound(_)) => StatusCode::NOT_FOUND,
            AppError::Core(CoreError::InvalidState(_))
            | AppError::Core(CoreError::InsufficientCapacity { .. })
            | AppError::Core(CoreError::InvalidPayment(_))
            | AppError::Core(CoreError::Conflict(_))
            | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Core(CoreError::ChainError(_)) | AppError::Core(CoreError::StorageError(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::Request(_) => StatusCode::BAD_GATEWAY,
        };

        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}
