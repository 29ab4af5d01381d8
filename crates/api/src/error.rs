//! API error type and its HTTP mapping

use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use batch_coordinator::PredictError;
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinError;

/// Request-level failures
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Malformed multipart body: {0}")]
    Multipart(#[from] MultipartError),

    #[error("Missing form field: {0}")]
    MissingField(&'static str),

    #[error("No image files provided for batch prediction")]
    NoFiles,

    #[error("Too many files: at most {limit} per request")]
    TooManyFiles { limit: usize },

    #[error(transparent)]
    Predict(#[from] PredictError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<JoinError> for ApiError {
    fn from(err: JoinError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Multipart(e) => e.status(),
            ApiError::MissingField(_) | ApiError::NoFiles => StatusCode::BAD_REQUEST,
            ApiError::TooManyFiles { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Predict(PredictError::Preprocess(_)) => StatusCode::BAD_REQUEST,
            ApiError::Predict(PredictError::Inference(_)) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Error body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub detail: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(ErrorResponse { detail: self.to_string() })).into_response()
    }
}
