use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::predictor::PredictError;
use crate::request::RequestError;

/// Everything a handler can fail with, mapped onto a status code and an
/// `{"error": ...}` body.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Request(#[from] RequestError),
    #[error(transparent)]
    Predict(#[from] PredictError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Request(_) => StatusCode::BAD_REQUEST,
            ApiError::Predict(PredictError::DatasetUnavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Predict(PredictError::NoMatch) => StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(error = %self, "prediction refused");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "prediction request rejected");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
