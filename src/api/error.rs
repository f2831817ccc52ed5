//! JSON error responses for the inspection routes.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": true,
            "message": self.message,
        }));
        (self.status, body).into_response()
    }
}

/// Storage failures are logged in full; callers only see that it failed.
impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        error!("Request failed: {:#}", err);
        Self::new(StatusCode::SERVICE_UNAVAILABLE, "storage unavailable")
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
