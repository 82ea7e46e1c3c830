use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Convenient Result alias.
pub type AppResult<T> = Result<T, AppError>;

/// Application error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Payload too large: limit is {limit} bytes")]
    PayloadTooLarge { limit: usize },
}

impl AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        tracing::debug!(error = %self, status = status.as_u16(), "Request rejected");
        let body = json!({
            "error": {
                "code": status.as_u16(),
                "message": self.to_string(),
            }
        });

        (status, axum::Json(body)).into_response()
    }
}
