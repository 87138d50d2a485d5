//! Transport-boundary error mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use vigil_core::VigilError;

/// Wrapper turning engine errors into JSON error responses.
pub struct ApiError(pub VigilError);

impl From<VigilError> for ApiError {
    fn from(err: VigilError) -> Self {
        ApiError(err)
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError(VigilError::from(err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            VigilError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            VigilError::Conflict(_) => StatusCode::BAD_REQUEST,
            VigilError::NotFound(_) => StatusCode::NOT_FOUND,
            VigilError::Invalid(_) => StatusCode::BAD_REQUEST,
            VigilError::InsufficientData(_) => StatusCode::BAD_REQUEST,
            VigilError::ModelUnavailable(_) => StatusCode::NOT_FOUND,
            VigilError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            VigilError::Storage(_)
            | VigilError::Config(_)
            | VigilError::Io(_)
            | VigilError::Serialization(_)
            | VigilError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = json!({
            "error": self.0.kind(),
            "detail": self.0.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (VigilError::Unauthorized("x".into()), StatusCode::UNAUTHORIZED),
            (VigilError::Conflict("x".into()), StatusCode::BAD_REQUEST),
            (VigilError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (VigilError::Storage("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (VigilError::Timeout("x".into()), StatusCode::GATEWAY_TIMEOUT),
        ];
        for (err, expected) in cases {
            let response = ApiError(err).into_response();
            assert_eq!(response.status(), expected);
        }
    }
}
