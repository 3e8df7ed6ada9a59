use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use chatpsi_shared::protocol::{ErrorBody, ErrorCode};
use chatpsi_store::StoreError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("An active subscription is required")]
    EntitlementRequired,

    #[error("AI processor unavailable: {0}")]
    UpstreamDispatchFailed(String),

    #[error("Failed to persist message: {0}")]
    PersistenceFailed(String),

    #[error("File too large: {size} bytes (max {max})")]
    FileTooLarge { size: usize, max: usize },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Too many requests")]
    RateLimited,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServerError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ServerError::EntitlementRequired => ErrorCode::EntitlementRequired,
            ServerError::UpstreamDispatchFailed(_) => ErrorCode::UpstreamDispatchFailed,
            ServerError::PersistenceFailed(_) => ErrorCode::PersistenceFailed,
            ServerError::FileTooLarge { .. } => ErrorCode::FileTooLarge,
            ServerError::Unauthorized(_) => ErrorCode::Unauthorized,
            ServerError::Forbidden(_) => ErrorCode::Forbidden,
            ServerError::NotFound(_) => ErrorCode::NotFound,
            ServerError::BadRequest(_) => ErrorCode::BadRequest,
            ServerError::RateLimited => ErrorCode::RateLimited,
            ServerError::Internal(_) => ErrorCode::Internal,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::EntitlementRequired | ServerError::Forbidden(_) => StatusCode::FORBIDDEN,
            ServerError::UpstreamDispatchFailed(_) => StatusCode::BAD_GATEWAY,
            ServerError::PersistenceFailed(_) | ServerError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ServerError::FileTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ServerError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ServerError::NotFound(_) => StatusCode::NOT_FOUND,
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        }
    }
}

impl From<StoreError> for ServerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => ServerError::NotFound("record".into()),
            other => ServerError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        // Internal details are logged, never returned.
        let message = match &self {
            ServerError::PersistenceFailed(detail) => {
                tracing::error!(error = %detail, "Persistence failed");
                "Failed to persist message".to_string()
            }
            ServerError::Internal(detail) => {
                tracing::error!(error = %detail, "Internal error");
                "Internal server error".to_string()
            }
            _ => self.to_string(),
        };

        let body = ErrorBody {
            error: message,
            code: self.code(),
        };

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ServerError::EntitlementRequired.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            ServerError::UpstreamDispatchFailed("x".into()).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ServerError::FileTooLarge { size: 2, max: 1 }.status(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(ServerError::RateLimited.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_internal_details_are_hidden() {
        let response = ServerError::Internal("disk I/O error at /var/db".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: ErrorBody = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body.code, ErrorCode::Internal);
        assert!(!body.error.contains("/var/db"));
    }
}
