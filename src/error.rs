/// Unified error types for the media service
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the service
#[derive(Error, Debug)]
pub enum CmsError {
    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Authentication errors
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Caller is authenticated but not allowed to act on the resource
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Upload request carried no file payload
    #[error("No file provided")]
    MissingFile,

    /// Upload exceeds the configured ceiling
    #[error("File size {size} exceeds maximum of {limit} bytes")]
    TooLarge { size: usize, limit: usize },

    /// Not found errors
    #[error("Not found: {0}")]
    NotFound(String),

    /// Blob storage errors
    #[error("Blob storage error: {0}")]
    BlobStorage(String),

    /// Internal server errors
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CmsError {
    /// Short machine-readable code used in error bodies and metric labels
    pub fn code(&self) -> &'static str {
        match self {
            CmsError::Authentication(_) => "AuthenticationRequired",
            CmsError::Forbidden(_) => "Forbidden",
            CmsError::Validation(_) => "InvalidRequest",
            CmsError::MissingFile => "MissingFile",
            CmsError::TooLarge { .. } => "PayloadTooLarge",
            CmsError::NotFound(_) => "NotFound",
            CmsError::Database(_)
            | CmsError::BlobStorage(_)
            | CmsError::Internal(_)
            | CmsError::Io(_) => "InternalServerError",
        }
    }

    /// True for the storage-side failures surfaced to callers as 500s
    pub fn is_store_failure(&self) -> bool {
        matches!(
            self,
            CmsError::Database(_) | CmsError::BlobStorage(_) | CmsError::Internal(_) | CmsError::Io(_)
        )
    }
}

/// JSON error response format
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// Convert CmsError to HTTP response
impl IntoResponse for CmsError {
    fn into_response(self) -> Response {
        let status = match &self {
            CmsError::Authentication(_) => StatusCode::UNAUTHORIZED,
            CmsError::Forbidden(_) => StatusCode::FORBIDDEN,
            CmsError::Validation(_) | CmsError::MissingFile => StatusCode::BAD_REQUEST,
            CmsError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            CmsError::NotFound(_) => StatusCode::NOT_FOUND,
            CmsError::Database(_)
            | CmsError::BlobStorage(_)
            | CmsError::Internal(_)
            | CmsError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let message = if self.is_store_failure() {
            tracing::error!(error = %self, "request failed with store error");
            "Internal server error".to_string() // Don't leak details
        } else {
            self.to_string()
        };

        let body = Json(ErrorResponse {
            error: self.code().to_string(),
            message,
        });

        (status, body).into_response()
    }
}

/// Result type alias for service operations
pub type CmsResult<T> = Result<T, CmsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = vec![
            (CmsError::Authentication("x".into()), StatusCode::UNAUTHORIZED),
            (CmsError::Forbidden("x".into()), StatusCode::FORBIDDEN),
            (CmsError::MissingFile, StatusCode::BAD_REQUEST),
            (CmsError::TooLarge { size: 2, limit: 1 }, StatusCode::PAYLOAD_TOO_LARGE),
            (CmsError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (CmsError::BlobStorage("disk".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }

    #[test]
    fn test_too_large_message() {
        let err = CmsError::TooLarge { size: 11, limit: 10 };
        assert_eq!(err.to_string(), "File size 11 exceeds maximum of 10 bytes");
        assert!(!err.is_store_failure());
    }
}
