//! HTTP error mapping.

use crate::gatekeeper::GatekeeperError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use porter_core::PixelError;
use porter_store::StoreError;
use serde::Serialize;
use thiserror::Error;

/// API-level errors, rendered as JSON `{error, code}` bodies.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("no identities enrolled")]
    NoIdentities,
    #[error("no face detected in image")]
    NoFaceDetected,
    #[error("image contains {0} faces; enrollment requires exactly one")]
    MultipleFaces(usize),
    #[error("identity {0:?} already enrolled")]
    DuplicateName(String),
    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("internal error: {0}")]
    Internal(String),
}

/// Error response body.
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::NoIdentities => (StatusCode::NOT_FOUND, "NO_IDENTITIES"),
            ApiError::NoFaceDetected => (StatusCode::UNPROCESSABLE_ENTITY, "NO_FACE_DETECTED"),
            ApiError::MultipleFaces(_) => (StatusCode::UNPROCESSABLE_ENTITY, "MULTIPLE_FACES"),
            ApiError::DuplicateName(_) => (StatusCode::CONFLICT, "DUPLICATE_NAME"),
            ApiError::UnsupportedFormat(_) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "UNSUPPORTED_FORMAT")
            }
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };

        let body = ErrorBody {
            error: self.to_string(),
            code,
        };
        (status, Json(body)).into_response()
    }
}

impl From<GatekeeperError> for ApiError {
    fn from(err: GatekeeperError) -> Self {
        match err {
            GatekeeperError::NoIdentities => ApiError::NoIdentities,
            GatekeeperError::NoFaceDetected => ApiError::NoFaceDetected,
            GatekeeperError::MultipleFaces(n) => ApiError::MultipleFaces(n),
            GatekeeperError::UnknownSession(id) => ApiError::NotFound(format!("session {id}")),
            GatekeeperError::Image(PixelError::UnsupportedFormat(color)) => {
                ApiError::UnsupportedFormat(format!("{color:?}"))
            }
            GatekeeperError::Image(e) => ApiError::BadRequest(e.to_string()),
            GatekeeperError::Store(e) => ApiError::from(e),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateName(name) => ApiError::DuplicateName(name),
            StoreError::IdentityNotFound(name) => ApiError::NotFound(format!("identity {name:?}")),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

/// Result type alias for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            ApiError::NoIdentities.into_response().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::DuplicateName("x".into()).into_response().status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::NoFaceDetected.into_response().status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ApiError::BadRequest("x".into()).into_response().status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_store_error_mapping() {
        let err = ApiError::from(StoreError::DuplicateName("alice".into()));
        assert!(matches!(err, ApiError::DuplicateName(_)));

        let err = ApiError::from(StoreError::IdentityNotFound("bob".into()));
        assert!(matches!(err, ApiError::NotFound(_)));
    }
}
