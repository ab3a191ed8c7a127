use crate::services::ServiceError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    /// Shortcut for 409 Conflict
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match &err {
            ServiceError::BucketNotFound(_) => AppError::not_found(err.to_string()),
            ServiceError::BucketAlreadyExists(_)
            | ServiceError::BucketAlreadyFilled(_)
            | ServiceError::BucketArchived(_)
            | ServiceError::BucketExhausted(_) => AppError::conflict(err.to_string()),
            ServiceError::InvalidBucketName { .. } => {
                AppError::new(StatusCode::BAD_REQUEST, err.to_string())
            }
            ServiceError::NoMatchingPairs => {
                AppError::new(StatusCode::UNPROCESSABLE_ENTITY, err.to_string())
            }
            ServiceError::Busy(_) => AppError::new(StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
            ServiceError::DeadlineExceeded(_) => {
                AppError::new(StatusCode::GATEWAY_TIMEOUT, err.to_string())
            }
            ServiceError::TransactionFailure { .. } | ServiceError::Sqlx(_) => {
                tracing::error!(error = %err, "storage failure");
                AppError::internal("internal storage error")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_taxonomy_to_status() {
        let cases = [
            (ServiceError::BucketNotFound("b".into()), StatusCode::NOT_FOUND),
            (ServiceError::BucketAlreadyExists("b".into()), StatusCode::CONFLICT),
            (ServiceError::BucketAlreadyFilled("b".into()), StatusCode::CONFLICT),
            (ServiceError::BucketArchived("b".into()), StatusCode::CONFLICT),
            (ServiceError::BucketExhausted("b".into()), StatusCode::CONFLICT),
            (ServiceError::NoMatchingPairs, StatusCode::UNPROCESSABLE_ENTITY),
            (
                ServiceError::Busy(sqlx::Error::PoolTimedOut),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                ServiceError::DeadlineExceeded("pop_bucket_value"),
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (
                ServiceError::Sqlx(sqlx::Error::PoolClosed),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, status) in cases {
            assert_eq!(AppError::from(err).status, status);
        }
    }

    #[test]
    fn storage_details_stay_internal() {
        let err = AppError::from(ServiceError::Sqlx(sqlx::Error::PoolClosed));
        assert_eq!(err.message, "internal storage error");
    }
}
