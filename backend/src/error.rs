//! Error handling for the weather alerting service
//!
//! Each boundary has its own error type. `AppError` is what the preference
//! service and the HTTP surface return.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use shared::PayloadError;
use thiserror::Error;

use crate::services::retry::{RetryError, Retryable};

// ============================================================================
// Boundary Errors
// ============================================================================

/// Forecast, subscriber or metrics store failure
#[derive(Error, Debug)]
pub enum StoreError {
    /// The store cannot be reached at all
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store query failed: {0}")]
    Query(String),

    #[error("Stored document could not be (de)serialized: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Whether the failure affects the whole store rather than one key
    pub fn is_connectivity(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StoreError::Unavailable(err.to_string())
            }
            sqlx::Error::Tls(_) => StoreError::Unavailable(err.to_string()),
            other => StoreError::Query(other.to_string()),
        }
    }
}

/// Forecast provider request failure
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Request timed out")]
    Timeout,

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Provider returned HTTP {0}")]
    Status(u16),

    #[error("Response body could not be decoded: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else if let Some(status) = err.status() {
            FetchError::Status(status.as_u16())
        } else if err.is_decode() || err.is_body() {
            FetchError::Decode(err.to_string())
        } else {
            FetchError::Connection(err.to_string())
        }
    }
}

impl Retryable for FetchError {
    fn is_transient(&self) -> bool {
        match self {
            FetchError::Timeout | FetchError::Connection(_) => true,
            FetchError::Status(code) => is_retryable_status(*code),
            FetchError::Decode(_) => false,
        }
    }
}

/// Notification delivery failure
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Delivery transport failed: {0}")]
    Transport(String),

    #[error("Delivery timed out")]
    Timeout,

    #[error("Delivery rejected with HTTP {status}: {description}")]
    Rejected { status: u16, description: String },
}

impl From<reqwest::Error> for DispatchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            DispatchError::Timeout
        } else {
            DispatchError::Transport(err.to_string())
        }
    }
}

impl Retryable for DispatchError {
    fn is_transient(&self) -> bool {
        match self {
            DispatchError::Transport(_) | DispatchError::Timeout => true,
            DispatchError::Rejected { status, .. } => is_retryable_status(*status),
        }
    }
}

/// Status codes worth another attempt: server errors, 429 and 408
pub fn is_retryable_status(status: u16) -> bool {
    status >= 500 || status == 429 || status == 408
}

/// Why a location produced no batch this cycle
#[derive(Error, Debug)]
pub enum CollectError {
    #[error("Fetch failed: {0}")]
    Fetch(#[from] RetryError<FetchError>),

    #[error("Invalid payload: {0}")]
    Payload(#[from] PayloadError),
}

// ============================================================================
// Application Error
// ============================================================================

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    // Internal errors
    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

/// Error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

impl AppError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::Store(err) if err.is_connectivity() => {
                (StatusCode::SERVICE_UNAVAILABLE, "STORE_UNAVAILABLE")
            }
            AppError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORE_ERROR"),
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let message = match &self {
            AppError::Internal(_) => "An internal server error occurred".to_string(),
            other => other.to_string(),
        };

        // Log the error for debugging
        tracing::error!("Error: {:?}", self);

        let body = ErrorResponse {
            error: ErrorDetail {
                code: code.to_string(),
                message,
            },
        };
        (status, Json(body)).into_response()
    }
}

/// Result type alias for handlers
pub type AppResult<T> = Result<T, AppError>;
