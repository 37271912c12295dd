//! Error types for the alert pipeline.
//!
//! Every stage reports failures through [`AppError`], which carries the
//! operation name, the underlying cause, and whether the operation is safe
//! to retry. Stages are expected to catch their own transient failures and
//! convert them into a stage-level outcome rather than propagate a panic.

use std::fmt;
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use derive_more::Display;

/// Error kind, mirroring the taxonomy callers are expected to branch on.
#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum ErrorKind {
    ConfigError,
    ValidationError,
    AuthError,
    TransientIo,
    PermanentIo,
    CircuitOpen,
    CacheError,
    StorageConflict,
    StorageError,
    DeadlineExceeded,
    InternalError,
}

/// Application-wide error. Carries enough context for both logging and for
/// the HTTP layer to pick a status code without re-deriving it.
#[derive(Debug)]
pub struct AppError {
    pub kind: ErrorKind,
    pub op: &'static str,
    pub cause: String,
    pub retryable: bool,
    pub retry_after: Option<Duration>,
}

impl AppError {
    pub fn new(kind: ErrorKind, op: &'static str, cause: impl Into<String>) -> Self {
        let retryable = matches!(kind, ErrorKind::TransientIo | ErrorKind::StorageError);
        Self {
            kind,
            op,
            cause: cause.into(),
            retryable,
            retry_after: None,
        }
    }

    pub fn with_retry_after(mut self, duration: Duration) -> Self {
        self.retry_after = Some(duration);
        self
    }

    pub fn config(op: &'static str, cause: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConfigError, op, cause)
    }

    pub fn validation(op: &'static str, cause: impl Into<String>) -> Self {
        Self::new(ErrorKind::ValidationError, op, cause)
    }

    pub fn auth(op: &'static str, cause: impl Into<String>) -> Self {
        Self::new(ErrorKind::AuthError, op, cause)
    }

    pub fn transient_io(op: &'static str, cause: impl Into<String>) -> Self {
        Self::new(ErrorKind::TransientIo, op, cause)
    }

    pub fn permanent_io(op: &'static str, cause: impl Into<String>) -> Self {
        Self::new(ErrorKind::PermanentIo, op, cause)
    }

    pub fn circuit_open(op: &'static str) -> Self {
        Self::new(ErrorKind::CircuitOpen, op, "circuit breaker is open")
    }

    pub fn cache(op: &'static str, cause: impl Into<String>) -> Self {
        Self::new(ErrorKind::CacheError, op, cause)
    }

    pub fn storage_conflict(op: &'static str, cause: impl Into<String>) -> Self {
        Self::new(ErrorKind::StorageConflict, op, cause)
    }

    pub fn storage(op: &'static str, cause: impl Into<String>) -> Self {
        Self::new(ErrorKind::StorageError, op, cause)
    }

    pub fn deadline_exceeded(op: &'static str) -> Self {
        Self::new(ErrorKind::DeadlineExceeded, op, "deadline exceeded")
    }

    pub fn internal(op: &'static str, cause: impl Into<String>) -> Self {
        Self::new(ErrorKind::InternalError, op, cause)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed during {}: {}", self.kind, self.op, self.cause)
    }
}

impl std::error::Error for AppError {}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                AppError::storage_conflict("store", db_err.to_string())
            }
            _ => AppError::storage("store", err.to_string()),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::validation("deserialize", err.to_string())
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(err: serde_yaml::Error) -> Self {
        AppError::config("parse_yaml", err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::transient_io("io", err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            AppError::transient_io("http", err.to_string())
        } else if let Some(status) = err.status() {
            if status.is_server_error() || status.as_u16() == 408 || status.as_u16() == 429 {
                AppError::transient_io("http", err.to_string())
            } else {
                AppError::permanent_io("http", err.to_string())
            }
        } else {
            AppError::transient_io("http", err.to_string())
        }
    }
}

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        AppError::cache("redis", err.to_string())
    }
}

impl From<hyper::Error> for AppError {
    fn from(err: hyper::Error) -> Self {
        AppError::transient_io("http_server", err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self.kind {
            ErrorKind::ValidationError => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::AuthError => StatusCode::UNAUTHORIZED,
            ErrorKind::StorageConflict => StatusCode::CONFLICT,
            ErrorKind::CircuitOpen | ErrorKind::DeadlineExceeded => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::ConfigError | ErrorKind::InternalError | ErrorKind::StorageError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ErrorKind::TransientIo | ErrorKind::PermanentIo | ErrorKind::CacheError => {
                StatusCode::BAD_GATEWAY
            }
        };

        let body = serde_json::json!({
            "error": self.kind.to_string(),
            "op": self.op,
            "cause": self.cause,
            "retryable": self.retryable,
        });

        (status, axum::Json(body)).into_response()
    }
}

pub type AppResult<T> = std::result::Result<T, AppError>;
