//! Error and result taxonomy for the batching/upload core.

use std::fmt;
use thiserror::Error;

/// Errors raised by the `Storage`/`BatchManager` boundary.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("event payload of {size} bytes exceeds the {limit} byte cap")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors the `Uploader` can raise to its caller. Everything else is
/// recovered internally per the per-batch terminal-error table.
#[derive(Debug, Error)]
pub enum UploaderError {
    #[error("uploader was cancelled")]
    Cancelled,

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Status-carrying retryable error classes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryAbleError {
    /// A 4xx/5xx response other than the terminal ones below.
    ErrorRetry(Option<u16>),
    /// DNS failure / no connectivity.
    ErrorNetworkUnavailable,
    /// Socket or read timeout.
    ErrorTimeout,
    /// Any other transport fault.
    ErrorUnknown,
}

impl fmt::Display for RetryAbleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryAbleError::ErrorRetry(Some(status)) => write!(f, "retryable http status {status}"),
            RetryAbleError::ErrorRetry(None) => write!(f, "retryable error (no status)"),
            RetryAbleError::ErrorNetworkUnavailable => write!(f, "network unavailable"),
            RetryAbleError::ErrorTimeout => write!(f, "timeout"),
            RetryAbleError::ErrorUnknown => write!(f, "unknown transport error"),
        }
    }
}

/// Non-retryable error classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonRetryAbleError {
    Error400,
    Error401,
    Error404,
    Error413,
}

impl fmt::Display for NonRetryAbleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            NonRetryAbleError::Error400 => 400,
            NonRetryAbleError::Error401 => 401,
            NonRetryAbleError::Error404 => 404,
            NonRetryAbleError::Error413 => 413,
        };
        write!(f, "non-retryable http status {code}")
    }
}

/// The outcome of a single upload attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventUploadResult {
    Success(String),
    RetryAble(RetryAbleError),
    NonRetryAble(NonRetryAbleError),
}

impl EventUploadResult {
    /// Classify an HTTP status code into an upload result.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            200..=299 => EventUploadResult::Success(body),
            400 => EventUploadResult::NonRetryAble(NonRetryAbleError::Error400),
            401 => EventUploadResult::NonRetryAble(NonRetryAbleError::Error401),
            404 => EventUploadResult::NonRetryAble(NonRetryAbleError::Error404),
            413 => EventUploadResult::NonRetryAble(NonRetryAbleError::Error413),
            400..=599 => EventUploadResult::RetryAble(RetryAbleError::ErrorRetry(Some(status))),
            _ => EventUploadResult::RetryAble(RetryAbleError::ErrorUnknown),
        }
    }
}
