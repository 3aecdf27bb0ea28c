//! Error types for workshop-dl
//!
//! This module provides error handling for the whole crate:
//! - The crate-level [`Error`] with submission-time failures
//! - [`JobError`], the terminal failure taxonomy for running jobs, each
//!   variant carrying a stable machine-readable code
//! - HTTP status mapping via [`ToHttpStatus`]
//! - The JSON [`ApiError`] response envelope

use crate::types::SecondFactorKind;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Result type alias for workshop-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for workshop-dl
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable description of the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "download_root")
        key: Option<String>,
    },

    /// Submitted URL does not contain a workshop item id
    #[error("invalid workshop URL: {0}")]
    InvalidUrl(String),

    /// Metadata scraper reported the item page as invalid
    #[error("invalid workshop item: {0}")]
    InvalidItem(String),

    /// Item belongs to a different application than the configured one
    #[error("item belongs to application {actual}, expected {expected}")]
    WrongApplication {
        /// The application id this service is configured for
        expected: u32,
        /// The application id reported by the item's metadata
        actual: u32,
    },

    /// Admission cap reached; the submission was rejected, not queued
    #[error("download capacity exhausted: {current} of {max} slots in use")]
    CapacityExhausted {
        /// Jobs currently occupying slots
        current: usize,
        /// Configured concurrency cap
        max: usize,
    },

    /// A job failed with a terminal reason
    #[error("job failed: {0}")]
    Job(#[from] JobError),

    /// Requested resource does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Shutdown in progress - not accepting new submissions
    #[error("shutdown in progress: not accepting new submissions")]
    ShuttingDown,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Metadata scraper HTTP error
    #[error("scraper error: {0}")]
    Scraper(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// API server error
    #[error("API server error: {0}")]
    ApiServerError(String),

    /// Any other unexpected condition
    #[error("internal error: {0}")]
    Internal(String),
}

/// Terminal failure reasons for a job.
///
/// Each variant maps to a stable code via [`JobError::code`]; the
/// orchestrator records that code as the job's `last_error` and callers
/// see it unchanged through the status endpoint.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum JobError {
    /// The steam client prompted for a second factor and no cached session exists
    #[error("second factor required ({kind})")]
    SecondFactorRequired {
        /// Which kind of code the client asked for
        kind: SecondFactorKind,
    },

    /// The saved session is no longer accepted and re-login also failed
    #[error("steam session expired")]
    SessionExpired,

    /// The account has no subscription or access to the item
    #[error("access to the item was denied")]
    AccessDenied,

    /// The item does not exist on the workshop
    #[error("item not found on the workshop")]
    ItemNotFound,

    /// A phase deadline elapsed after all retries
    #[error("timed out during {phase}")]
    Timeout {
        /// Which pipeline phase hit its deadline
        phase: String,
    },

    /// The steam client reported success but the expected content path is absent or empty
    #[error("no content found after download")]
    NoContent,

    /// Archive output fell under the minimum size floor
    #[error("archive too small: {size} bytes (floor {floor})")]
    ArchiveTooSmall {
        /// Produced archive size
        size: u64,
        /// Configured minimum
        floor: u64,
    },

    /// Archive output exceeded the configured cap
    #[error("archive too large: {size} bytes (cap {cap})")]
    ArchiveTooLarge {
        /// Produced archive size
        size: u64,
        /// Configured maximum
        cap: u64,
    },

    /// Retry-eligible failure that persisted through all attempts
    #[error("transient failure: {detail}")]
    Transient {
        /// Short free-form detail from the steam client output
        detail: String,
    },

    /// The job was cancelled externally
    #[error("job cancelled")]
    Cancelled,

    /// Any other unexpected condition
    #[error("internal job error: {detail}")]
    Internal {
        /// Free-form detail, never surfaced as a stack trace
        detail: String,
    },
}

impl JobError {
    /// Stable machine-readable code recorded as the job's `last_error`.
    pub fn code(&self) -> &'static str {
        match self {
            JobError::SecondFactorRequired { .. } => "second_factor_required",
            JobError::SessionExpired => "session_expired",
            JobError::AccessDenied => "access_denied",
            JobError::ItemNotFound => "not_found",
            JobError::Timeout { .. } => "timeout",
            JobError::NoContent => "no_content",
            JobError::ArchiveTooSmall { .. } => "archive_too_small",
            JobError::ArchiveTooLarge { .. } => "archive_too_large",
            JobError::Transient { .. } => "transient_failure",
            JobError::Cancelled => "cancelled",
            JobError::Internal { .. } => "internal_error",
        }
    }
}

/// API error response format
///
/// Returned by API endpoints when an error occurs: a machine-readable
/// code, a human-readable message, and optional structured details.
///
/// ```json
/// {
///   "error": {
///     "code": "capacity_exhausted",
///     "message": "download capacity exhausted: 3 of 3 slots in use",
///     "details": { "current": 3, "max": 3 }
///   }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    /// The error details
    pub error: ErrorDetail,
}

/// Detailed error information for API responses
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g., "invalid_url")
    pub code: String,

    /// Human-readable error message
    pub message: String,

    /// Optional additional context about the error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error with code and message
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }

    /// Create an API error with additional details
    pub fn with_details(
        code: impl Into<String>,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                details: Some(details),
            },
        }
    }

    /// Create a "not found" error
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::new("not_found", format!("{} not found", resource.into()))
    }

    /// Create an "unauthorized" error
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new("unauthorized", message)
    }

    /// Create an "internal server error"
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new("internal_error", message)
    }
}

/// Convert errors to HTTP status codes for API responses
pub trait ToHttpStatus {
    /// Get the HTTP status code for this error
    fn status_code(&self) -> u16;

    /// Get the machine-readable error code
    fn error_code(&self) -> &str;
}

impl ToHttpStatus for Error {
    fn status_code(&self) -> u16 {
        match self {
            // 400 Bad Request - submission validation failures
            Error::Config { .. } => 400,
            Error::InvalidUrl(_) => 400,
            Error::InvalidItem(_) => 400,
            Error::WrongApplication { .. } => 400,

            // 404 Not Found
            Error::NotFound(_) => 404,

            // 429 Too Many Requests - admission cap hit
            Error::CapacityExhausted { .. } => 429,

            // 502 Bad Gateway - external scraper failure
            Error::Scraper(_) => 502,

            // 503 Service Unavailable
            Error::ShuttingDown => 503,

            // 500 Internal Server Error - everything else
            Error::Job(_) => 500,
            Error::Io(_) => 500,
            Error::Serialization(_) => 500,
            Error::ApiServerError(_) => 500,
            Error::Internal(_) => 500,
        }
    }

    fn error_code(&self) -> &str {
        match self {
            Error::Config { .. } => "config_error",
            Error::InvalidUrl(_) => "invalid_url",
            Error::InvalidItem(_) => "invalid_item",
            Error::WrongApplication { .. } => "wrong_application",
            Error::CapacityExhausted { .. } => "capacity_exhausted",
            Error::Job(e) => e.code(),
            Error::NotFound(_) => "not_found",
            Error::ShuttingDown => "shutting_down",
            Error::Io(_) => "io_error",
            Error::Scraper(_) => "scraper_error",
            Error::Serialization(_) => "serialization_error",
            Error::ApiServerError(_) => "api_server_error",
            Error::Internal(_) => "internal_error",
        }
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        let code = error.error_code().to_string();
        let message = error.to_string();

        // Structured details for error kinds where callers act on the numbers
        let details = match &error {
            Error::CapacityExhausted { current, max } => Some(serde_json::json!({
                "current": current,
                "max": max,
            })),
            Error::WrongApplication { expected, actual } => Some(serde_json::json!({
                "expected_app_id": expected,
                "actual_app_id": actual,
            })),
            _ => None,
        };

        ApiError {
            error: ErrorDetail {
                code,
                message,
                details,
            },
        }
    }
}
