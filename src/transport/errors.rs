//! Transport Error Types
//!
//! Structured errors for image downloads.
//! Maps HTTP status codes to specific variants for retry decisions.

/// Image fetch error types
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Rate limited, try again after backoff")]
    RateLimited,

    #[error("Server error ({0}): {1}")]
    Server(u16, String),

    #[error("Unexpected HTTP status {0}: {1}")]
    Status(u16, String),

    #[error("Request timeout")]
    Timeout,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Response is not an image (content type {0})")]
    NotAnImage(String),
}

impl FetchError {
    /// Whether this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::RateLimited
                | FetchError::Timeout
                | FetchError::Network(_)
                | FetchError::Server(_, _)
        )
    }

    /// Create a FetchError from an HTTP status code and response body
    pub fn from_status(status: u16, body: &str) -> Self {
        match status {
            403 => FetchError::Forbidden(body.to_string()),
            404 | 410 => FetchError::NotFound(body.to_string()),
            408 => FetchError::Timeout,
            429 => FetchError::RateLimited,
            500..=599 => FetchError::Server(status, body.to_string()),
            _ => FetchError::Status(status, body.to_string()),
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else if err.is_builder() {
            FetchError::InvalidUrl(err.to_string())
        } else {
            FetchError::Network(err.to_string())
        }
    }
}
