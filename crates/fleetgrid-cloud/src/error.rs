//! Cloud backend error types.

use reqwest::StatusCode;
use thiserror::Error;

/// Result type alias for cloud backend operations.
pub type CloudResult<T> = Result<T, CloudError>;

/// Errors a cloud backend can report.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CloudError {
    /// The provider could not be reached, timed out, or failed internally.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// The provider rejected the request parameters (image, flavor, quota).
    #[error("provisioning rejected: {0}")]
    Rejected(String),

    /// The referenced instance does not exist (already gone).
    #[error("instance not found: {0}")]
    NotFound(String),

    /// The operation is not valid for the member's current status.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The provider is not wired up.
    #[error("not implemented: {0}")]
    NotImplemented(String),
}

impl CloudError {
    /// Classify a non-success HTTP status from a provider API.
    pub fn from_status(status: StatusCode, context: &str, body: &str) -> Self {
        let detail = if body.is_empty() {
            format!("{context}: HTTP {status}")
        } else {
            format!("{context}: HTTP {status}: {body}")
        };
        match status.as_u16() {
            404 => CloudError::NotFound(detail),
            400 | 401 | 403 | 409 | 413 | 422 => CloudError::Rejected(detail),
            _ => CloudError::Unavailable(detail),
        }
    }
}

impl From<reqwest::Error> for CloudError {
    fn from(e: reqwest::Error) -> Self {
        CloudError::Unavailable(e.to_string())
    }
}
