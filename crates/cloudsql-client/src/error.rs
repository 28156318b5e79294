//! Cloud SQL client errors

use thiserror::Error;

/// Errors that can occur when interacting with the Cloud SQL Admin API
#[derive(Debug, Error)]
pub enum CloudSqlError {
    /// HTTP request/response error (connection refused, timeout, ...)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Cloud SQL API returned an error (429, 5xx and anything not mapped below)
    #[error("Cloud SQL API error: {0}")]
    Api(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Authentication failed (invalid or expired token, missing permissions)
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// The request conflicts with the current state of the resource
    /// (e.g. the instance is already being deleted or another operation is running)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Invalid request (e.g., missing required fields)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The bearer token could not be read
    #[error("Failed to read access token: {0}")]
    Token(#[from] std::io::Error),
}

impl CloudSqlError {
    /// Whether the error reports a missing resource.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Whether the error reports a conflicting request.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}
