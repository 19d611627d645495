//! API error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    /// The server rejected the presented token (HTTP 401).
    #[error("unauthorized")]
    Unauthorized,

    /// Transport-level failure (connect, TLS, timeout, body read).
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success HTTP status other than 401.
    #[error("unexpected status {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    /// Response body was not valid JSON for the expected shape.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Response parsed as JSON but was missing required content.
    #[error("malformed response: {0}")]
    Parse(String),
}

impl ApiError {
    /// Whether this error means the presented token was rejected.
    #[inline]
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized)
    }

    /// Whether this error is plausibly transient (network or server-side).
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(_) => true,
            Self::Status { status, .. } => status.is_server_error(),
            _ => false,
        }
    }
}
