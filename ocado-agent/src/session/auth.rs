//! Auth client abstraction.
//!
//! Implementations perform the privileged refresh call and nothing else;
//! scheduling, serialization, and retry policy are the session manager's
//! concern.

use async_trait::async_trait;
use thiserror::Error;

/// Classified refresh failure. Every non-success outcome is exactly one of
/// these two kinds; implementations must not swallow the distinction.
#[derive(Debug, Clone, Error)]
pub enum AuthError {
    /// The refresh token was rejected (expired or revoked). Never retried;
    /// escalates to re-authentication.
    #[error("refresh token rejected: {0}")]
    Rejected(String),

    /// Network, timeout, or server-side failure. Retryable.
    #[error("transient refresh failure: {0}")]
    Transient(String),
}

/// A successfully minted session.
#[derive(Debug, Clone)]
pub struct RefreshedSession {
    pub session_token: String,
    /// Present when the server rotated the refresh token alongside the
    /// session token; the rotation is applied atomically as one pair.
    pub refresh_token: Option<String>,
}

/// Performs the refresh network call.
#[async_trait]
pub trait AuthClient: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshedSession, AuthError>;
}
