//! Core session token types.

use std::time::Duration;

use base64::Engine as _;
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Errors from token shape validation.
///
/// Tokens are opaque; validation is non-emptiness and basic shape only.
/// Deep validation happens by attempting real use.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("session token is empty")]
    EmptySessionToken,

    #[error("session token contains non-token characters")]
    MalformedSessionToken,

    #[error("refresh token is empty")]
    EmptyRefreshToken,

    #[error("refresh token is not a three-segment signed token")]
    MalformedRefreshToken,
}

/// An immutable session/refresh token pair.
///
/// A pair is replaced wholesale, never mutated field by field; readers hold
/// `Arc<TokenPair>` snapshots, so a half-updated pair can never be observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub session_token: String,
    /// Estimated expiry: the API reports none, so this is acceptance time
    /// plus the configured session TTL.
    pub session_expiry: DateTime<Utc>,
    pub refresh_token: String,
    /// Parsed from the refresh token's `exp` claim; `None` when the token
    /// carries no parseable expiry (then it is validated only by use).
    pub refresh_expiry: Option<DateTime<Utc>>,
}

impl TokenPair {
    /// Build a pair from raw token strings, validating shape.
    pub fn new(
        session_token: impl Into<String>,
        refresh_token: impl Into<String>,
        session_ttl: Duration,
    ) -> Result<Self, TokenError> {
        let session_token = session_token.into();
        let refresh_token = refresh_token.into();
        validate_session_token(&session_token)?;
        validate_refresh_token(&refresh_token)?;

        let refresh_expiry = refresh_token_expiry(&refresh_token);
        Ok(Self {
            session_token,
            session_expiry: expiry_after(session_ttl),
            refresh_token,
            refresh_expiry,
        })
    }

    /// Whether the session token still has more than `margin` left before
    /// its estimated expiry.
    pub fn session_fresh(&self, margin: Duration) -> bool {
        let remaining = self.session_expiry.signed_duration_since(Utc::now());
        remaining > chrono::Duration::from_std(margin).unwrap_or_else(|_| chrono::Duration::zero())
    }

    /// Whether the session token is still within its hard (estimated)
    /// expiry and may be used optimistically.
    #[inline]
    pub fn session_usable(&self) -> bool {
        Utc::now() < self.session_expiry
    }

    /// Whether the refresh token is known-expired locally.
    #[inline]
    pub fn refresh_expired(&self) -> bool {
        matches!(self.refresh_expiry, Some(expiry) if expiry <= Utc::now())
    }
}

/// Session lifecycle state, exposed to observers via a watch channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Current token pair believed valid.
    Ready,
    /// A refresh call is in flight; concurrent callers share its outcome.
    Refreshing,
    /// Last refresh failed transiently; the session token is used
    /// optimistically until the next attempt.
    Degraded,
    /// The refresh token was rejected; terminal until new tokens are
    /// supplied externally.
    ReauthRequired,
}

impl LifecycleState {
    #[inline]
    pub fn is_reauth_required(&self) -> bool {
        matches!(self, Self::ReauthRequired)
    }
}

pub(crate) fn expiry_after(ttl: Duration) -> DateTime<Utc> {
    Utc::now() + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::hours(1))
}

/// Session tokens are URL-safe base64-like opaque strings.
pub fn validate_session_token(token: &str) -> Result<(), TokenError> {
    if token.is_empty() {
        return Err(TokenError::EmptySessionToken);
    }
    if !token
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '=' | '+' | '/'))
    {
        return Err(TokenError::MalformedSessionToken);
    }
    Ok(())
}

/// Refresh tokens resemble a signed token: three dot-separated base64url
/// segments.
pub fn validate_refresh_token(token: &str) -> Result<(), TokenError> {
    if token.is_empty() {
        return Err(TokenError::EmptyRefreshToken);
    }
    let segments: Vec<&str> = token.split('.').collect();
    let segment_ok = |s: &&str| {
        !s.is_empty()
            && s.chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '='))
    };
    if segments.len() != 3 || !segments.iter().all(segment_ok) {
        return Err(TokenError::MalformedRefreshToken);
    }
    Ok(())
}

/// Decode the claims segment of a signed token. Best effort; signature is
/// never checked here; the server is the authority.
fn token_claims(token: &str) -> Option<Value> {
    let payload = token.split('.').nth(1)?;
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Extract the `exp` claim of a refresh token as a timestamp.
pub fn refresh_token_expiry(token: &str) -> Option<DateTime<Utc>> {
    let exp = token_claims(token)?.get("exp")?.as_i64()?;
    Utc.timestamp_opt(exp, 0).single()
}

/// Extract the `sub` claim of a refresh token, used as the account key for
/// persisted tokens.
pub fn refresh_token_subject(token: &str) -> Option<String> {
    token_claims(token)?
        .get("sub")?
        .as_str()
        .map(str::to_string)
}
