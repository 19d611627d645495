//! Poll cycle types.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Failure of a single resource fetch.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// The resource endpoint rejected the session token.
    #[error("unauthorized")]
    Unauthorized,

    /// Any other failure; recorded against the resource only.
    #[error("{0}")]
    Failed(String),
}

/// One remote resource the coordinator polls.
///
/// Generic over the produced data type so the concrete remote API can be
/// swapped without touching the polling logic.
#[async_trait]
pub trait ResourceFetcher<D>: Send + Sync {
    /// Stable identifier keying results and snapshots.
    fn resource_id(&self) -> &'static str;

    async fn fetch(&self, session_token: &str) -> Result<D, FetchError>;
}

/// Outcome of one resource within one poll cycle.
#[derive(Debug, Clone)]
pub struct PollCycleResult<D> {
    pub resource_id: &'static str,
    pub outcome: Result<D, String>,
    pub fetched_at: DateTime<Utc>,
}

impl<D> PollCycleResult<D> {
    pub(crate) fn ok(resource_id: &'static str, data: D) -> Self {
        Self {
            resource_id,
            outcome: Ok(data),
            fetched_at: Utc::now(),
        }
    }

    pub(crate) fn failed(resource_id: &'static str, error: String) -> Self {
        Self {
            resource_id,
            outcome: Err(error),
            fetched_at: Utc::now(),
        }
    }

    #[inline]
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Cycle-level failure: no session token was available, so no fetch was
/// attempted at all.
#[derive(Debug, Clone, Error)]
pub enum CycleError {
    /// The refresh token is dead; polling is pointless until new tokens
    /// are supplied.
    #[error("re-authentication required")]
    ReauthRequired,

    /// No usable session token this cycle; retried on the next tick.
    #[error("no usable session token: {0}")]
    SessionUnavailable(String),
}

/// Last known state of a resource, retained across failed cycles so
/// consumers keep seeing the previous good data instead of a blank.
#[derive(Debug, Clone)]
pub struct ResourceSnapshot<D> {
    /// Most recent successfully fetched data.
    pub data: Option<D>,
    /// When `data` was fetched.
    pub data_fetched_at: Option<DateTime<Utc>>,
    /// Error recorded by the most recent cycle, cleared on success.
    pub last_error: Option<String>,
}

impl<D> Default for ResourceSnapshot<D> {
    fn default() -> Self {
        Self {
            data: None,
            data_fetched_at: None,
            last_error: None,
        }
    }
}
