//! Token persistence abstraction.
//!
//! Refreshed tokens must survive process restarts, so every accepted
//! rotation is written through to a sink keyed by account. The sink is a
//! passive write target: it is read once at startup and is never the source
//! of truth while the process runs.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::types::{
    TokenError, TokenPair, refresh_token_expiry, validate_refresh_token, validate_session_token,
};

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("state file corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Durable form of a [`TokenPair`].
///
/// The refresh expiry is not stored; it is re-derived from the token's own
/// claims on load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedTokens {
    pub session_token: String,
    pub refresh_token: String,
    pub session_expiry: DateTime<Utc>,
}

impl PersistedTokens {
    /// Rebuild a validated [`TokenPair`], re-deriving the refresh expiry
    /// from the token's own claims.
    pub fn into_pair(self) -> Result<TokenPair, TokenError> {
        validate_session_token(&self.session_token)?;
        validate_refresh_token(&self.refresh_token)?;
        let refresh_expiry = refresh_token_expiry(&self.refresh_token);
        Ok(TokenPair {
            session_token: self.session_token,
            session_expiry: self.session_expiry,
            refresh_token: self.refresh_token,
            refresh_expiry,
        })
    }
}

impl From<&TokenPair> for PersistedTokens {
    fn from(pair: &TokenPair) -> Self {
        Self {
            session_token: pair.session_token.clone(),
            refresh_token: pair.refresh_token.clone(),
            session_expiry: pair.session_expiry,
        }
    }
}

#[async_trait]
pub trait TokenSink: Send + Sync {
    /// Persist the pair under `account`. Called after every accepted
    /// rotation, in install order.
    async fn persist(&self, account: &str, pair: &TokenPair) -> Result<(), SinkError>;

    /// Load the last persisted pair for `account`, if any.
    async fn load(&self, account: &str) -> Result<Option<PersistedTokens>, SinkError>;
}

/// JSON-file sink: one file holding a map of account key to tokens.
///
/// Writes go to a sibling temp file first and are renamed into place, so a
/// crash mid-write leaves the previous state intact.
pub struct JsonFileSink {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    async fn read_all(&self) -> Result<HashMap<String, PersistedTokens>, SinkError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl TokenSink for JsonFileSink {
    async fn persist(&self, account: &str, pair: &TokenPair) -> Result<(), SinkError> {
        let _guard = self.write_lock.lock().await;

        let mut entries = self.read_all().await?;
        entries.insert(account.to_string(), PersistedTokens::from(pair));

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(&entries)?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    async fn load(&self, account: &str) -> Result<Option<PersistedTokens>, SinkError> {
        Ok(self.read_all().await?.remove(account))
    }
}

/// In-memory sink for tests and for running without durable state.
#[derive(Default)]
pub struct MemorySink {
    entries: Mutex<HashMap<String, PersistedTokens>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenSink for MemorySink {
    async fn persist(&self, account: &str, pair: &TokenPair) -> Result<(), SinkError> {
        self.entries
            .lock()
            .insert(account.to_string(), PersistedTokens::from(pair));
        Ok(())
    }

    async fn load(&self, account: &str) -> Result<Option<PersistedTokens>, SinkError> {
        Ok(self.entries.lock().get(account).cloned())
    }
}
