//! Session lifecycle management.
//!
//! Keeps exactly one valid API session alive indefinitely:
//!
//! - [`TokenPair`] / [`TokenStore`]: immutable token snapshots with
//!   compare-and-swap installs
//! - [`AuthClient`]: the privileged refresh call, pluggable for tests
//! - [`SessionManager`]: refresh policy (proactive margin, reactive
//!   failure reports, scheduled background refresh) with one coalesced
//!   in-flight refresh shared by all concurrent callers
//! - [`TokenSink`]: write-through persistence so rotations survive restarts

mod auth;
mod manager;
mod ocado;
mod sink;
mod store;
mod types;

pub use auth::{AuthClient, AuthError, RefreshedSession};
pub use manager::{AuthorizeError, SessionConfig, SessionManager};
pub use ocado::OcadoAuthClient;
pub use sink::{JsonFileSink, MemorySink, PersistedTokens, SinkError, TokenSink};
pub use store::TokenStore;
pub use types::{
    LifecycleState, TokenError, TokenPair, refresh_token_expiry, refresh_token_subject,
    validate_refresh_token, validate_session_token,
};
