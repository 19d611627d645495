//! Session lifecycle manager.
//!
//! Owns the token store and runs the refresh policy:
//! - proactive: refresh when the session token is inside its expiry margin
//! - reactive: refresh when a consumer reports an authorization failure
//! - scheduled: a background task keeps the session warm on a fixed cadence
//!
//! Concurrent refresh requests coalesce onto a single in-flight network
//! call through a shared once-cell; every attached caller observes that
//! call's one outcome.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{OnceCell, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::auth::{AuthClient, AuthError};
use super::sink::TokenSink;
use super::store::TokenStore;
use super::types::{LifecycleState, TokenError, TokenPair, expiry_after};

/// Default proactive refresh margin before estimated session expiry.
const DEFAULT_PROACTIVE_MARGIN: Duration = Duration::from_secs(600);
/// Default scheduled refresh cadence.
const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(3600);
/// Default estimated session token lifetime.
const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(3600);

/// Refresh policy knobs.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Refresh proactively once less than this much of the session token's
    /// estimated lifetime remains.
    pub proactive_margin: Duration,
    /// Cadence of the scheduled background refresh check.
    pub refresh_interval: Duration,
    /// Estimated lifetime assigned to newly minted session tokens.
    pub session_ttl: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            proactive_margin: DEFAULT_PROACTIVE_MARGIN,
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            session_ttl: DEFAULT_SESSION_TTL,
        }
    }
}

/// Why `authorize()` could not produce a session token.
#[derive(Debug, Clone, Error)]
pub enum AuthorizeError {
    /// The refresh token is dead; a new pair must be supplied externally.
    /// Terminal until [`SessionManager::install`] is called.
    #[error("re-authentication required")]
    ReauthRequired,

    /// The refresh attempt failed transiently and the current session token
    /// is past its hard expiry. Retryable.
    #[error("session unavailable: {0}")]
    Degraded(String),
}

/// Shared result of one coalesced refresh attempt.
#[derive(Debug, Clone)]
enum RefreshOutcome {
    /// A pair is installed and current (either freshly minted here, or
    /// installed by a concurrent winner).
    Installed(Arc<TokenPair>),
    /// Transient failure; the previous pair is still within hard expiry
    /// and is returned optimistically.
    StaleUsable(Arc<TokenPair>),
    /// Transient failure with nothing usable to hand out.
    Failed(String),
    /// The refresh token was rejected.
    Rejected(String),
}

/// What prompted a refresh, for logging.
#[derive(Debug, Clone, Copy)]
enum RefreshTrigger {
    /// Session token inside its expiry margin (or a scheduled check found
    /// it so).
    Proactive,
    /// A consumer's call was rejected with the token we handed out.
    Reactive,
}

type RefreshCell = Arc<OnceCell<RefreshOutcome>>;

/// Credential lifecycle manager.
///
/// All consumers obtain session tokens through [`authorize`]; any consumer
/// whose downstream call is rejected reports back through
/// [`report_unauthorized`]. Both paths funnel into one coalesced refresh.
///
/// [`authorize`]: SessionManager::authorize
/// [`report_unauthorized`]: SessionManager::report_unauthorized
pub struct SessionManager<A: AuthClient> {
    auth: A,
    store: TokenStore,
    sink: Arc<dyn TokenSink>,
    /// Account key namespacing persisted tokens.
    account: String,
    config: SessionConfig,
    state_tx: watch::Sender<LifecycleState>,
    /// Pending refresh shared by concurrent callers; cleared once resolved.
    in_flight: Mutex<Option<RefreshCell>>,
}

impl<A: AuthClient> SessionManager<A> {
    pub fn new(
        auth: A,
        initial: TokenPair,
        sink: Arc<dyn TokenSink>,
        account: impl Into<String>,
        config: SessionConfig,
    ) -> Self {
        let (state_tx, _) = watch::channel(LifecycleState::Ready);
        Self {
            auth,
            store: TokenStore::new(initial),
            sink,
            account: account.into(),
            config,
            state_tx,
            in_flight: Mutex::new(None),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        *self.state_tx.borrow()
    }

    /// Watch lifecycle state transitions. A transition into
    /// `ReauthRequired` is the signal to request new tokens from the user.
    pub fn watch_state(&self) -> watch::Receiver<LifecycleState> {
        self.state_tx.subscribe()
    }

    /// Snapshot of the current token pair.
    pub fn current_tokens(&self) -> Arc<TokenPair> {
        self.store.current()
    }

    /// Watch token pair rotations (read-only observers).
    pub fn watch_tokens(&self) -> watch::Receiver<Arc<TokenPair>> {
        self.store.subscribe()
    }

    /// Obtain a valid session token, refreshing first if needed.
    ///
    /// Concurrent calls that all observe an expiring token coalesce into a
    /// single refresh network call and share its outcome.
    pub async fn authorize(&self) -> Result<String, AuthorizeError> {
        if self.state().is_reauth_required() {
            return Err(AuthorizeError::ReauthRequired);
        }

        let pair = self.store.current();
        if pair.refresh_expired() {
            warn!("refresh token expired; re-authentication required");
            self.set_state(LifecycleState::ReauthRequired);
            return Err(AuthorizeError::ReauthRequired);
        }

        if pair.session_fresh(self.config.proactive_margin) {
            return Ok(pair.session_token.clone());
        }

        let outcome = self.refresh_shared(pair, RefreshTrigger::Proactive).await;
        Self::token_from_outcome(outcome)
    }

    /// Reactive path: a downstream call using a token we handed out was
    /// rejected. Forces a refresh, bypassing the expiry-margin check, with
    /// the same coalescing as [`authorize`](Self::authorize): if a refresh
    /// is already in flight this attaches to it.
    pub async fn report_unauthorized(&self) -> Result<String, AuthorizeError> {
        if self.state().is_reauth_required() {
            return Err(AuthorizeError::ReauthRequired);
        }

        let pair = self.store.current();
        if pair.refresh_expired() {
            self.set_state(LifecycleState::ReauthRequired);
            return Err(AuthorizeError::ReauthRequired);
        }

        debug!("authorization failure reported; forcing refresh");
        let outcome = self.refresh_shared(pair, RefreshTrigger::Reactive).await;
        Self::token_from_outcome(outcome)
    }

    /// Supply a brand-new token pair obtained out of band. Resets a
    /// `ReauthRequired` session back to `Ready`.
    pub async fn install(
        &self,
        session_token: &str,
        refresh_token: &str,
    ) -> Result<Arc<TokenPair>, TokenError> {
        let pair = TokenPair::new(session_token, refresh_token, self.config.session_ttl)?;
        let installed = self.store.replace(pair);
        if let Err(e) = self.sink.persist(&self.account, &installed).await {
            warn!(error = %e, "failed to persist installed tokens (non-fatal)");
        }
        self.set_state(LifecycleState::Ready);
        info!("new token pair installed");
        Ok(installed)
    }

    /// Run one coalesced refresh. The first caller creates the pending
    /// cell; everyone else attaches and awaits the same outcome. The cell
    /// is cleared once resolved so the next expiry starts a new flight.
    async fn refresh_shared(
        &self,
        observed: Arc<TokenPair>,
        trigger: RefreshTrigger,
    ) -> RefreshOutcome {
        let cell: RefreshCell = {
            let mut slot = self.in_flight.lock();
            match &*slot {
                Some(cell) => cell.clone(),
                None => {
                    let cell: RefreshCell = Arc::new(OnceCell::new());
                    *slot = Some(cell.clone());
                    cell
                }
            }
        };

        let outcome = cell
            .get_or_init(|| self.perform_refresh(observed, trigger))
            .await
            .clone();

        // Every attached caller races to clear; only the matching cell is
        // removed, so a newer flight is never dropped.
        {
            let mut slot = self.in_flight.lock();
            if slot.as_ref().is_some_and(|current| Arc::ptr_eq(current, &cell)) {
                *slot = None;
            }
        }

        outcome
    }

    /// The single refresh network call behind the coalescing cell.
    async fn perform_refresh(
        &self,
        observed: Arc<TokenPair>,
        trigger: RefreshTrigger,
    ) -> RefreshOutcome {
        // Double-check: if the pair advanced since the caller decided a
        // refresh was needed, that rotation already resolved this request.
        let current = self.store.current();
        if !Arc::ptr_eq(&current, &observed) {
            debug!("token pair already rotated; skipping refresh call");
            return RefreshOutcome::Installed(current);
        }

        debug!(?trigger, "refreshing session token");
        self.set_state(LifecycleState::Refreshing);

        match self.auth.refresh(&current.refresh_token).await {
            Ok(refreshed) => {
                let next = TokenPair {
                    session_token: refreshed.session_token,
                    session_expiry: expiry_after(self.config.session_ttl),
                    refresh_token: refreshed
                        .refresh_token
                        .clone()
                        .unwrap_or_else(|| current.refresh_token.clone()),
                    refresh_expiry: match refreshed.refresh_token.as_deref() {
                        Some(rotated) => super::types::refresh_token_expiry(rotated),
                        None => current.refresh_expiry,
                    },
                };

                match self.store.swap(&current, next) {
                    Ok(installed) => {
                        if let Err(e) = self.sink.persist(&self.account, &installed).await {
                            warn!(error = %e, "failed to persist rotated tokens (non-fatal)");
                        }
                        self.set_state(LifecycleState::Ready);
                        info!(?trigger, "session token refreshed");
                        RefreshOutcome::Installed(installed)
                    }
                    Err(winner) => {
                        // Lost the swap race: a concurrent rotation landed
                        // first. Discard our result rather than double-apply.
                        debug!("concurrent rotation won; discarding refresh result");
                        self.set_state(LifecycleState::Ready);
                        RefreshOutcome::Installed(winner)
                    }
                }
            }
            Err(AuthError::Rejected(reason)) => {
                error!(%reason, "refresh token rejected; re-authentication required");
                self.set_state(LifecycleState::ReauthRequired);
                RefreshOutcome::Rejected(reason)
            }
            Err(AuthError::Transient(reason)) => {
                warn!(%reason, "session refresh failed; will retry on schedule");
                self.set_state(LifecycleState::Degraded);
                if current.session_usable() {
                    RefreshOutcome::StaleUsable(current)
                } else {
                    RefreshOutcome::Failed(reason)
                }
            }
        }
    }

    fn token_from_outcome(outcome: RefreshOutcome) -> Result<String, AuthorizeError> {
        match outcome {
            RefreshOutcome::Installed(pair) | RefreshOutcome::StaleUsable(pair) => {
                Ok(pair.session_token.clone())
            }
            RefreshOutcome::Failed(reason) => Err(AuthorizeError::Degraded(reason)),
            RefreshOutcome::Rejected(_) => Err(AuthorizeError::ReauthRequired),
        }
    }

    fn set_state(&self, next: LifecycleState) {
        self.state_tx.send_if_modified(|state| {
            if *state == next {
                false
            } else {
                debug!(from = ?state, to = ?next, "lifecycle state changed");
                *state = next;
                true
            }
        });
    }
}

impl<A: AuthClient + 'static> SessionManager<A> {
    /// Spawn the scheduled refresh task.
    ///
    /// Runs the same check-and-refresh path as `authorize()` on a fixed
    /// cadence regardless of consumer activity, so the session stays warm
    /// with no active pollers. No failure stops the schedule; a degraded
    /// session keeps being retried every tick until it recovers or turns
    /// into `ReauthRequired`.
    pub fn spawn_scheduled_refresh(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let manager = Arc::clone(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(manager.config.refresh_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; tokens were just supplied.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("scheduled refresh task shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        match manager.authorize().await {
                            Ok(_) => debug!("scheduled session check passed"),
                            Err(AuthorizeError::ReauthRequired) => {
                                warn!("scheduled check: re-authentication required; waiting for new tokens");
                            }
                            Err(AuthorizeError::Degraded(reason)) => {
                                warn!(%reason, "scheduled refresh failed; retrying next tick");
                            }
                        }
                    }
                }
            }
        })
    }
}
