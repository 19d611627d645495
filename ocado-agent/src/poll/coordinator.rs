//! Poll coordinator.
//!
//! On a fixed interval, fetches every registered resource with a session
//! token obtained from the session manager. Resources fail independently;
//! a cycle is only abandoned wholesale when no session token can be
//! obtained at all.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::session::{AuthClient, AuthorizeError, SessionManager};

use super::types::{CycleError, FetchError, PollCycleResult, ResourceFetcher, ResourceSnapshot};

/// Default data poll cadence.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(600);

/// Periodic fetcher of all registered resources.
pub struct PollCoordinator<D, A: AuthClient> {
    session: Arc<SessionManager<A>>,
    fetchers: Vec<Arc<dyn ResourceFetcher<D>>>,
    poll_interval: Duration,
    snapshots: DashMap<&'static str, ResourceSnapshot<D>>,
}

impl<D, A> PollCoordinator<D, A>
where
    D: Clone + Send + Sync + 'static,
    A: AuthClient + 'static,
{
    pub fn new(
        session: Arc<SessionManager<A>>,
        fetchers: Vec<Arc<dyn ResourceFetcher<D>>>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            session,
            fetchers,
            poll_interval,
            snapshots: DashMap::new(),
        }
    }

    pub fn with_default_interval(
        session: Arc<SessionManager<A>>,
        fetchers: Vec<Arc<dyn ResourceFetcher<D>>>,
    ) -> Self {
        Self::new(session, fetchers, DEFAULT_POLL_INTERVAL)
    }

    /// Last known state of one resource.
    pub fn snapshot(&self, resource_id: &str) -> Option<ResourceSnapshot<D>> {
        self.snapshots.get(resource_id).map(|entry| entry.clone())
    }

    /// Last known state of every resource seen so far.
    pub fn snapshots(&self) -> HashMap<&'static str, ResourceSnapshot<D>> {
        self.snapshots
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect()
    }

    /// Run one poll cycle.
    ///
    /// All resources are fetched concurrently with one token. If any of
    /// them signal unauthorized, a single shared refresh is requested
    /// (once per cycle, not once per resource) and exactly those resources
    /// are retried once with the fresh token. Per-resource failures are
    /// recorded without affecting siblings.
    pub async fn run_cycle(&self) -> Result<Vec<PollCycleResult<D>>, CycleError> {
        let token = match self.session.authorize().await {
            Ok(token) => token,
            Err(AuthorizeError::ReauthRequired) => {
                warn!("skipping poll cycle: re-authentication required");
                return Err(CycleError::ReauthRequired);
            }
            Err(AuthorizeError::Degraded(reason)) => {
                return Err(CycleError::SessionUnavailable(reason));
            }
        };

        let first_pass = join_all(self.fetchers.iter().map(|fetcher| {
            let fetcher = fetcher.clone();
            let token = token.clone();
            async move {
                let outcome = fetcher.fetch(&token).await;
                (fetcher, outcome)
            }
        }))
        .await;

        let mut results = Vec::with_capacity(self.fetchers.len());
        let mut unauthorized = Vec::new();
        for (fetcher, outcome) in first_pass {
            match outcome {
                Ok(data) => results.push(PollCycleResult::ok(fetcher.resource_id(), data)),
                Err(FetchError::Unauthorized) => unauthorized.push(fetcher),
                Err(err) => {
                    warn!(resource = fetcher.resource_id(), error = %err, "resource fetch failed");
                    results.push(PollCycleResult::failed(fetcher.resource_id(), err.to_string()));
                }
            }
        }

        if !unauthorized.is_empty() {
            debug!(
                count = unauthorized.len(),
                "resources rejected the session token; requesting one shared refresh"
            );
            match self.session.report_unauthorized().await {
                Ok(fresh_token) => {
                    let retried = join_all(unauthorized.into_iter().map(|fetcher| {
                        let fresh_token = fresh_token.clone();
                        async move {
                            let outcome = fetcher.fetch(&fresh_token).await;
                            (fetcher, outcome)
                        }
                    }))
                    .await;

                    for (fetcher, outcome) in retried {
                        match outcome {
                            Ok(data) => {
                                results.push(PollCycleResult::ok(fetcher.resource_id(), data));
                            }
                            Err(err) => {
                                warn!(
                                    resource = fetcher.resource_id(),
                                    error = %err,
                                    "resource fetch failed after refresh retry"
                                );
                                results.push(PollCycleResult::failed(
                                    fetcher.resource_id(),
                                    err.to_string(),
                                ));
                            }
                        }
                    }
                }
                Err(err) => {
                    warn!(error = %err, "session refresh after unauthorized fetches failed");
                    for fetcher in unauthorized {
                        results.push(PollCycleResult::failed(
                            fetcher.resource_id(),
                            format!("unauthorized; refresh failed: {err}"),
                        ));
                    }
                }
            }
        }

        for result in &results {
            self.record(result);
        }
        Ok(results)
    }

    /// Fold a cycle result into the retained snapshot for its resource.
    fn record(&self, result: &PollCycleResult<D>) {
        let mut entry = self.snapshots.entry(result.resource_id).or_default();
        match &result.outcome {
            Ok(data) => {
                entry.data = Some(data.clone());
                entry.data_fetched_at = Some(result.fetched_at);
                entry.last_error = None;
            }
            // Keep the previous good data; only record the error.
            Err(err) => entry.last_error = Some(err.clone()),
        }
    }

    /// Spawn the self-driven poll loop. The first cycle runs immediately.
    pub fn spawn(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let coordinator = Arc::clone(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(coordinator.poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("poll loop shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        match coordinator.run_cycle().await {
                            Ok(results) => {
                                let failed = results.iter().filter(|r| !r.is_ok()).count();
                                info!(
                                    resources = results.len(),
                                    failed,
                                    "poll cycle complete"
                                );
                            }
                            Err(err) => warn!(error = %err, "poll cycle abandoned"),
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{
        AuthError, LifecycleState, MemorySink, RefreshedSession, SessionConfig, TokenPair,
    };
    use async_trait::async_trait;
    use chrono::Utc;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Auth fake that mints `s<N>` tokens and counts refresh calls.
    #[derive(Clone, Default)]
    struct CountingAuth {
        calls: Arc<AtomicUsize>,
        fail_with: Arc<Mutex<Option<AuthError>>>,
    }

    impl CountingAuth {
        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl crate::session::AuthClient for CountingAuth {
        async fn refresh(&self, _refresh_token: &str) -> Result<RefreshedSession, AuthError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(err) = self.fail_with.lock().clone() {
                return Err(err);
            }
            Ok(RefreshedSession {
                session_token: format!("s{n}"),
                refresh_token: None,
            })
        }
    }

    /// Fetcher fake: accepts a fixed set of tokens, counts calls.
    struct TokenCheckingFetcher {
        id: &'static str,
        accepted: Mutex<Vec<String>>,
        calls: AtomicUsize,
    }

    impl TokenCheckingFetcher {
        fn accepting(id: &'static str, tokens: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                id,
                accepted: Mutex::new(tokens.iter().map(|t| t.to_string()).collect()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ResourceFetcher<String> for TokenCheckingFetcher {
        fn resource_id(&self) -> &'static str {
            self.id
        }

        async fn fetch(&self, session_token: &str) -> Result<String, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.accepted.lock().iter().any(|t| t == session_token) {
                Ok(format!("{}:{}", self.id, session_token))
            } else {
                Err(FetchError::Unauthorized)
            }
        }
    }

    /// Fetcher fake that always fails with a non-auth error.
    struct BrokenFetcher;

    #[async_trait]
    impl ResourceFetcher<String> for BrokenFetcher {
        fn resource_id(&self) -> &'static str {
            "broken"
        }

        async fn fetch(&self, _session_token: &str) -> Result<String, FetchError> {
            Err(FetchError::Failed("boom".to_string()))
        }
    }

    fn fresh_pair(session: &str) -> TokenPair {
        TokenPair {
            session_token: session.to_string(),
            session_expiry: Utc::now() + chrono::Duration::hours(1),
            refresh_token: "a.b.c".to_string(),
            refresh_expiry: None,
        }
    }

    fn session_with(auth: CountingAuth, initial: TokenPair) -> Arc<SessionManager<CountingAuth>> {
        Arc::new(SessionManager::new(
            auth,
            initial,
            Arc::new(MemorySink::new()),
            "acct-1",
            SessionConfig::default(),
        ))
    }

    #[tokio::test]
    async fn test_unauthorized_resources_share_one_refresh_and_retry_once() {
        let auth = CountingAuth::default();
        let session = session_with(auth.clone(), fresh_pair("s0"));

        // Two resources reject s0 (their true expiry is server-side) but
        // accept the refreshed s1; three are fine with either token.
        let cart = TokenCheckingFetcher::accepting("cart", &["s1"]);
        let orders = TokenCheckingFetcher::accepting("orders", &["s1"]);
        let user = TokenCheckingFetcher::accepting("user", &["s0", "s1"]);
        let slot = TokenCheckingFetcher::accepting("next-slot", &["s0", "s1"]);
        let count = TokenCheckingFetcher::accepting("order-count", &["s0", "s1"]);

        let coordinator = PollCoordinator::new(
            session,
            vec![
                cart.clone(),
                orders.clone(),
                user.clone(),
                slot.clone(),
                count.clone(),
            ]
            .into_iter()
            .map(|f| f as Arc<dyn ResourceFetcher<String>>)
            .collect(),
            Duration::from_secs(600),
        );

        let results = coordinator.run_cycle().await.unwrap();

        // Exactly one shared refresh for the two unauthorized resources.
        assert_eq!(auth.calls(), 1);
        assert_eq!(cart.calls(), 2);
        assert_eq!(orders.calls(), 2);
        assert_eq!(user.calls(), 1);
        assert_eq!(slot.calls(), 1);
        assert_eq!(count.calls(), 1);

        // The retried fetches succeeded with the refreshed token.
        assert_eq!(results.len(), 5);
        assert!(results.iter().all(|r| r.is_ok()));
        let cart_result = results
            .iter()
            .find(|r| r.resource_id == "cart")
            .unwrap();
        assert_eq!(cart_result.outcome.as_deref(), Ok("cart:s1"));
    }

    #[tokio::test]
    async fn test_reauth_required_short_circuits_cycle() {
        let auth = CountingAuth::default();
        *auth.fail_with.lock() = Some(AuthError::Rejected("revoked".to_string()));

        // Expired session forces a refresh attempt, which is rejected.
        let mut pair = fresh_pair("s0");
        pair.session_expiry = Utc::now() - chrono::Duration::minutes(1);
        let session = session_with(auth.clone(), pair);

        let fetcher = TokenCheckingFetcher::accepting("cart", &["s0"]);
        let coordinator = PollCoordinator::new(
            session.clone(),
            vec![fetcher.clone() as Arc<dyn ResourceFetcher<String>>],
            Duration::from_secs(600),
        );

        assert!(matches!(
            coordinator.run_cycle().await,
            Err(CycleError::ReauthRequired)
        ));
        // No fetch was attempted.
        assert_eq!(fetcher.calls(), 0);
        assert_eq!(session.state(), LifecycleState::ReauthRequired);

        // Subsequent cycles stay short-circuited without further refresh calls.
        assert!(matches!(
            coordinator.run_cycle().await,
            Err(CycleError::ReauthRequired)
        ));
        assert_eq!(auth.calls(), 1);
    }

    #[tokio::test]
    async fn test_failed_resource_does_not_block_siblings() {
        let auth = CountingAuth::default();
        let session = session_with(auth.clone(), fresh_pair("s0"));

        let good = TokenCheckingFetcher::accepting("user", &["s0"]);
        let coordinator = PollCoordinator::new(
            session,
            vec![
                good.clone() as Arc<dyn ResourceFetcher<String>>,
                Arc::new(BrokenFetcher),
            ],
            Duration::from_secs(600),
        );

        let results = coordinator.run_cycle().await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(
            results
                .iter()
                .find(|r| r.resource_id == "user")
                .unwrap()
                .is_ok()
        );
        let broken = results.iter().find(|r| r.resource_id == "broken").unwrap();
        assert_eq!(broken.outcome, Err("boom".to_string()));
        // An ordinary failure never triggers a refresh.
        assert_eq!(auth.calls(), 0);
    }

    #[tokio::test]
    async fn test_snapshot_retains_last_good_data_across_failures() {
        let auth = CountingAuth::default();
        let session = session_with(auth.clone(), fresh_pair("s0"));

        let flaky = TokenCheckingFetcher::accepting("cart", &["s0"]);
        let coordinator = PollCoordinator::new(
            session,
            vec![flaky.clone() as Arc<dyn ResourceFetcher<String>>],
            Duration::from_secs(600),
        );

        // First cycle succeeds.
        coordinator.run_cycle().await.unwrap();
        let snapshot = coordinator.snapshot("cart").unwrap();
        assert_eq!(snapshot.data.as_deref(), Some("cart:s0"));
        assert!(snapshot.last_error.is_none());

        // Resource starts rejecting every token, so even the post-refresh
        // retry fails: previous data is retained, the error is recorded.
        flaky.accepted.lock().clear();
        coordinator.run_cycle().await.unwrap();

        let snapshot = coordinator.snapshot("cart").unwrap();
        assert_eq!(snapshot.data.as_deref(), Some("cart:s0"));
        assert!(snapshot.last_error.is_some());
    }
}
