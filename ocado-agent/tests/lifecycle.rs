//! End-to-end lifecycle tests over fake collaborators: a fake auth server
//! that mints tokens and fake resource endpoints that honor only the
//! server's currently valid session token.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use ocado_agent::poll::{CycleError, FetchError, PollCoordinator, ResourceFetcher};
use ocado_agent::session::{
    AuthClient, AuthError, LifecycleState, MemorySink, RefreshedSession, SessionConfig,
    SessionManager, TokenPair, TokenSink,
};

#[derive(Default)]
struct ServerState {
    /// The session token the server currently accepts.
    valid: Mutex<Option<String>>,
    minted: AtomicUsize,
    refresh_calls: AtomicUsize,
    reject_refresh: Mutex<bool>,
}

/// Fake remote API: one auth endpoint plus token-checking resources.
#[derive(Clone)]
struct FakeServer {
    state: Arc<ServerState>,
}

impl FakeServer {
    fn new(initial_token: &str) -> Self {
        let state = ServerState::default();
        *state.valid.lock() = Some(initial_token.to_string());
        Self {
            state: Arc::new(state),
        }
    }

    fn refresh_calls(&self) -> usize {
        self.state.refresh_calls.load(Ordering::SeqCst)
    }

    /// Server-side session invalidation: the current token stops working
    /// and only a refresh mints a usable one.
    fn revoke_session(&self) {
        *self.state.valid.lock() = None;
    }

    fn set_reject_refresh(&self, reject: bool) {
        *self.state.reject_refresh.lock() = reject;
    }

    /// Out-of-band re-login: the user supplied a new pair and the server
    /// accepts its session token.
    fn accept_session(&self, token: &str) {
        *self.state.valid.lock() = Some(token.to_string());
    }

    fn fetchers(&self, ids: &[&'static str]) -> Vec<Arc<dyn ResourceFetcher<String>>> {
        ids.iter()
            .map(|id| {
                Arc::new(FakeResource {
                    id,
                    server: self.clone(),
                }) as Arc<dyn ResourceFetcher<String>>
            })
            .collect()
    }
}

#[async_trait]
impl AuthClient for FakeServer {
    async fn refresh(&self, _refresh_token: &str) -> Result<RefreshedSession, AuthError> {
        self.state.refresh_calls.fetch_add(1, Ordering::SeqCst);
        if *self.state.reject_refresh.lock() {
            return Err(AuthError::Rejected("refresh token revoked".to_string()));
        }
        let n = self.state.minted.fetch_add(1, Ordering::SeqCst) + 1;
        let token = format!("s{n}");
        *self.state.valid.lock() = Some(token.clone());
        Ok(RefreshedSession {
            session_token: token,
            refresh_token: None,
        })
    }
}

struct FakeResource {
    id: &'static str,
    server: FakeServer,
}

#[async_trait]
impl ResourceFetcher<String> for FakeResource {
    fn resource_id(&self) -> &'static str {
        self.id
    }

    async fn fetch(&self, session_token: &str) -> Result<String, FetchError> {
        match &*self.server.state.valid.lock() {
            Some(valid) if valid == session_token => Ok(format!("{}@{}", self.id, session_token)),
            _ => Err(FetchError::Unauthorized),
        }
    }
}

fn pair(session: &str, expires_in_secs: i64) -> TokenPair {
    TokenPair {
        session_token: session.to_string(),
        session_expiry: Utc::now() + chrono::Duration::seconds(expires_in_secs),
        refresh_token: "header.claims.sig".to_string(),
        refresh_expiry: None,
    }
}

fn manager_for(server: &FakeServer, initial: TokenPair) -> Arc<SessionManager<FakeServer>> {
    Arc::new(SessionManager::new(
        server.clone(),
        initial,
        Arc::new(MemorySink::new()),
        "acct-1",
        SessionConfig::default(),
    ))
}

#[tokio::test]
async fn reactive_refresh_recovers_from_server_side_revocation() {
    let server = FakeServer::new("s0");
    let manager = manager_for(&server, pair("s0", 3600));
    let coordinator = PollCoordinator::new(
        manager.clone(),
        server.fetchers(&["cart", "orders", "user"]),
        Duration::from_secs(600),
    );

    // Healthy cycle: no refresh needed.
    let results = coordinator.run_cycle().await.unwrap();
    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(server.refresh_calls(), 0);

    // The server silently invalidates the session; the token's true expiry
    // is only discoverable through 401s.
    server.revoke_session();

    let results = coordinator.run_cycle().await.unwrap();
    assert_eq!(server.refresh_calls(), 1);
    assert!(results.iter().all(|r| r.is_ok()));
    for result in &results {
        assert!(result.outcome.as_ref().unwrap().ends_with("@s1"));
    }
    assert_eq!(manager.state(), LifecycleState::Ready);
}

#[tokio::test]
async fn rejected_refresh_parks_polling_until_new_tokens_arrive() {
    let server = FakeServer::new("s0");
    let manager = manager_for(&server, pair("s0", 3600));
    let coordinator = PollCoordinator::new(
        manager.clone(),
        server.fetchers(&["cart"]),
        Duration::from_secs(600),
    );

    // Session and refresh token both die server-side.
    server.revoke_session();
    server.set_reject_refresh(true);

    // The cycle itself completes with per-resource failures (the reactive
    // refresh was rejected mid-cycle)...
    let results = coordinator.run_cycle().await.unwrap();
    assert!(results.iter().all(|r| !r.is_ok()));
    assert_eq!(manager.state(), LifecycleState::ReauthRequired);

    // ...and every later cycle short-circuits without touching the network.
    assert!(matches!(
        coordinator.run_cycle().await,
        Err(CycleError::ReauthRequired)
    ));
    assert_eq!(server.refresh_calls(), 1);

    // Out-of-band re-login supplies a fresh pair.
    server.set_reject_refresh(false);
    server.accept_session("s9");
    manager.install("s9", "header.claims.sig").await.unwrap();
    assert_eq!(manager.state(), LifecycleState::Ready);

    let results = coordinator.run_cycle().await.unwrap();
    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(server.refresh_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn background_tasks_poll_and_refresh_until_cancelled() {
    let server = FakeServer::new("s0");
    let sink = Arc::new(MemorySink::new());
    // Session already inside its proactive margin at startup.
    let manager = Arc::new(SessionManager::new(
        server.clone(),
        pair("s0", 60),
        sink.clone(),
        "acct-1",
        SessionConfig::default(),
    ));
    let coordinator = Arc::new(PollCoordinator::new(
        manager.clone(),
        server.fetchers(&["cart"]),
        Duration::from_secs(600),
    ));

    let cancel = CancellationToken::new();
    let refresh_task = manager.spawn_scheduled_refresh(cancel.clone());
    let poll_task = coordinator.spawn(cancel.clone());

    // The first poll cycle runs immediately and refreshes the stale
    // session on its way in; the rotation is persisted.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(server.refresh_calls(), 1);
    assert_eq!(
        coordinator.snapshot("cart").unwrap().data.as_deref(),
        Some("cart@s1")
    );
    assert_eq!(
        sink.load("acct-1").await.unwrap().unwrap().session_token,
        "s1"
    );

    // Hours later both loops are still alive and the session is warm.
    tokio::time::sleep(Duration::from_secs(2 * 3600)).await;
    assert!(coordinator.snapshot("cart").unwrap().last_error.is_none());

    cancel.cancel();
    refresh_task.await.unwrap();
    poll_task.await.unwrap();
}
