use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use ocado_agent::config::AgentConfig;
use ocado_agent::logging;
use ocado_agent::poll::PollCoordinator;
use ocado_agent::resources;
use ocado_agent::session::{
    JsonFileSink, LifecycleState, MemorySink, OcadoAuthClient, SessionConfig, SessionManager,
    TokenPair, TokenSink, refresh_token_subject,
};
use ocado_api::{ClientOptions, OcadoClient};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AgentConfig::from_env()?;
    let _log_guard = logging::init(config.log_dir.as_deref())?;

    let mut client_options = ClientOptions::default();
    if let Some(base) = &config.api_base {
        client_options.base_url = base.clone();
    }
    client_options.timeout = config.http_timeout;
    let client = Arc::new(OcadoClient::with_options(client_options)?);

    // Persisted tokens are namespaced by account: explicit override, else
    // the refresh token's subject claim.
    let account = config
        .account
        .clone()
        .or_else(|| refresh_token_subject(&config.refresh_token))
        .unwrap_or_else(|| "primary".to_string());

    let sink: Arc<dyn TokenSink> = match &config.state_file {
        Some(path) => Arc::new(JsonFileSink::new(path.clone())),
        None => {
            warn!("OCADO_STATE_FILE not set; rotated tokens will not survive restarts");
            Arc::new(MemorySink::new())
        }
    };

    // Resume with the latest persisted pair when one exists; the configured
    // tokens are only the bootstrap.
    let configured_pair =
        || TokenPair::new(&config.session_token, &config.refresh_token, config.session_ttl);
    let initial = match sink.load(&account).await {
        Ok(Some(saved)) => {
            info!(%account, "resuming with persisted tokens");
            saved.into_pair()?
        }
        Ok(None) => configured_pair()?,
        Err(e) => {
            warn!(error = %e, "failed to read persisted tokens; using configured pair");
            configured_pair()?
        }
    };

    let manager = Arc::new(SessionManager::new(
        OcadoAuthClient::new(client.clone()),
        initial,
        sink,
        account.clone(),
        SessionConfig {
            proactive_margin: config.proactive_margin,
            refresh_interval: config.refresh_interval,
            session_ttl: config.session_ttl,
        },
    ));

    // Fail fast when the supplied credentials are dead on arrival.
    let token = manager
        .authorize()
        .await
        .context("no usable session; obtain a fresh token pair from the Ocado app")?;
    match client.current_user(&token).await {
        Ok(profile) => info!(username = %profile.username, %account, "authenticated"),
        Err(e) => warn!(error = %e, "startup profile check failed; continuing"),
    }

    let cancel = CancellationToken::new();
    let refresh_task = manager.spawn_scheduled_refresh(cancel.clone());

    let coordinator = Arc::new(PollCoordinator::new(
        manager.clone(),
        resources::default_fetchers(client),
        config.poll_interval,
    ));
    let poll_task = coordinator.spawn(cancel.clone());

    // Surface re-auth transitions prominently; this is the user's cue to
    // intercept a fresh token pair in the mobile app.
    let mut state_rx = manager.watch_state();
    let state_task = tokio::spawn(async move {
        while state_rx.changed().await.is_ok() {
            let state = *state_rx.borrow_and_update();
            if state == LifecycleState::ReauthRequired {
                error!(
                    "re-authentication required: set OCADO_SESSION_TOKEN/OCADO_REFRESH_TOKEN \
                     to a fresh pair and restart"
                );
            }
        }
    });

    info!(
        poll_interval_secs = config.poll_interval.as_secs(),
        refresh_interval_secs = config.refresh_interval.as_secs(),
        "ocado-agent running"
    );

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    cancel.cancel();
    let _ = refresh_task.await;
    let _ = poll_task.await;
    state_task.abort();

    Ok(())
}
