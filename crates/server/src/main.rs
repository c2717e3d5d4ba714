mod api;

use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use axum::routing::get;
use context_sync::{
    BridgeBackend, Coordinator, CopilotConfig, EventBroadcaster, HttpSummarizer,
    MessageWindowSelector, RequestServices, SessionEvent, SessionLifecycleManager,
};
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use api::{AppState, create_status_router, websocket_handler};

const CONFIG_PATH: &str = "copilot.toml";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing()?;

    info!("starting convo copilot server");
    info!(path = CONFIG_PATH, "loading copilot config");
    let config = CopilotConfig::from_file(CONFIG_PATH)
        .with_context(|| format!("failed to load copilot config from {CONFIG_PATH}"))?;

    let lifecycle = SessionLifecycleManager::new(
        Arc::new(BridgeBackend::new(config.session.clone())),
        config.session.clone(),
        EventBroadcaster::new(config.coordinator.event_buffer_size),
    );
    let selector = MessageWindowSelector::new(
        Arc::clone(&lifecycle),
        config.window.policy().context("invalid [window] config")?,
    );
    let summarizer =
        HttpSummarizer::new(&config.summarizer).context("failed to build summarizer client")?;
    if config.summarizer.endpoint.is_none() {
        warn!("no summarizer endpoint configured, summarize and ask requests will fail");
    }
    let services = Arc::new(RequestServices::new(
        Arc::clone(&lifecycle),
        selector,
        Arc::new(summarizer),
    ));
    let coordinator = Coordinator::spawn(&config.coordinator, lifecycle.clone(), services);

    let session_log = tokio::spawn(log_session_events(Arc::clone(&lifecycle)));
    let starter = Arc::clone(&lifecycle);
    let max_retries = config.session.max_retries;
    tokio::spawn(async move {
        if let Err(err) = starter.start(max_retries).await {
            error!(error = %err, "backing session failed to start");
        }
    });

    let state = Arc::new(AppState::new(coordinator.handle()));
    let app = Router::new()
        .route("/contexts", get(websocket_handler))
        .merge(create_status_router())
        .with_state(state)
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.server.bind))?;
    info!(bind = %config.server.bind, "server is ready, press Ctrl+C to shut down");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("shutdown signal received, stopping server");
    coordinator.shutdown().await;
    if let Err(err) = lifecycle.shutdown().await {
        warn!(error = %err, "backing session did not shut down cleanly");
    }
    session_log.abort();

    info!("server shutdown complete");
    Ok(())
}

async fn log_session_events(lifecycle: Arc<SessionLifecycleManager>) {
    let mut events = lifecycle.subscribe();
    while let Some(event) = events.next().await {
        match event {
            SessionEvent::PhaseChanged { from, to, message } => {
                info!(from = ?from, to = ?to, message = %message, "session phase changed");
            }
            SessionEvent::CredentialIssued => info!("scan code available"),
            SessionEvent::Loading { percent, message } => {
                info!(percent, message = %message, "session loading");
            }
        }
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
    }
}

fn init_tracing() -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;

    tracing_subscriber::fmt().with_env_filter(env_filter).init();
    Ok(())
}
