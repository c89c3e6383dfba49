//! Anthropic OAuth Proxy
//!
//! Single-binary Rust service that multiplexes `/v1/*` Anthropic API
//! traffic across a pool of OAuth-authenticated accounts, session-
//! pinning each client to one account and failing over to the next
//! eligible candidate on a transient or quota error.

mod config;
mod error;
mod metrics;
mod pipeline;
mod provider_impl;
mod routes;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use anthropic_auth::OAuthManager;
use anthropic_pool::Pool;
use config::Config;
use metrics_exporter_prometheus::PrometheusHandle;
use persistence_queue::AsyncWriter;
use provider::Provider;
use provider_impl::AnthropicOAuthProvider;
use storage::{AccountStore, RequestLog, RequestRecord};

/// Shared application state reachable from every handler.
#[derive(Clone)]
pub struct AppState {
    pub pool: Arc<Pool>,
    pub store: Arc<AccountStore>,
    pub oauth: Arc<OAuthManager>,
    pub provider: Arc<dyn Provider>,
    pub http_client: reqwest::Client,
    pub writer: AsyncWriter,
    pub request_log: Arc<RequestLog>,
    pub log_tx: tokio::sync::broadcast::Sender<RequestRecord>,
    pub config: Arc<Config>,
    pub started_at: Instant,
    pub metrics_handle: PrometheusHandle,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting anthropic-oauth-proxy");

    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        port = config.port,
        lb_strategy = %config.lb_strategy,
        session_duration_ms = config.session_duration_ms,
        db_path = %config.db_path,
        "configuration loaded"
    );

    let metrics_handle = metrics::install_recorder();

    let store = Arc::new(
        AccountStore::open(&config.db_path, config.db_retry_policy())
            .await
            .with_context(|| format!("failed to open store at {}", config.db_path))?,
    );

    let http_client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(config.upstream_connect_timeout_secs))
        .build()
        .context("failed to build http client")?;

    let oauth = Arc::new(OAuthManager::new(Arc::clone(&store), http_client.clone()));
    let pool = Arc::new(Pool::new(Arc::clone(&store), Arc::clone(&oauth), config.session_duration_ms));
    let (writer, writer_handle) = AsyncWriter::spawn(Arc::clone(&store));
    let request_log = Arc::new(RequestLog::new(config.request_log_capacity));
    let (log_tx, _rx) = tokio::sync::broadcast::channel(config.request_log_capacity.max(1));
    let provider: Arc<dyn Provider> = Arc::new(AnthropicOAuthProvider::new());
    let config = Arc::new(config);

    let app_state = AppState {
        pool,
        store: Arc::clone(&store),
        oauth,
        provider,
        http_client,
        writer: writer.clone(),
        request_log,
        log_tx,
        config: Arc::clone(&config),
        started_at: Instant::now(),
        metrics_handle,
    };

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/v1/{*path}", axum::routing::any(pipeline::handle))
        .merge(routes::router())
        .with_state(app_state);

    let listener = TcpListener::bind(config.listen_addr())
        .await
        .with_context(|| format!("failed to bind to {}", config.listen_addr()))?;

    info!(addr = %config.listen_addr(), "listening");

    let drain_deadline = Duration::from_secs(config.shutdown_drain_secs);

    // The signal that stops accepting new connections is delivered to the
    // server task over a watch channel rather than awaited inline, so the
    // drain deadline below can start counting the moment it fires instead
    // of whenever axum's internal graceful-shutdown future happens to
    // resolve.
    let (stop_accepting_tx, mut stop_accepting_rx) = tokio::sync::watch::channel(false);
    let server_task = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = stop_accepting_rx.changed().await;
            })
            .await
    });

    let abort_handle = server_task.abort_handle();

    shutdown_signal().await;
    info!("stopped accepting connections, draining in-flight requests");
    let _ = stop_accepting_tx.send(true);

    match tokio::time::timeout(drain_deadline, server_task).await {
        Ok(Ok(result)) => result.context("server error")?,
        Ok(Err(join_err)) if join_err.is_cancelled() => {}
        Ok(Err(join_err)) => return Err(join_err).context("server task panicked"),
        Err(_) => {
            warn!(
                deadline_secs = config.shutdown_drain_secs,
                "drain deadline exceeded, aborting in-flight upstream requests"
            );
            abort_handle.abort();
        }
    }

    info!("draining async writer");
    writer.close();
    persistence_queue::await_drain(writer_handle, drain_deadline).await;

    info!("shutdown complete");
    Ok(())
}

async fn metrics_handler(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> impl axum::response::IntoResponse {
    state.metrics_handle.render()
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
