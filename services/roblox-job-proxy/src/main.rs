//! Roblox job-id proxy
//!
//! Single-binary service that:
//! 1. Hands out joinable public-server job ids per place from a pre-filled pool
//! 2. Replenishes each pool from the paginated Roblox games API in the background
//! 3. Forwards allow-listed Roblox web API calls with a browser user agent
//! 4. Exposes health and Prometheus metrics

mod config;
mod error;
mod jobs;
mod metrics;
mod proxy;
mod service;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::Router;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, Request};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use job_pool::{JobPool, spawn_sweep_task};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use upstream::{PageSource, RobloxClient};

use crate::config::Config;
use crate::jobs::NextJobQuery;
use crate::proxy::ProxyState;
use crate::service::{DRAIN_TIMEOUT, ServiceMetrics, build_http_client};

/// Shared application state accessible from all handlers
#[derive(Clone)]
struct AppState {
    pool: Arc<JobPool>,
    proxy: ProxyState,
    metrics: ServiceMetrics,
    prometheus: PrometheusHandle,
    default_place_id: Option<String>,
}

/// Build the axum router with all routes and shared state.
///
/// Static routes win over the pass-through pattern, so `/jobs/next` is never
/// forwarded upstream.
fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/jobs/next", get(next_job_handler))
        .route("/{subdomain}/{*path}", any(passthrough_handler))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

fn request_id() -> String {
    format!("req_{}", uuid::Uuid::new_v4().as_simple())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting roblox-job-proxy");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle = metrics::install_recorder();

    // CLI: simple --config flag parsing
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

    let settings = config.pool_settings();
    info!(
        listen_addr = %config.server.listen_addr,
        games_url = %config.upstream.games_url,
        default_place_id = config.server.default_place_id.as_deref().unwrap_or("-"),
        outbound_proxy = config.server.proxy_url.is_some(),
        target_size = settings.target_size,
        strategies = settings.strategies.len(),
        "configuration loaded"
    );

    let http_client = build_http_client(config.server.proxy_url.as_ref())
        .context("failed to build outbound HTTP client")?;

    let source: Arc<dyn PageSource> = Arc::new(RobloxClient::new(
        http_client.clone(),
        config.client_config(),
    ));
    let pool = JobPool::new(settings, source);
    let sweep = spawn_sweep_task(&pool);

    let metrics = ServiceMetrics::new();
    let app_state = AppState {
        pool: Arc::clone(&pool),
        proxy: ProxyState {
            client: http_client,
            target_url: config.server.passthrough_url.clone(),
            timeout: Duration::from_secs(config.server.timeout_secs),
        },
        metrics: metrics.clone(),
        prometheus: prometheus_handle,
        default_place_id: config.server.default_place_id.clone(),
    };

    let app = build_router(app_state, config.server.max_connections);

    let listen_addr = config.server.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "accepting requests");

    // Clone in_flight counter for drain observability after shutdown
    let in_flight = metrics.in_flight.clone();

    // The drain deadline starts at signal receipt: notify the server to stop
    // accepting, then race the drain against DRAIN_TIMEOUT.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => {
            info!("all in-flight requests drained");
        }
        Ok(Ok(Err(e))) => {
            error!(error = %e, "server error during shutdown");
        }
        Ok(Err(e)) => {
            error!(error = %e, "server task panicked");
        }
        Err(_) => {
            let remaining = in_flight.load(Ordering::Relaxed);
            warn!(
                remaining,
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
        }
    }

    sweep.shutdown().await;

    info!("shutdown complete");
    Ok(())
}

async fn root_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({ "status": "ok", "message": "Proxy is running" }))
}

/// Uptime, request counters and a summary of the job pool.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = state.metrics.started_at.elapsed().as_secs();
    let requests = state.metrics.requests_total.load(Ordering::Relaxed);
    let errors = state.metrics.errors_total.load(Ordering::Relaxed);
    let pool = state.pool.summary().await;

    axum::Json(serde_json::json!({
        "status": "healthy",
        "uptime_seconds": uptime,
        "requests_served": requests,
        "errors_total": errors,
        "pool": pool,
    }))
}

/// Prometheus metrics endpoint, text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        axum::http::StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

async fn next_job_handler(
    State(state): State<AppState>,
    Query(query): Query<NextJobQuery>,
    headers: HeaderMap,
) -> Response {
    let _guard = state.metrics.begin_request();
    let start = Instant::now();

    let place_id = query.resolve_place_id(state.default_place_id.as_deref());
    let caller = jobs::caller_identity(&headers, &query);
    let response = jobs::next_job(&state.pool, place_id, caller, request_id()).await;

    finish_request(&state.metrics, &response, "GET", "jobs", start);
    response
}

async fn passthrough_handler(
    State(state): State<AppState>,
    Path((subdomain, path)): Path<(String, String)>,
    request: Request<Body>,
) -> Response {
    let _guard = state.metrics.begin_request();
    let start = Instant::now();
    let method = request.method().to_string();

    let response = proxy::forward(&state.proxy, &subdomain, &path, request, request_id()).await;

    finish_request(&state.metrics, &response, &method, "passthrough", start);
    response
}

fn finish_request(
    metrics: &ServiceMetrics,
    response: &Response,
    method: &str,
    route: &'static str,
    start: Instant,
) {
    let status = response.status();
    if status.is_server_error() {
        metrics.record_error();
    }
    let duration_secs = start.elapsed().as_secs_f64();
    metrics::record_request(status.as_u16(), method, route, duration_secs);
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
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
