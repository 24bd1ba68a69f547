//! HTTP gateway for Tellerline.
//!
//! Exposes the chatbot turn endpoint, a direct-answer endpoint and health
//! probes, and wires every subsystem together at startup.
//!
//! Built on Axum.

pub mod api_v1;

use axum::body::Body;
use axum::extract::DefaultBodyLimit;
use axum::http::Request;
use axum::{Router, response::Json, routing::get};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tellerline_agent::{OrchestratorSettings, TurnOrchestrator};
use tellerline_config::AppConfig;
use tellerline_core::event::EventBus;
use tellerline_memory::InMemoryStateStore;
use tellerline_tools::{BankApi, DisabledBankApi, HttpBankApi};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

/// Request bodies above this size are rejected.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Shared application state for the gateway.
pub struct GatewayState {
    pub orchestrator: Arc<TurnOrchestrator>,
    /// Root token; every request works on a child of it.
    pub shutdown: CancellationToken,
}

pub type SharedState = Arc<GatewayState>;

/// Build the full router: health probes plus the v1 API.
///
/// Layers applied:
/// - request body size limit (1 MB)
/// - HTTP trace logging with the request id on the span
/// - `x-request-id` taken from the request or generated, echoed back
pub fn build_router(state: SharedState) -> Router {
    let trace = TraceLayer::new_for_http().make_span_with(|req: &Request<Body>| {
        let request_id = req
            .headers()
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("-");
        tracing::info_span!(
            "request",
            method = %req.method(),
            path = %req.uri().path(),
            request_id = %request_id,
        )
    });

    Router::new()
        .route("/health/ready", get(ready_handler))
        .route("/health/live", get(live_handler))
        .nest("/v1", api_v1::v1_router(state))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(trace)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}

/// The bank API adapter named by config, or a disabled one when unset.
pub fn build_bank_api(config: &AppConfig) -> Result<Arc<dyn BankApi>, Box<dyn std::error::Error>> {
    match config.bank_api.base_url.as_deref().filter(|u| !u.trim().is_empty()) {
        Some(url) => Ok(Arc::new(HttpBankApi::new(url, config.bank_api.timeout())?)),
        None => {
            warn!("No bank API base URL configured, account lookups are disabled");
            Ok(Arc::new(DisabledBankApi))
        }
    }
}

/// Wire provider, store and tools into an orchestrator.
pub fn build_orchestrator(
    config: &AppConfig,
    store: Arc<InMemoryStateStore>,
    events: Arc<EventBus>,
) -> Result<TurnOrchestrator, Box<dyn std::error::Error>> {
    let provider = tellerline_providers::build_from_config(
        &config.provider,
        &config.retry,
        Some(events.clone()),
    )?;
    let registry = Arc::new(tellerline_tools::default_registry(
        build_bank_api(config)?,
        config.bank_info.clone(),
    ));
    info!(
        provider = %provider.name(),
        model = %config.provider.model,
        tools = registry.len(),
        "Orchestrator ready"
    );

    Ok(TurnOrchestrator::new(
        provider,
        store,
        registry,
        OrchestratorSettings::from_config(config),
    )
    .with_events(events))
}

/// Log every domain event at debug level until the bus closes.
pub fn spawn_event_logger(bus: &EventBus) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => debug!(event = ?event, "Domain event"),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event logger fell behind"),
                Err(RecvError::Closed) => break,
            }
        }
    })
}

/// Periodically drop expired conversations until `shutdown` fires.
fn spawn_state_janitor(
    store: Arc<InMemoryStateStore>,
    every: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every.max(Duration::from_secs(1)));
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let purged = store.purge_expired().await;
                    if purged > 0 {
                        debug!(purged, "Expired conversations dropped");
                    }
                }
            }
        }
    })
}

/// Start the gateway HTTP server.
///
/// Builds every subsystem once, serves until Ctrl-C, then cancels in-flight
/// turns and drains connections.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);

    let events = Arc::new(EventBus::default());
    let store = Arc::new(InMemoryStateStore::new(config.state.ttl()));
    let orchestrator = Arc::new(build_orchestrator(&config, store.clone(), events.clone())?);
    let shutdown = CancellationToken::new();

    let _logger = spawn_event_logger(&events);
    let _janitor = spawn_state_janitor(store, config.state.ttl(), shutdown.clone());

    let app = build_router(Arc::new(GatewayState {
        orchestrator,
        shutdown: shutdown.clone(),
    }));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "Gateway listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C");
        return;
    }
    info!("Shutdown requested, cancelling in-flight turns");
    shutdown.cancel();
}

// --- Handlers ---

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

async fn ready_handler() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn live_handler() -> Json<HealthResponse> {
    Json(HealthResponse { status: "alive" })
}
