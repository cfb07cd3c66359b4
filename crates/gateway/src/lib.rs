//! HTTP gateway for Weft.
//!
//! Exposes the turn orchestrator over HTTP: a health check and
//! `POST /v1/generate`, which answers either with one JSON document or
//! with a server-sent event stream.
//!
//! Built on Axum.

pub mod api_v1;

use axum::extract::DefaultBodyLimit;
use axum::{Router, http::StatusCode, response::Json, routing::get};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

use weft_agent::TurnOrchestrator;
use weft_config::AppConfig;
use weft_core::{ApprovalMode, ModelStreamSource};

/// Shared application state for the gateway.
pub struct GatewayState {
    pub orchestrator: Arc<TurnOrchestrator>,
    /// Approval mode every gateway invocation runs under.
    pub approval: ApprovalMode,
}

pub type SharedState = Arc<GatewayState>;

impl GatewayState {
    pub fn new(orchestrator: TurnOrchestrator, approval: ApprovalMode) -> SharedState {
        Arc::new(Self {
            orchestrator: Arc::new(orchestrator),
            approval,
        })
    }
}

/// Build the Axum router with all gateway routes.
///
/// Layers applied:
/// - CORS limited to same-origin callers
/// - Request body size limit (1 MB)
/// - HTTP trace logging
pub fn build_router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
        .allow_headers([axum::http::header::CONTENT_TYPE])
        .max_age(std::time::Duration::from_secs(3600));

    Router::new()
        .route("/healthz", get(health_handler))
        .nest("/v1", api_v1::v1_router())
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Build the orchestrator a gateway serves from configuration and a model source.
pub fn orchestrator_from_config(config: &AppConfig, source: Arc<dyn ModelStreamSource>) -> TurnOrchestrator {
    let tools = weft_tools::default_registry(&config.tools.allowed_roots);
    TurnOrchestrator::new(source, Arc::new(tools))
        .with_max_turns(config.agent.max_turns)
        .with_default_approval(config.agent.approval_mode)
}

/// Start the gateway against the configured OpenAI-compatible endpoint.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let source = weft_providers::OpenAiCompatSource::from_config(&config.model)?;
    start_with_source(config, Arc::new(source)).await
}

/// Start the gateway with an explicit model source.
pub async fn start_with_source(
    config: AppConfig,
    source: Arc<dyn ModelStreamSource>,
) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    let source_name = source.name().to_string();

    let orchestrator = orchestrator_from_config(&config, source);
    let app = build_router(GatewayState::new(orchestrator, config.gateway.approval_mode));

    info!(addr = %addr, source = %source_name, approval = ?config.gateway.approval_mode, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> (StatusCode, Json<HealthResponse>) {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
        }),
    )
}
