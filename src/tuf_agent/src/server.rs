use crate::config::AgentConfig;
use crate::engine::TrustEngine;
use crate::error::{AgentError, Result};
use crate::fetcher::build_http_client;
use crate::location::LocationResolver;
use crate::refresh::{Refresher, TufAgent, TufLayout};
use crate::store::{ConfigStore, TomlFileStore};
use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;

#[derive(Clone)]
pub struct AppState {
    pub agent: Arc<TufAgent>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/targets", get(get_targets))
        .route("/root", get(get_root))
        .route("/targets/update/", post(update_targets))
        .with_state(state)
}

/// Assemble the agent from configuration: shared client, config store,
/// resolver and orchestrator.
pub fn build_agent(config: &AgentConfig, engine: Arc<dyn TrustEngine>) -> Result<TufAgent> {
    config.validate()?;
    let client = build_http_client(&config.http)?;
    let store: Arc<dyn ConfigStore> = Arc::new(TomlFileStore::new(&config.tuf.sota_config));
    let resolver = LocationResolver::new(
        config.control_plane.config_url.clone(),
        store,
        config.tuf.tag_key.clone(),
    );
    let refresher = Refresher::new(
        engine,
        client,
        config.tuf.tag_header.clone(),
        TufLayout::from_config(config),
        config.refresh.concurrent,
    )
    .with_fetch_timeout(config.fetch_timeout());
    Ok(TufAgent::new(resolver, refresher))
}

/// Start the control API with the given configuration and trust engine.
///
/// Fails when the trusted root is missing: the agent cannot bootstrap trust
/// without it. A failed startup refresh is logged and the server still starts.
pub async fn start_server(
    config: AgentConfig,
    engine: Arc<dyn TrustEngine>,
) -> Result<tokio::task::JoinHandle<()>> {
    let root_path = config.tuf.root_path();
    if let Err(source) = tokio::fs::metadata(&root_path).await {
        error!(path = %root_path.display(), "Trusted root is missing, refusing to start");
        return Err(AgentError::RootBootstrap {
            path: root_path.display().to_string(),
            source,
        });
    }

    let agent = Arc::new(build_agent(&config, engine)?);

    if config.refresh.on_startup {
        if let Err(e) = agent.refresh_from(None).await {
            tracing::warn!(error = %e, "Startup refresh failed, serving without trusted metadata");
        }
    }

    let addr = format!("{}:{}", config.server.bind_address, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| AgentError::Config(format!("Failed to bind control API to {}: {}", addr, e)))?;
    tracing::info!("Control API listening on {}", addr);

    let app = build_router(AppState { agent });
    Ok(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Control API server error: {}", e);
        } else {
            tracing::info!("Control API stopped");
        }
    }))
}

async fn health() -> impl IntoResponse {
    tracing::debug!("GET /health - Health check request");
    (StatusCode::OK, "ok")
}

fn indented_json<T: Serialize>(value: &T) -> Response {
    match serde_json::to_string_pretty(value) {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to serialize response");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// GET /targets
async fn get_targets(State(state): State<AppState>) -> Response {
    indented_json(&state.agent.targets())
}

/// GET /root
async fn get_root(State(state): State<AppState>) -> Response {
    // `null` until a refresh has succeeded
    indented_json(&state.agent.root())
}

#[derive(Debug, Deserialize)]
struct UpdateParams {
    #[serde(rename = "localTufRepo", default)]
    local_tuf_repo: Option<String>,
}

/// POST /targets/update/?localTufRepo=<path>
async fn update_targets(
    State(state): State<AppState>,
    Query(params): Query<UpdateParams>,
) -> Response {
    let local = params.local_tuf_repo.unwrap_or_default();
    tracing::info!(local_tuf_repo = %local, "UpdateTargets begin");

    // Detached so a client disconnect cannot cancel a refresh midway
    let agent = state.agent.clone();
    let attempt = tokio::spawn(async move { agent.refresh_from(Some(&local)).await });

    let response = match attempt.await {
        Ok(Ok(_)) => StatusCode::OK.into_response(),
        Ok(Err(e)) => (StatusCode::BAD_REQUEST, format!("TUF error: {}", e)).into_response(),
        Err(e) => {
            error!(error = %e, "Refresh task failed");
            (StatusCode::INTERNAL_SERVER_ERROR, format!("refresh task failed: {}", e))
                .into_response()
        }
    };

    tracing::info!("UpdateTargets end");
    response
}
