//! # HTTP API
//!
//! Agent endpoints, session control, configuration and discovery.

pub mod agents;
pub mod sessions;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use copilot_core::error::CopilotError;
use copilot_core::swarm::CoordinatorConfig;
use serde::Serialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use utoipa::{OpenApi, ToSchema};

use crate::config::{provider_info, PersistedConfig, ProviderInfo};
use crate::AppState;

/// Error body, `{ "detail": message }`
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    pub detail: String,
}

/// A session-fatal error rendered as an HTTP response
#[derive(Debug)]
pub struct ApiError(CopilotError);

impl From<CopilotError> for ApiError {
    fn from(e: CopilotError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = if self.0.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            tracing::error!("request failed: {}", self.0);
            StatusCode::INTERNAL_SERVER_ERROR
        };
        (
            status,
            Json(ErrorBody {
                detail: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ConfigResponse {
    /// Contents of `.copilot/config.json`
    pub config: PersistedConfig,
    /// Configuration this process is running with (file + environment)
    #[schema(value_type = Object)]
    pub effective: CoordinatorConfig,
    pub providers: Vec<ProviderInfo>,
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "DSA Copilot API",
        version = "1.0.0",
        description = "Company matching, research and Digital Services Act classification agents"
    ),
    paths(
        agents::match_company,
        agents::match_company_stream,
        agents::research_company,
        agents::research_company_stream,
        agents::categorize_service,
        agents::categorize_service_stream,
        agents::chat,
        agents::chat_stream,
        sessions::list_sessions,
        sessions::get_session,
        sessions::cancel_session,
        get_config,
        update_config,
        health
    ),
    components(
        schemas(
            ErrorBody,
            ConfigResponse,
            PersistedConfig,
            ProviderInfo,
            agents::MatchBody,
            agents::ResearchBody,
            agents::ClassifyBody,
            agents::ChatBody,
            sessions::CancelResponse,
            crate::transport::SessionInfo
        )
    ),
    tags(
        (name = "agents", description = "Agent invocation, blocking or streamed"),
        (name = "sessions", description = "Live session control"),
        (name = "config", description = "Configuration management"),
        (name = "health", description = "Liveness")
    )
)]
pub struct ApiDoc;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .nest("/agents", agents::agent_routes())
        .nest("/api/v1/sessions", sessions::session_routes())
        .route("/api/v1/config", get(get_config).patch(update_config))
        .route("/api/v1/openapi.json", get(serve_openapi))
        .layer(cors())
        .with_state(state)
}

/// Any origin; the web client is served from a different port
fn cors() -> CorsLayer {
    CorsLayer::permissive()
}

/// Liveness check
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses((status = 200, description = "Service is up"))
)]
pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy" }))
}

async fn index() -> Json<serde_json::Value> {
    Json(json!({
        "name": "DSA Copilot",
        "endpoints": {
            "company_matcher": "/agents/company_matcher",
            "company_matcher_stream": "/agents/company_matcher/stream",
            "company_researcher": "/agents/company_researcher",
            "company_researcher_stream": "/agents/company_researcher/stream",
            "service_categorizer": "/agents/service_categorizer",
            "service_categorizer_stream": "/agents/service_categorizer/stream",
            "main_agent": "/agents/main_agent",
            "main_agent_stream": "/agents/main_agent/stream",
            "sessions": "/api/v1/sessions",
            "config": "/api/v1/config",
            "openapi": "/api/v1/openapi.json",
            "health": "/health"
        }
    }))
}

/// Get current configuration
#[utoipa::path(
    get,
    path = "/api/v1/config",
    tag = "config",
    responses(
        (status = 200, description = "Persisted and effective configuration", body = ConfigResponse)
    )
)]
pub async fn get_config(
    State(state): State<AppState>,
) -> Json<ConfigResponse> {
    Json(ConfigResponse {
        config: PersistedConfig::load().await,
        effective: state.coordinator.config().clone(),
        providers: provider_info(),
    })
}

/// Update the persisted configuration (partial merge, applied on restart)
#[utoipa::path(
    patch,
    path = "/api/v1/config",
    tag = "config",
    request_body = PersistedConfig,
    responses(
        (status = 200, description = "Updated configuration", body = ConfigResponse),
        (status = 400, description = "Configuration would not load", body = ErrorBody)
    )
)]
pub async fn update_config(
    State(state): State<AppState>,
    Json(updates): Json<PersistedConfig>,
) -> Result<Json<ConfigResponse>, ApiError> {
    let mut config = PersistedConfig::load().await;
    config.merge(updates);
    config
        .to_coordinator_config()
        .map_err(|e| CopilotError::InvalidInput(format!("{:#}", e)))?;
    config.save().await.map_err(CopilotError::from)?;
    tracing::info!("configuration saved; restart to apply");

    Ok(Json(ConfigResponse {
        config,
        effective: state.coordinator.config().clone(),
        providers: provider_info(),
    }))
}

async fn serve_openapi() -> impl IntoResponse {
    match ApiDoc::openapi().to_json() {
        Ok(spec) => ([(header::CONTENT_TYPE, "application/json")], spec).into_response(),
        Err(e) => ApiError(CopilotError::Internal(e.into())).into_response(),
    }
}
