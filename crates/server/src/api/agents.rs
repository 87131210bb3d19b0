//! # Agent API
//!
//! One blocking and one streaming endpoint per agent kind. Blocking calls
//! return the terminal payload; streaming calls return the session feed as
//! server-sent events.

use std::convert::Infallible;

use axum::{
    extract::State,
    response::sse::{Event, Sse},
    routing::post,
    Json, Router,
};
use copilot_core::skills::artifact_registry::CompanyProfile;
use copilot_core::skills::{ChatRequest, MatchRequest};
use copilot_core::swarm::{AgentOutput, AgentRequest};
use futures::stream::Stream;
use serde::Deserialize;
use utoipa::ToSchema;

use super::{ApiError, ErrorBody};
use crate::transport;
use crate::AppState;

#[derive(Debug, Deserialize, ToSchema)]
pub struct MatchBody {
    #[serde(default)]
    pub company_name: String,
    #[serde(default)]
    pub country_of_establishment: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ResearchBody {
    #[serde(default)]
    pub company_name: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ClassifyBody {
    /// `{company_name, facts: [{section, question, answer, source?}]}`
    #[schema(value_type = Object)]
    pub company_profile: CompanyProfile,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ChatBody {
    #[serde(default)]
    pub message: String,
    /// Free text describing what the user is looking at
    #[serde(default)]
    pub frontend_context: Option<String>,
}

impl From<MatchBody> for AgentRequest {
    fn from(body: MatchBody) -> Self {
        AgentRequest::MatchCompany(MatchRequest {
            company_name: body.company_name,
            country_of_establishment: body.country_of_establishment,
        })
    }
}

impl From<ResearchBody> for AgentRequest {
    fn from(body: ResearchBody) -> Self {
        AgentRequest::ResearchCompany {
            company_name: body.company_name,
        }
    }
}

impl From<ClassifyBody> for AgentRequest {
    fn from(body: ClassifyBody) -> Self {
        AgentRequest::Classify {
            company_profile: body.company_profile,
        }
    }
}

impl From<ChatBody> for AgentRequest {
    fn from(body: ChatBody) -> Self {
        AgentRequest::Chat(ChatRequest {
            message: body.message,
            frontend_context: body.frontend_context,
        })
    }
}

pub fn agent_routes() -> Router<AppState> {
    Router::new()
        .route("/company_matcher", post(match_company))
        .route("/company_matcher/stream", post(match_company_stream))
        .route("/company_researcher", post(research_company))
        .route("/company_researcher/stream", post(research_company_stream))
        .route("/service_categorizer", post(categorize_service))
        .route("/service_categorizer/stream", post(categorize_service_stream))
        .route("/main_agent", post(chat))
        .route("/main_agent/stream", post(chat_stream))
}

async fn invoke(state: &AppState, request: AgentRequest) -> Result<Json<AgentOutput>, ApiError> {
    Ok(Json(state.coordinator.invoke(request).await?))
}

/// Validate, then open a session whose lifetime is tied to the response body
fn open_stream(
    state: &AppState,
    request: AgentRequest,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>> + Send>, ApiError> {
    request.validate()?;
    let (session, events) = state.coordinator.start(request);
    tracing::info!(session = %session.id, agent = %session.kind, "streaming session opened");
    let guard = state.sessions.register(session);
    Ok(transport::sse(events, guard))
}

/// Resolve a company name to its legal entity
#[utoipa::path(
    post,
    path = "/agents/company_matcher",
    tag = "agents",
    request_body = MatchBody,
    responses(
        (status = 200, description = "CompanyMatchResult"),
        (status = 400, description = "Missing input", body = ErrorBody),
        (status = 500, description = "Agent failure", body = ErrorBody)
    )
)]
pub async fn match_company(
    State(state): State<AppState>,
    Json(body): Json<MatchBody>,
) -> Result<Json<AgentOutput>, ApiError> {
    invoke(&state, body.into()).await
}

/// Entity resolution as an event feed
#[utoipa::path(
    post,
    path = "/agents/company_matcher/stream",
    tag = "agents",
    request_body = MatchBody,
    responses(
        (status = 200, description = "Server-sent StreamEvents", body = String, content_type = "text/event-stream"),
        (status = 400, description = "Missing input", body = ErrorBody)
    )
)]
pub async fn match_company_stream(
    State(state): State<AppState>,
    Json(body): Json<MatchBody>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>> + Send>, ApiError> {
    open_stream(&state, body.into())
}

/// Answer the research question table for a company
#[utoipa::path(
    post,
    path = "/agents/company_researcher",
    tag = "agents",
    request_body = ResearchBody,
    responses(
        (status = 200, description = "ResearchReport"),
        (status = 400, description = "Missing input", body = ErrorBody),
        (status = 500, description = "Agent failure", body = ErrorBody)
    )
)]
pub async fn research_company(
    State(state): State<AppState>,
    Json(body): Json<ResearchBody>,
) -> Result<Json<AgentOutput>, ApiError> {
    invoke(&state, body.into()).await
}

/// Parallel research as an event feed
#[utoipa::path(
    post,
    path = "/agents/company_researcher/stream",
    tag = "agents",
    request_body = ResearchBody,
    responses(
        (status = 200, description = "Server-sent StreamEvents", body = String, content_type = "text/event-stream"),
        (status = 400, description = "Missing input", body = ErrorBody)
    )
)]
pub async fn research_company_stream(
    State(state): State<AppState>,
    Json(body): Json<ResearchBody>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>> + Send>, ApiError> {
    open_stream(&state, body.into())
}

/// Classify a company profile and analyze its obligations
#[utoipa::path(
    post,
    path = "/agents/service_categorizer",
    tag = "agents",
    request_body = ClassifyBody,
    responses(
        (status = 200, description = "ComplianceReport"),
        (status = 400, description = "Missing input", body = ErrorBody),
        (status = 500, description = "Classification failed", body = ErrorBody)
    )
)]
pub async fn categorize_service(
    State(state): State<AppState>,
    Json(body): Json<ClassifyBody>,
) -> Result<Json<AgentOutput>, ApiError> {
    invoke(&state, body.into()).await
}

/// Classification and obligation analysis as an event feed
#[utoipa::path(
    post,
    path = "/agents/service_categorizer/stream",
    tag = "agents",
    request_body = ClassifyBody,
    responses(
        (status = 200, description = "Server-sent StreamEvents", body = String, content_type = "text/event-stream"),
        (status = 400, description = "Missing input", body = ErrorBody)
    )
)]
pub async fn categorize_service_stream(
    State(state): State<AppState>,
    Json(body): Json<ClassifyBody>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>> + Send>, ApiError> {
    open_stream(&state, body.into())
}

/// Ask the DSA assistant a question
#[utoipa::path(
    post,
    path = "/agents/main_agent",
    tag = "agents",
    request_body = ChatBody,
    responses(
        (status = 200, description = "ChatReply `{response}`"),
        (status = 400, description = "Missing message", body = ErrorBody),
        (status = 500, description = "Agent failure", body = ErrorBody)
    )
)]
pub async fn chat(
    State(state): State<AppState>,
    Json(body): Json<ChatBody>,
) -> Result<Json<AgentOutput>, ApiError> {
    invoke(&state, body.into()).await
}

/// The DSA assistant as an event feed
#[utoipa::path(
    post,
    path = "/agents/main_agent/stream",
    tag = "agents",
    request_body = ChatBody,
    responses(
        (status = 200, description = "Server-sent StreamEvents", body = String, content_type = "text/event-stream"),
        (status = 400, description = "Missing message", body = ErrorBody)
    )
)]
pub async fn chat_stream(
    State(state): State<AppState>,
    Json(body): Json<ChatBody>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>> + Send>, ApiError> {
    open_stream(&state, body.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bodies_tolerate_missing_fields() {
        let body: MatchBody = serde_json::from_str(r#"{"company_name": "Acme"}"#).unwrap();
        let request: AgentRequest = body.into();
        assert!(request.validate().unwrap_err().is_client_error());

        let body: ResearchBody = serde_json::from_str("{}").unwrap();
        let request: AgentRequest = body.into();
        assert!(request.validate().is_err());

        let body: ChatBody = serde_json::from_str(r#"{"message": "  "}"#).unwrap();
        let request: AgentRequest = body.into();
        let err = request.validate().unwrap_err();
        assert!(err.is_client_error());
        assert!(err.to_string().contains("message is required"));
    }

    #[test]
    fn test_chat_body() {
        let body: ChatBody = serde_json::from_str(
            r#"{"message": "What is a VLOP?", "frontend_context": "research page"}"#,
        )
        .unwrap();
        let request: AgentRequest = body.into();
        assert!(request.validate().is_ok());
        let AgentRequest::Chat(chat) = request else {
            panic!("expected chat request");
        };
        assert_eq!(chat.frontend_context.as_deref(), Some("research page"));
    }

    #[test]
    fn test_classify_body() {
        let body: ClassifyBody = serde_json::from_str(
            r#"{"company_profile": {"company_name": "Acme", "facts": [
                {"section": "size", "question": "Employees?", "answer": "40"}
            ]}}"#,
        )
        .unwrap();
        let request: AgentRequest = body.into();
        assert!(request.validate().is_ok());
        let AgentRequest::Classify { company_profile } = request else {
            panic!("expected classify request");
        };
        assert_eq!(company_profile.facts.len(), 1);
        assert_eq!(company_profile.facts[0].source, None);
    }
}
