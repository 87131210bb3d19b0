//! # Swarm Coordinator
//!
//! Owns the shared, read-only parts of the system (gateway, tools, question
//! and rule tables) and drives one agent per session. Streaming callers get
//! the session's [`EventStream`]; blocking callers get the terminal payload.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde::{Deserialize, Serialize};

use crate::error::{CopilotError, CopilotResult};
use crate::inference::{gateway_for, InferenceGateway};
use crate::models::ModelConfig;
use crate::skills::artifact_registry::CompanyProfile;
use crate::skills::assistant_skill::{AssistantSkill, ChatRequest};
use crate::skills::classifier_skill::ClassifierSkill;
use crate::skills::matcher_skill::{MatchRequest, MatcherSkill};
use crate::skills::researcher_skill::ResearcherSkill;
use crate::skills::tools::{KnowledgeBaseTool, WebSearchTool};
use crate::state::obligations::RuleTable;
use crate::state::questions::QuestionTable;
use crate::tools::{ToolInvoker, ToolRegistry};

use super::bus::{EventBus, EventStream};
use super::events::{AgentKind, AgentOutput};
use super::scheduler::panic_message;
use super::session::{Session, SessionContext};

/// Configuration for the coordinator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Model used by every agent
    pub model: ModelConfig,
    /// Entity resolution search/evaluate rounds before giving up
    pub matcher_max_iterations: u32,
    /// Ranked candidates kept on an ambiguous match
    pub max_suggestions: usize,
    /// Search queries per entity resolution call
    pub max_queries_per_call: usize,
    /// Research questions in flight at once
    pub research_concurrency: usize,
    /// Obligation narratives in flight at once
    pub obligation_concurrency: usize,
    pub max_search_results: usize,
    /// Search queries per research question
    pub max_search_queries: usize,
    /// Search rounds per research question, the first included
    pub research_max_iterations: u32,
    /// Reason/act steps of the chat assistant before it must answer
    pub assistant_max_iterations: u32,
    /// Output limit of each chat assistant reply
    pub assistant_max_tokens: u32,
    /// Timeout for every inference and tool call
    pub call_timeout_secs: u64,
    /// Pending events before producers block
    pub event_buffer: usize,
    /// Question table override (JSON)
    pub questions_path: Option<String>,
    /// Obligation rule table override (JSON)
    pub obligations_path: Option<String>,
    /// Custom SearXNG instance URL (overrides auto-discovery)
    pub searxng_url: Option<String>,
    /// Regulation retriever; `retrieve_dsa_knowledge` is only offered when set
    pub knowledge_base_url: Option<String>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            model: ModelConfig::default(),
            matcher_max_iterations: 5,
            max_suggestions: 3,
            max_queries_per_call: 5,
            research_concurrency: 17,
            obligation_concurrency: 6,
            max_search_results: 10,
            max_search_queries: 2,
            research_max_iterations: 3,
            assistant_max_iterations: 10,
            assistant_max_tokens: 4000,
            call_timeout_secs: 90,
            event_buffer: 256,
            questions_path: None,
            obligations_path: None,
            searxng_url: None,
            knowledge_base_url: None,
        }
    }
}

impl CoordinatorConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs.max(1))
    }
}

/// One agent invocation
#[derive(Debug, Clone)]
pub enum AgentRequest {
    MatchCompany(MatchRequest),
    ResearchCompany { company_name: String },
    Classify { company_profile: CompanyProfile },
    Chat(ChatRequest),
}

impl AgentRequest {
    pub fn kind(&self) -> AgentKind {
        match self {
            AgentRequest::MatchCompany(_) => AgentKind::CompanyMatcher,
            AgentRequest::ResearchCompany { .. } => AgentKind::CompanyResearcher,
            AgentRequest::Classify { .. } => AgentKind::ServiceCategorizer,
            AgentRequest::Chat(_) => AgentKind::MainAgent,
        }
    }

    /// Reject missing required fields before a session is opened
    pub fn validate(&self) -> CopilotResult<()> {
        match self {
            AgentRequest::MatchCompany(request) => request.validate(),
            AgentRequest::Chat(request) => request.validate(),
            AgentRequest::ResearchCompany { company_name } if company_name.trim().is_empty() => Err(
                CopilotError::InvalidInput("company_name is required".to_string()),
            ),
            AgentRequest::Classify { company_profile }
                if company_profile.company_name.trim().is_empty() =>
            {
                Err(CopilotError::InvalidInput(
                    "company_profile.company_name is required".to_string(),
                ))
            }
            _ => Ok(()),
        }
    }
}

/// The swarm coordinator
#[derive(Clone)]
pub struct Coordinator {
    config: Arc<CoordinatorConfig>,
    gateway: Arc<dyn InferenceGateway>,
    tools: Arc<dyn ToolInvoker>,
    questions: Arc<QuestionTable>,
    rules: Arc<RuleTable>,
}

impl Coordinator {
    pub fn new(
        config: CoordinatorConfig,
        gateway: Arc<dyn InferenceGateway>,
        tools: Arc<dyn ToolInvoker>,
        questions: QuestionTable,
        rules: RuleTable,
    ) -> Self {
        Self {
            config: Arc::new(config),
            gateway,
            tools,
            questions: Arc::new(questions),
            rules: Arc::new(rules),
        }
    }

    /// Load the tables once and build the concrete gateway and tools
    pub async fn from_config(config: CoordinatorConfig) -> CopilotResult<Self> {
        let questions = match &config.questions_path {
            Some(path) => QuestionTable::load(path).await?,
            None => QuestionTable::embedded()?,
        };
        let rules = match &config.obligations_path {
            Some(path) => RuleTable::load(path).await?,
            None => RuleTable::embedded()?,
        };

        let gateway = gateway_for(&config.model)?;

        let mut registry = ToolRegistry::new().register(WebSearchTool::new(
            config.searxng_url.clone(),
            config.max_search_results,
            config.max_queries_per_call,
        )?);
        if let Some(url) = &config.knowledge_base_url {
            registry = registry.register(KnowledgeBaseTool::new(url)?);
        }

        tracing::info!(
            provider = %config.model.provider.display_name(),
            model = %config.model.model,
            questions = questions.len(),
            rules = rules.len(),
            tools = ?registry.names(),
            "coordinator ready"
        );

        Ok(Self::new(config, gateway, Arc::new(registry), questions, rules))
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn questions(&self) -> &QuestionTable {
        &self.questions
    }

    pub fn rules(&self) -> &RuleTable {
        &self.rules
    }

    /// Open a session and drive the agent in the background.
    ///
    /// The stream always ends with `done`; a session-fatal failure puts one
    /// `error` right before it. Cancelling the returned [`Session`] stops
    /// every outstanding unit and closes the stream.
    pub fn start(&self, request: AgentRequest) -> (Session, EventStream) {
        let session = Session::new(request.kind());
        let (emitter, stream) =
            EventBus::channel(self.config.event_buffer, request.kind(), session.cancel_token());
        let ctx = SessionContext::new(&session, emitter, self.config.call_timeout());

        let this = self.clone();
        tokio::spawn(async move {
            match this.run_guarded(&ctx, request).await {
                Ok(output) => {
                    tracing::info!(session = %ctx.session_id, agent = %output.kind(), "session finished");
                    ctx.emitter.result(output).await;
                    ctx.emitter.done().await;
                }
                Err(CopilotError::Cancelled) => {
                    tracing::info!(session = %ctx.session_id, "session cancelled");
                }
                Err(e) => {
                    tracing::warn!(session = %ctx.session_id, "session failed: {}", e);
                    ctx.emitter.error(e.to_string()).await;
                    ctx.emitter.done().await;
                }
            }
        });

        (session, stream)
    }

    /// Run a session to completion and return its terminal payload
    pub async fn invoke(&self, request: AgentRequest) -> CopilotResult<AgentOutput> {
        request.validate()?;
        let session = Session::new(request.kind());
        let (emitter, stream) =
            EventBus::channel(self.config.event_buffer, request.kind(), session.cancel_token());

        // Nobody watches a blocking call's feed; keep producers from stalling on it
        let drain = tokio::spawn(stream.collect());

        let ctx = SessionContext::new(&session, emitter, self.config.call_timeout());
        let result = self.run_guarded(&ctx, request).await;
        ctx.emitter.done().await;
        drop(ctx);
        let _ = drain.await;

        result
    }

    async fn run_guarded(&self, ctx: &SessionContext, request: AgentRequest) -> CopilotResult<AgentOutput> {
        let kind = request.kind();
        tracing::info!(session = %ctx.session_id, agent = %kind, "session started");
        match AssertUnwindSafe(self.execute(ctx, request)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(CopilotError::Internal(anyhow::anyhow!(
                "{} panicked: {}",
                kind,
                panic_message(panic)
            ))),
        }
    }

    async fn execute(&self, ctx: &SessionContext, request: AgentRequest) -> CopilotResult<AgentOutput> {
        request.validate()?;
        let config = &self.config;

        match request {
            AgentRequest::MatchCompany(request) => {
                MatcherSkill::new(self.gateway.clone(), self.tools.clone())
                    .with_limits(
                        config.matcher_max_iterations,
                        config.max_suggestions,
                        config.max_queries_per_call,
                        config.max_search_results,
                    )
                    .run(ctx, &request)
                    .await
                    .map(AgentOutput::Match)
            }
            AgentRequest::ResearchCompany { company_name } => ResearcherSkill::new(
                self.gateway.clone(),
                self.tools.clone(),
                self.questions.clone(),
            )
            .with_limits(
                config.research_concurrency,
                config.max_search_queries,
                config.max_search_results,
            )
            .with_max_rounds(config.research_max_iterations)
            .run(ctx, &company_name)
            .await
            .map(AgentOutput::Research),
            AgentRequest::Classify { company_profile } => {
                ClassifierSkill::new(self.gateway.clone(), self.tools.clone(), self.rules.clone())
                    .with_concurrency(config.obligation_concurrency)
                    .run(ctx, &company_profile)
                    .await
                    .map(AgentOutput::Compliance)
            }
            AgentRequest::Chat(request) => {
                AssistantSkill::new(self.gateway.clone(), self.tools.clone())
                    .with_limits(
                        config.assistant_max_iterations,
                        config.assistant_max_tokens,
                        config.max_search_results,
                    )
                    .run(ctx, &request)
                    .await
                    .map(AgentOutput::Chat)
            }
        }
    }
}
