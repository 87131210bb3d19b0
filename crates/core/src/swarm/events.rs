//! # Stream Events
//!
//! The typed progress feed of one session. Every record carries an explicit
//! `type` discriminator when serialized, which is what the transport frames
//! onto the wire.

use serde::{Deserialize, Serialize};

use crate::skills::artifact_registry::{
    ChatReply, CompanyMatchResult, ComplianceReport, ResearchReport,
};
use crate::tools::SourceCitation;

/// Kind of agent a session runs
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    /// Entity resolution
    CompanyMatcher,
    /// Parallel research
    CompanyResearcher,
    /// Classification & obligation engine
    ServiceCategorizer,
    /// Chat assistant
    MainAgent,
}

impl AgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::CompanyMatcher => "company_matcher",
            AgentKind::CompanyResearcher => "company_researcher",
            AgentKind::ServiceCategorizer => "service_categorizer",
            AgentKind::MainAgent => "main_agent",
        }
    }
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal payload of a session, one shape per agent kind
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AgentOutput {
    Match(CompanyMatchResult),
    Research(ResearchReport),
    Compliance(ComplianceReport),
    Chat(ChatReply),
}

impl AgentOutput {
    pub fn kind(&self) -> AgentKind {
        match self {
            AgentOutput::Match(_) => AgentKind::CompanyMatcher,
            AgentOutput::Research(_) => AgentKind::CompanyResearcher,
            AgentOutput::Compliance(_) => AgentKind::ServiceCategorizer,
            AgentOutput::Chat(_) => AgentKind::MainAgent,
        }
    }
}

/// One record of the session feed
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Incremental model output
    Token {
        content: String,
        node: String,
        agent: AgentKind,
    },
    /// A reasoning call started
    LlmStart { node: String, agent: AgentKind },
    ToolStart {
        name: String,
        node: String,
        input: String,
        agent: AgentKind,
    },
    ToolEnd {
        name: String,
        node: String,
        output_length: usize,
        sources: Vec<SourceCitation>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        agent: AgentKind,
    },
    PhaseStart { phase: String, agent: AgentKind },
    PhaseEnd { phase: String, agent: AgentKind },
    Result { data: AgentOutput },
    Error { message: String },
    Done,
}

impl StreamEvent {
    /// Wire discriminator of this event
    pub fn type_name(&self) -> &'static str {
        match self {
            StreamEvent::Token { .. } => "token",
            StreamEvent::LlmStart { .. } => "llm_start",
            StreamEvent::ToolStart { .. } => "tool_start",
            StreamEvent::ToolEnd { .. } => "tool_end",
            StreamEvent::PhaseStart { .. } => "phase_start",
            StreamEvent::PhaseEnd { .. } => "phase_end",
            StreamEvent::Result { .. } => "result",
            StreamEvent::Error { .. } => "error",
            StreamEvent::Done => "done",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done)
    }

    /// Serialize into a single JSON record
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            serde_json::json!({ "type": "error", "message": format!("unserializable event: {}", e) })
                .to_string()
        })
    }
}
