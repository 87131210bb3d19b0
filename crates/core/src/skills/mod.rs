//! # Agent Skills
//!
//! One skill per agent kind, plus what they share.
//!
//! ## Skills
//!
//! - `MatcherSkill` - Entity resolution (`company_matcher`)
//! - `ResearcherSkill` - Parallel research over the question table (`company_researcher`)
//! - `ClassifierSkill` - Classification and obligation analysis (`service_categorizer`)
//! - `AssistantSkill` - Chat assistant with tool use (`main_agent`)
//!
//! ## Shared
//!
//! - `artifact_registry` - Payload types exchanged between agents and clients
//! - `prompts` - Prompt templates
//! - `llm_helpers` - Streaming and JSON reply helpers
//! - `tools` - Concrete tools (web search, regulation retriever)

pub mod llm_helpers;
pub mod prompts;
pub mod tools;

// Artifact Registry (shared payload types)
pub mod artifact_registry;

pub mod assistant_skill;
pub mod classifier_skill;
pub mod matcher_skill;
pub mod researcher_skill;

pub use assistant_skill::{AssistantSkill, ChatRequest};
pub use classifier_skill::ClassifierSkill;
pub use matcher_skill::{MatchRequest, MatcherSkill};
pub use researcher_skill::ResearcherSkill;
