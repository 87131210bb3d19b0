//! # Copilot Core
//!
//! Orchestration core of DSA Copilot: agents that resolve a company,
//! research it, classify it under the EU Digital Services Act and answer
//! free-form questions, each streaming typed events while it works.
//!
//! ## Architecture
//!
//! - `swarm/` - Sessions, event bus, bounded scheduler and the coordinator
//! - `skills/` - The agents, their prompts and payload types
//! - `inference/` - Inference gateways (OpenAI-compatible streaming, radkit)
//! - `tools/` - Tool invoker interface, registry and source citations
//! - `state/` - Question and obligation rule tables
//! - `models` - LLM provider configuration
//!
//! ## Usage
//!
//! ```rust,ignore
//! use copilot_core::swarm::{AgentRequest, Coordinator, CoordinatorConfig};
//!
//! let coordinator = Coordinator::from_config(CoordinatorConfig::default()).await?;
//! let (session, mut events) = coordinator.start(AgentRequest::ResearchCompany {
//!     company_name: "Acme Corp".into(),
//! });
//! while let Some(event) = events.recv().await {
//!     println!("{}", event.to_json());
//! }
//! ```

pub mod error;
pub mod inference;
pub mod models;
pub mod skills;
pub mod state;
pub mod swarm;
pub mod tools;

#[cfg(test)]
mod testing;

pub use error::{CopilotError, CopilotResult};
