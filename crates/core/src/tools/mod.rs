//! # Tool Invoker
//!
//! The narrow capability through which agents reach external actions (web
//! search, knowledge-base lookup). Agents only see [`ToolInvoker`]; concrete
//! tools live in `skills::tools` and are dispatched by a [`ToolRegistry`].
//!
//! ## Modules
//!
//! - `sources` - citation dedup and extraction from tool text

pub mod sources;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::swarm::bus::Emitter;
use crate::swarm::scheduler::with_deadline;

pub use sources::{dedup_sources, extract_sources, MAX_SOURCES_PER_TOOL};

/// Name of the web search tool
pub const WEB_SEARCH: &str = "web_search";
/// Name of the regulation knowledge-base tool
pub const KNOWLEDGE_BASE: &str = "retrieve_dsa_knowledge";

/// Longest tool input echoed in a `tool_start` event
const MAX_INPUT_ECHO: usize = 200;

/// A source a tool result was drawn from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceCitation {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl SourceCitation {
    pub fn new(url: impl Into<String>, title: Option<&str>) -> Self {
        Self {
            url: url.into(),
            title: title.map(str::to_string),
        }
    }
}

/// A named action with structured input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    pub input: Value,
}

impl ToolCall {
    pub fn new(name: &str, input: Value) -> Self {
        Self {
            name: name.to_string(),
            input,
        }
    }
}

/// Text output plus the citations it came from
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolOutput {
    pub content: String,
    #[serde(default)]
    pub citations: Vec<SourceCitation>,
}

#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn invoke(&self, call: ToolCall) -> Result<ToolOutput>;

    /// Whether a tool with this name can be invoked
    fn supports(&self, _name: &str) -> bool {
        true
    }
}

/// A single concrete tool
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;

    async fn call(&self, input: Value) -> Result<ToolOutput>;
}

/// Dispatches calls to registered tools by name
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<&'static str, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, tool: impl Tool + 'static) -> Self {
        self.tools.insert(tool.name(), Arc::new(tool));
        self
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.tools.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

#[async_trait]
impl ToolInvoker for ToolRegistry {
    async fn invoke(&self, call: ToolCall) -> Result<ToolOutput> {
        match self.tools.get(call.name.as_str()) {
            Some(tool) => tool.call(call.input).await,
            None => anyhow::bail!("unknown tool: {}", call.name),
        }
    }

    fn supports(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

/// Invoke a tool under a deadline, wrapped in paired `tool_start`/`tool_end`
/// events. The `tool_end` carries deduplicated citations, falling back to
/// URLs found in the output text.
pub async fn invoke_tool(
    tools: &dyn ToolInvoker,
    call: ToolCall,
    emitter: &Emitter,
    node: &str,
    timeout: Duration,
) -> Result<ToolOutput> {
    let name = call.name.clone();
    emitter
        .tool_start(&name, node, truncate_chars(&call.input.to_string(), MAX_INPUT_ECHO))
        .await;

    let result = with_deadline(timeout, tools.invoke(call)).await;

    match &result {
        Ok(output) => {
            let mut sources = if output.citations.is_empty() {
                extract_sources(&output.content)
            } else {
                dedup_sources(output.citations.iter().cloned())
            };
            sources.truncate(MAX_SOURCES_PER_TOOL);
            emitter
                .tool_end(&name, node, output.content.len(), sources, None)
                .await;
        }
        Err(e) => {
            tracing::warn!(tool = %name, node, "tool call failed: {:#}", e);
            emitter
                .tool_end(&name, node, 0, Vec::new(), Some(format!("{:#}", e)))
                .await;
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::swarm::bus::EventBus;
    use crate::swarm::events::{AgentKind, StreamEvent};
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &'static str {
            "echo"
        }

        async fn call(&self, input: Value) -> Result<ToolOutput> {
            Ok(ToolOutput {
                content: input.to_string(),
                citations: vec![
                    SourceCitation::new("https://a.example", None),
                    SourceCitation::new("https://a.example", Some("A")),
                ],
            })
        }
    }

    struct Slow;

    #[async_trait]
    impl Tool for Slow {
        fn name(&self) -> &'static str {
            "slow"
        }

        async fn call(&self, _input: Value) -> Result<ToolOutput> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(ToolOutput::default())
        }
    }

    #[tokio::test]
    async fn test_registry_dispatch() {
        let registry = ToolRegistry::new().register(Echo);
        assert!(registry.supports("echo"));
        assert!(!registry.supports(WEB_SEARCH));
        assert_eq!(registry.names(), vec!["echo"]);

        let out = registry
            .invoke(ToolCall::new("echo", json!({"q": 1})))
            .await
            .unwrap();
        assert_eq!(out.content, r#"{"q":1}"#);

        let err = registry
            .invoke(ToolCall::new("missing", json!({})))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unknown tool"));
    }

    #[tokio::test]
    async fn test_invoke_emits_paired_events() {
        let cancel = CancellationToken::new();
        let (emitter, mut stream) = EventBus::channel(8, AgentKind::CompanyMatcher, cancel);
        let registry = ToolRegistry::new().register(Echo).register(Slow);

        let long_input = json!({ "query": "x".repeat(500) });
        invoke_tool(
            &registry,
            ToolCall::new("echo", long_input),
            &emitter,
            "searching",
            Duration::from_secs(1),
        )
        .await
        .unwrap();
        let failed = invoke_tool(
            &registry,
            ToolCall::new("slow", json!({})),
            &emitter,
            "searching",
            Duration::from_millis(20),
        )
        .await;
        assert!(failed.is_err());

        match stream.recv().await {
            Some(StreamEvent::ToolStart { name, input, .. }) => {
                assert_eq!(name, "echo");
                assert_eq!(input.chars().count(), MAX_INPUT_ECHO + 3);
            }
            other => panic!("unexpected {:?}", other),
        }
        match stream.recv().await {
            Some(StreamEvent::ToolEnd { sources, error, .. }) => {
                assert_eq!(sources, vec![SourceCitation::new("https://a.example", Some("A"))]);
                assert!(error.is_none());
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(stream.recv().await, Some(StreamEvent::ToolStart { .. })));
        match stream.recv().await {
            Some(StreamEvent::ToolEnd { error, output_length, .. }) => {
                assert!(error.unwrap().contains("timed out"));
                assert_eq!(output_length, 0);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("short", 10), "short");
        assert_eq!(truncate_chars("héllo wörld", 5), "héllo...");
    }
}
