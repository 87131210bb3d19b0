//! # Assistant Skill
//!
//! Free-form questions about the Digital Services Act (`main_agent`). Each
//! step the model either asks for one tool call or writes the answer; tool
//! results are appended to a transcript that the next step sees. Once the
//! step cap is reached the model is asked for an answer without tools.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{CopilotError, CopilotResult};
use crate::inference::{InferenceGateway, InferenceRequest};
use crate::skills::artifact_registry::ChatReply;
use crate::skills::llm_helpers::stream_reply;
use crate::skills::prompts;
use crate::swarm::session::SessionContext;
use crate::tools::{invoke_tool, ToolCall, ToolInvoker, KNOWLEDGE_BASE, WEB_SEARCH};

pub const ASSISTANT_PHASE: &str = "reasoning";

const KNOWLEDGE_LIMIT: u64 = 5;
/// Tool output kept per transcript entry
const MAX_OBSERVATION_CHARS: usize = 6000;

/// Input of the chat assistant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    /// What the user is looking at in the client, passed through as text
    #[serde(default)]
    pub frontend_context: Option<String>,
}

impl ChatRequest {
    pub fn validate(&self) -> CopilotResult<()> {
        if self.message.trim().is_empty() {
            return Err(CopilotError::InvalidInput("message is required".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, PartialEq)]
enum Step {
    Act { tool: String, input: String },
    Answer(String),
}

fn label<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    let (head, rest) = line.split_once(':')?;
    head.trim().eq_ignore_ascii_case(name).then(|| rest.trim())
}

/// An `ACTION:` line makes the reply a tool request; anything else is the answer
fn parse_step(reply: &str) -> Step {
    let mut action = None;
    let mut input = None;
    for line in reply.lines().map(str::trim) {
        if let Some(rest) = label(line, "ACTION") {
            action = Some(rest);
        } else if let Some(rest) = label(line, "INPUT") {
            input = Some(rest);
        }
    }

    match action.map(|a| a.trim_matches('`').trim()) {
        Some(tool) if !tool.is_empty() => Step::Act {
            tool: tool.to_lowercase(),
            input: input.unwrap_or_default().trim_matches('"').to_string(),
        },
        _ => {
            let text = reply.trim();
            let text = ["ANSWER", "FINAL ANSWER"]
                .iter()
                .find_map(|name| label(text, name))
                .unwrap_or(text);
            Step::Answer(text.to_string())
        }
    }
}

fn clip(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}\n[truncated]", &text[..cut]),
        None => text.to_string(),
    }
}

pub struct AssistantSkill {
    gateway: Arc<dyn InferenceGateway>,
    tools: Arc<dyn ToolInvoker>,
    max_iterations: u32,
    max_tokens: u32,
    max_results: usize,
}

impl AssistantSkill {
    pub fn new(gateway: Arc<dyn InferenceGateway>, tools: Arc<dyn ToolInvoker>) -> Self {
        Self {
            gateway,
            tools,
            max_iterations: 10,
            max_tokens: 4000,
            max_results: 5,
        }
    }

    pub fn with_limits(mut self, max_iterations: u32, max_tokens: u32, max_results: usize) -> Self {
        self.max_iterations = max_iterations.max(1);
        self.max_tokens = max_tokens;
        self.max_results = max_results;
        self
    }

    /// Tools the invoker can actually run, with the description shown to the model
    fn offered(&self) -> Vec<(&'static str, &'static str)> {
        [
            (
                WEB_SEARCH,
                "search the web for current facts about companies, services and enforcement news",
            ),
            (
                KNOWLEDGE_BASE,
                "look up passages of the Digital Services Act and official guidance",
            ),
        ]
        .into_iter()
        .filter(|(name, _)| self.tools.supports(name))
        .collect()
    }

    #[tracing::instrument(skip_all, fields(session = %ctx.session_id))]
    pub async fn run(&self, ctx: &SessionContext, request: &ChatRequest) -> CopilotResult<ChatReply> {
        request.validate()?;
        let message = request.message.trim();
        let context = request
            .frontend_context
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or("None");

        let offered = self.offered();
        let tool_listing = if offered.is_empty() {
            "None. Answer from your own knowledge.".to_string()
        } else {
            offered
                .iter()
                .map(|(name, about)| format!("- {}: {}", name, about))
                .collect::<Vec<_>>()
                .join("\n")
        };

        ctx.emitter.phase_start(ASSISTANT_PHASE).await;
        let mut transcript: Vec<String> = Vec::new();

        for step in 1..=self.max_iterations {
            ctx.check()?;
            let prompt = prompts::render(
                prompts::ASSISTANT_STEP,
                &[
                    ("context", context),
                    ("tools", &tool_listing),
                    ("message", message),
                    ("transcript", &render_transcript(&transcript)),
                    ("step", &step.to_string()),
                    ("max_steps", &self.max_iterations.to_string()),
                ],
            );
            let node = format!("step{:02}", step);
            let reply = self.ask(ctx, prompt, &node).await?;

            match parse_step(&reply) {
                Step::Answer(text) => return self.finish(ctx, text).await,
                Step::Act { tool, input } => {
                    let query = if input.is_empty() { message } else { input.as_str() };
                    tracing::debug!(step, tool = %tool, "assistant requested a tool");
                    let observation = self.act(ctx, &offered, &tool, query, &node).await?;
                    transcript.push(format!(
                        "ACTION: {}\nINPUT: {}\nRESULT:\n{}",
                        tool, query, observation
                    ));
                }
            }
        }

        tracing::info!(steps = self.max_iterations, "step cap reached, asking for an answer");
        let prompt = prompts::render(
            prompts::ASSISTANT_FINAL,
            &[
                ("context", context),
                ("message", message),
                ("transcript", &render_transcript(&transcript)),
            ],
        );
        let reply = self.ask(ctx, prompt, "answer").await?;
        let text = match parse_step(&reply) {
            Step::Answer(text) => text,
            Step::Act { .. } => reply.trim().to_string(),
        };
        self.finish(ctx, text).await
    }

    async fn ask(&self, ctx: &SessionContext, prompt: String, node: &str) -> CopilotResult<String> {
        let reply = ctx
            .until_cancelled(stream_reply(
                self.gateway.as_ref(),
                InferenceRequest::new(prompt)
                    .with_system(prompts::SYSTEM)
                    .with_max_tokens(self.max_tokens),
                &ctx.emitter,
                node,
                ctx.call_timeout,
            ))
            .await??;
        Ok(reply)
    }

    /// Run one tool call; failures and unknown tools become the observation
    async fn act(
        &self,
        ctx: &SessionContext,
        offered: &[(&'static str, &'static str)],
        tool: &str,
        query: &str,
        node: &str,
    ) -> CopilotResult<String> {
        let Some((name, _)) = offered.iter().find(|(name, _)| *name == tool) else {
            let names: Vec<&str> = offered.iter().map(|(name, _)| *name).collect();
            return Ok(format!(
                "Tool '{}' is not available. Available tools: {}",
                tool,
                if names.is_empty() { "none".to_string() } else { names.join(", ") }
            ));
        };

        let input = if *name == KNOWLEDGE_BASE {
            json!({ "query": query, "limit": KNOWLEDGE_LIMIT })
        } else {
            json!({ "queries": [query], "max_results": self.max_results })
        };
        let result = ctx
            .until_cancelled(invoke_tool(
                self.tools.as_ref(),
                ToolCall::new(name, input),
                &ctx.emitter,
                node,
                ctx.call_timeout,
            ))
            .await?;

        Ok(match result {
            Ok(output) if output.content.trim().is_empty() => "No results.".to_string(),
            Ok(output) => clip(&output.content, MAX_OBSERVATION_CHARS),
            Err(e) => format!("Tool error: {:#}", e),
        })
    }

    async fn finish(&self, ctx: &SessionContext, text: String) -> CopilotResult<ChatReply> {
        if text.is_empty() {
            return Err(CopilotError::Internal(anyhow::anyhow!(
                "no response generated"
            )));
        }
        ctx.emitter.phase_end(ASSISTANT_PHASE).await;
        Ok(ChatReply { response: text })
    }
}

fn render_transcript(transcript: &[String]) -> String {
    if transcript.is_empty() {
        "Nothing yet.".to_string()
    } else {
        transcript.join("\n\n")
    }
}
