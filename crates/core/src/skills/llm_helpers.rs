//! # LLM Helpers
//!
//! Shared utilities for talking to models: the radkit provider macro, a
//! streaming reply helper that mirrors tokens onto the session bus, and JSON
//! extraction from free-form replies.

use std::time::Duration;

use anyhow::Result;
use futures::StreamExt;

use crate::inference::{InferenceGateway, InferenceRequest};
use crate::swarm::bus::Emitter;
use crate::swarm::scheduler::with_deadline;

/// Macro to run an LlmFunction with any provider.
/// Handles the provider matching once in a central place.
#[macro_export]
macro_rules! run_llm_function {
    ($config:expr, $output_type:ty, $system_prompt:expr, $input:expr) => {{
        use radkit::agent::LlmFunction;
        use radkit::models::providers::{
            AnthropicLlm, DeepSeekLlm, GeminiLlm, GrokLlm, OpenAILlm, OpenRouterLlm,
        };
        use $crate::models::LlmProvider;

        let config = $config;
        let result: anyhow::Result<$output_type> = match config.provider {
            LlmProvider::Anthropic => {
                let llm = AnthropicLlm::from_env(&config.model)?;
                let func =
                    LlmFunction::<$output_type>::new_with_system_instructions(llm, $system_prompt);
                func.run($input).await.map_err(Into::into)
            }
            LlmProvider::OpenAI => {
                let mut llm = OpenAILlm::from_env(&config.model)?;
                if let Some(base_url) = &config.base_url {
                    llm = llm.with_base_url(base_url);
                }
                let func =
                    LlmFunction::<$output_type>::new_with_system_instructions(llm, $system_prompt);
                func.run($input).await.map_err(Into::into)
            }
            LlmProvider::Gemini => {
                let llm = GeminiLlm::from_env(&config.model)?;
                let func =
                    LlmFunction::<$output_type>::new_with_system_instructions(llm, $system_prompt);
                func.run($input).await.map_err(Into::into)
            }
            LlmProvider::OpenRouter => {
                let llm = OpenRouterLlm::from_env(&config.model)?;
                let func =
                    LlmFunction::<$output_type>::new_with_system_instructions(llm, $system_prompt);
                func.run($input).await.map_err(Into::into)
            }
            LlmProvider::Grok => {
                let llm = GrokLlm::from_env(&config.model)?;
                let func =
                    LlmFunction::<$output_type>::new_with_system_instructions(llm, $system_prompt);
                func.run($input).await.map_err(Into::into)
            }
            LlmProvider::DeepSeek => {
                let llm = DeepSeekLlm::from_env(&config.model)?;
                let func =
                    LlmFunction::<$output_type>::new_with_system_instructions(llm, $system_prompt);
                func.run($input).await.map_err(Into::into)
            }
        };
        result
    }};
}

pub use run_llm_function;

/// Run one streamed model call, forwarding every chunk as a `token` event.
///
/// Emits `llm_start` first. The whole call, stream included, is bounded by
/// `timeout`. Returns the concatenated reply.
pub async fn stream_reply(
    gateway: &dyn InferenceGateway,
    request: InferenceRequest,
    emitter: &Emitter,
    node: &str,
    timeout: Duration,
) -> Result<String> {
    emitter.llm_start(node).await;

    with_deadline(timeout, async {
        let mut tokens = gateway.stream(request).await?;
        let mut reply = String::new();
        while let Some(chunk) = tokens.next().await {
            let chunk = chunk?;
            if chunk.is_empty() {
                continue;
            }
            emitter.token(node, chunk.as_str()).await;
            reply.push_str(&chunk);
        }
        Ok(reply)
    })
    .await
}

/// Slice out the outermost `{ ... }` of a reply (models like to wrap JSON in
/// prose or code fences)
pub fn extract_json_block(reply: &str) -> Option<&str> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    (end > start).then(|| &reply[start..=end])
}

/// Parse the JSON object embedded in a reply
pub fn parse_json_reply<T: serde::de::DeserializeOwned>(reply: &str) -> Result<T> {
    let block = extract_json_block(reply)
        .ok_or_else(|| anyhow::anyhow!("reply contains no JSON object"))?;
    serde_json::from_str(block).map_err(|e| anyhow::anyhow!("malformed JSON reply: {}", e))
}
