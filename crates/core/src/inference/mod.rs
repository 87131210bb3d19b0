//! # Inference Gateway
//!
//! Uniform capability to submit a prompt and receive either a complete text
//! or an incremental token stream. Agents depend only on the trait.
//!
//! - `openai` - OpenAI-compatible chat completions with real token streaming
//! - `radkit_gateway` - any radkit provider, complete replies only

pub mod openai;
pub mod radkit_gateway;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};

use crate::models::ModelConfig;

pub use self::openai::OpenAiGateway;
pub use self::radkit_gateway::RadkitGateway;

/// Incremental reply chunks
pub type TokenStream = BoxStream<'static, Result<String>>;

/// One prompt submission
#[derive(Debug, Clone, Default)]
pub struct InferenceRequest {
    pub system: Option<String>,
    pub prompt: String,
    /// Overrides the configured output limit
    pub max_tokens: Option<u32>,
}

impl InferenceRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

#[async_trait]
pub trait InferenceGateway: Send + Sync {
    /// Full reply text
    async fn complete(&self, request: InferenceRequest) -> Result<String>;

    /// Reply as a token stream. Gateways without streaming yield the complete
    /// text as one chunk.
    async fn stream(&self, request: InferenceRequest) -> Result<TokenStream> {
        let text = self.complete(request).await?;
        Ok(stream::once(async move { Ok(text) }).boxed())
    }
}

/// Pick the gateway for a model configuration
pub fn gateway_for(config: &ModelConfig) -> Result<Arc<dyn InferenceGateway>> {
    if config.provider.speaks_openai_protocol() {
        Ok(Arc::new(OpenAiGateway::new(config)?))
    } else {
        Ok(Arc::new(RadkitGateway::new(config.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LlmProvider;

    struct Fixed;

    #[async_trait]
    impl InferenceGateway for Fixed {
        async fn complete(&self, request: InferenceRequest) -> Result<String> {
            Ok(format!("echo: {}", request.prompt))
        }
    }

    #[tokio::test]
    async fn test_default_stream_is_single_chunk() {
        let chunks: Vec<String> = Fixed
            .stream(InferenceRequest::new("hi"))
            .await
            .unwrap()
            .map(|c| c.unwrap())
            .collect()
            .await;
        assert_eq!(chunks, vec!["echo: hi"]);
    }

    #[test]
    fn test_request_builder() {
        let request = InferenceRequest::new("prompt")
            .with_system("system")
            .with_max_tokens(100);
        assert_eq!(request.system.as_deref(), Some("system"));
        assert_eq!(request.max_tokens, Some(100));
    }

    #[test]
    fn test_gateway_selection() {
        assert!(gateway_for(&ModelConfig::default()).is_ok());
        let config = ModelConfig::with_provider(LlmProvider::Anthropic, "claude-sonnet-4-20250514");
        assert!(gateway_for(&config).is_ok());
    }
}
