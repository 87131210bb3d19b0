//! Gateway over radkit's provider clients. Covers providers without an
//! OpenAI-compatible endpoint; replies arrive whole.

use anyhow::Result;
use async_trait::async_trait;
use radkit::macros::LLMOutput;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{InferenceGateway, InferenceRequest};
use crate::models::ModelConfig;

const DEFAULT_SYSTEM: &str = "You are a careful analyst of EU Digital Services Act compliance. \
Answer exactly in the format the user asks for.";

/// Plain text reply envelope
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, LLMOutput)]
pub struct TextReply {
    /// The complete answer, in the format requested by the prompt
    pub text: String,
}

pub struct RadkitGateway {
    config: ModelConfig,
}

impl RadkitGateway {
    pub fn new(config: ModelConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl InferenceGateway for RadkitGateway {
    async fn complete(&self, request: InferenceRequest) -> Result<String> {
        let system = request.system.as_deref().unwrap_or(DEFAULT_SYSTEM);
        let reply = crate::run_llm_function!(&self.config, TextReply, system, request.prompt)?;
        Ok(reply.text)
    }
}
