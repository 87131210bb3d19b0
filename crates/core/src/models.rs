//! # Copilot Models
//!
//! Centralized LLM configuration types. Both inference gateways and the
//! coordinator read provider, model and endpoint settings from here.

use serde::{Deserialize, Serialize};

/// Supported LLM providers
///
/// API keys are read from the environment:
/// - Anthropic (Claude) - `ANTHROPIC_API_KEY`
/// - OpenAI (GPT) - `OPENAI_API_KEY`
/// - Gemini (Google) - `GEMINI_API_KEY`
/// - OpenRouter (Gateway) - `OPENROUTER_API_KEY`
/// - Grok (xAI) - `XAI_API_KEY`
/// - DeepSeek - `DEEPSEEK_API_KEY` (falls back to `OPENAI_API_KEY`)
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    Anthropic,
    #[serde(rename = "openai")]
    OpenAI,
    Gemini,
    OpenRouter,
    Grok,
    #[default]
    DeepSeek,
}

impl LlmProvider {
    /// Get all available providers
    pub fn all() -> Vec<LlmProvider> {
        vec![
            LlmProvider::Anthropic,
            LlmProvider::OpenAI,
            LlmProvider::Gemini,
            LlmProvider::OpenRouter,
            LlmProvider::Grok,
            LlmProvider::DeepSeek,
        ]
    }

    /// Parse a provider id as used in config files and env vars
    pub fn parse(id: &str) -> Option<LlmProvider> {
        match id.trim().to_ascii_lowercase().as_str() {
            "anthropic" => Some(LlmProvider::Anthropic),
            "openai" => Some(LlmProvider::OpenAI),
            "gemini" => Some(LlmProvider::Gemini),
            "openrouter" => Some(LlmProvider::OpenRouter),
            "grok" => Some(LlmProvider::Grok),
            "deepseek" => Some(LlmProvider::DeepSeek),
            _ => None,
        }
    }

    /// Display name for logs and the config endpoint
    pub fn display_name(&self) -> &'static str {
        match self {
            LlmProvider::Anthropic => "Anthropic",
            LlmProvider::OpenAI => "OpenAI",
            LlmProvider::Gemini => "Gemini",
            LlmProvider::OpenRouter => "OpenRouter",
            LlmProvider::Grok => "Grok",
            LlmProvider::DeepSeek => "DeepSeek",
        }
    }

    /// Default model when none is configured
    pub fn default_model(&self) -> &'static str {
        match self {
            LlmProvider::Anthropic => "claude-sonnet-4-20250514",
            LlmProvider::OpenAI => "gpt-4o",
            LlmProvider::Gemini => "gemini-2.0-flash-exp",
            LlmProvider::OpenRouter => "anthropic/claude-3.5-sonnet",
            LlmProvider::Grok => "grok-2",
            LlmProvider::DeepSeek => "deepseek-chat",
        }
    }

    /// Environment variable holding the API key
    pub fn api_key_env(&self) -> &'static str {
        match self {
            LlmProvider::Anthropic => "ANTHROPIC_API_KEY",
            LlmProvider::OpenAI => "OPENAI_API_KEY",
            LlmProvider::Gemini => "GEMINI_API_KEY",
            LlmProvider::OpenRouter => "OPENROUTER_API_KEY",
            LlmProvider::Grok => "XAI_API_KEY",
            LlmProvider::DeepSeek => "DEEPSEEK_API_KEY",
        }
    }

    /// Whether the provider exposes an OpenAI-compatible chat completions API.
    /// Those providers get real token streaming.
    pub fn speaks_openai_protocol(&self) -> bool {
        !matches!(self, LlmProvider::Anthropic | LlmProvider::Gemini)
    }

    /// Base URL of the OpenAI-compatible endpoint
    pub fn default_base_url(&self) -> Option<&'static str> {
        match self {
            LlmProvider::OpenAI => Some("https://api.openai.com/v1"),
            LlmProvider::OpenRouter => Some("https://openrouter.ai/api/v1"),
            LlmProvider::Grok => Some("https://api.x.ai/v1"),
            LlmProvider::DeepSeek => Some("https://api.deepseek.com/v1"),
            LlmProvider::Anthropic | LlmProvider::Gemini => None,
        }
    }

    /// Whether this provider supports custom base URL
    pub fn supports_base_url(&self) -> bool {
        self.speaks_openai_protocol()
    }
}

/// Configuration for LLM model selection
///
/// ## Example
/// ```rust,ignore
/// use copilot_core::models::{ModelConfig, LlmProvider};
///
/// let config = ModelConfig::default(); // deepseek-chat
/// let config = ModelConfig::with_provider(LlmProvider::OpenAI, "gpt-4o")
///     .with_base_url("http://localhost:4000/v1");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// LLM provider to use
    #[serde(default)]
    pub provider: LlmProvider,
    /// Model name (e.g., "deepseek-chat", "gpt-4o")
    pub model: String,
    /// Optional base URL override for OpenAI-compatible APIs
    #[serde(default)]
    pub base_url: Option<String>,
    /// Max output tokens per call
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_max_tokens() -> u32 {
    4000
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self::with_provider(LlmProvider::DeepSeek, LlmProvider::DeepSeek.default_model())
    }
}

impl ModelConfig {
    /// Create config for a specific provider
    pub fn with_provider(provider: LlmProvider, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            base_url: None,
            max_tokens: default_max_tokens(),
        }
    }

    /// Set base URL (for OpenAI-compatible endpoints)
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Effective base URL: explicit override first, then the provider default
    pub fn resolved_base_url(&self) -> Option<String> {
        if !self.provider.supports_base_url() {
            return None;
        }
        self.base_url
            .clone()
            .or_else(|| self.provider.default_base_url().map(str::to_string))
            .map(|url| url.trim_end_matches('/').to_string())
    }

    /// Look up the provider API key. DeepSeek deployments commonly run behind
    /// the OpenAI variable names, so that is accepted as a fallback.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(self.provider.api_key_env())
            .ok()
            .or_else(|| match self.provider {
                LlmProvider::DeepSeek => std::env::var("OPENAI_API_KEY").ok(),
                _ => None,
            })
            .filter(|key| !key.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ModelConfig::default();
        assert_eq!(config.provider, LlmProvider::DeepSeek);
        assert_eq!(config.model, "deepseek-chat");
        assert_eq!(config.max_tokens, 4000);
    }

    #[test]
    fn test_provider_display_names() {
        assert_eq!(LlmProvider::Anthropic.display_name(), "Anthropic");
        assert_eq!(LlmProvider::OpenAI.display_name(), "OpenAI");
    }

    #[test]
    fn test_parse_provider() {
        assert_eq!(LlmProvider::parse("OpenAI"), Some(LlmProvider::OpenAI));
        assert_eq!(LlmProvider::parse(" deepseek "), Some(LlmProvider::DeepSeek));
        assert_eq!(LlmProvider::parse("mistral"), None);
    }

    #[test]
    fn test_base_url_resolution() {
        let config = ModelConfig::with_provider(LlmProvider::OpenAI, "gpt-4o")
            .with_base_url("http://localhost:4000/v1/");
        assert_eq!(
            config.resolved_base_url().as_deref(),
            Some("http://localhost:4000/v1")
        );

        let config = ModelConfig::default();
        assert_eq!(
            config.resolved_base_url().as_deref(),
            Some("https://api.deepseek.com/v1")
        );

        let config = ModelConfig::with_provider(LlmProvider::Anthropic, "claude")
            .with_base_url("http://ignored");
        assert!(config.resolved_base_url().is_none());
    }

    #[test]
    fn test_openai_protocol_support() {
        assert!(LlmProvider::DeepSeek.speaks_openai_protocol());
        assert!(!LlmProvider::Gemini.speaks_openai_protocol());
    }

    #[test]
    fn test_model_config_serialization() {
        let config = ModelConfig::with_provider(LlmProvider::OpenAI, "gpt-4o");
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("openai"));
        assert!(json.contains("gpt-4o"));

        let parsed: ModelConfig =
            serde_json::from_str(r#"{"provider":"grok","model":"grok-2"}"#).unwrap();
        assert_eq!(parsed.provider, LlmProvider::Grok);
        assert_eq!(parsed.max_tokens, 4000);
    }
}
