//! # Server Configuration
//!
//! `.copilot/config.json` (every field optional) merged over the coordinator
//! defaults, then environment overrides. API keys never live here; they are
//! read from the environment by the gateways and tools.

use anyhow::{bail, Context, Result};
use copilot_core::models::{LlmProvider, ModelConfig};
use copilot_core::state::io::{file_exists, read_file, write_runtime_file};
use copilot_core::swarm::CoordinatorConfig;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

const CONFIG_FILE: &str = "config.json";

/// Persisted configuration (the subset of CoordinatorConfig clients may set)
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, ToSchema)]
pub struct PersistedConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matcher_max_iterations: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_suggestions: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub research_concurrency: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub research_max_iterations: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assistant_max_iterations: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub obligation_concurrency: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_search_results: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub searxng_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub knowledge_base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub questions_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub obligations_path: Option<String>,
}

/// Copy every field `other` sets
macro_rules! merge_fields {
    ($self:ident, $other:ident, $($field:ident),+ $(,)?) => {
        $(
            if $other.$field.is_some() {
                $self.$field = $other.$field;
            }
        )+
    };
}

impl PersistedConfig {
    pub async fn load() -> Self {
        if !file_exists(CONFIG_FILE).await {
            return Self::default();
        }
        match read_file(CONFIG_FILE).await {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!("ignoring malformed {}: {}", CONFIG_FILE, e);
                Self::default()
            }),
            Err(e) => {
                tracing::warn!("could not read {}: {:#}", CONFIG_FILE, e);
                Self::default()
            }
        }
    }

    pub async fn save(&self) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        write_runtime_file(CONFIG_FILE, &content).await
    }

    pub fn merge(&mut self, other: PersistedConfig) {
        merge_fields!(
            self,
            other,
            provider,
            model,
            base_url,
            max_tokens,
            matcher_max_iterations,
            max_suggestions,
            research_concurrency,
            research_max_iterations,
            assistant_max_iterations,
            obligation_concurrency,
            max_search_results,
            call_timeout_secs,
            searxng_url,
            knowledge_base_url,
            questions_path,
            obligations_path,
        );
    }

    /// Overlay environment variables, looked up through `var`
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        fn number<T: std::str::FromStr>(name: &str, raw: Option<String>) -> Result<Option<T>> {
            match raw {
                Some(raw) => match raw.trim().parse() {
                    Ok(value) => Ok(Some(value)),
                    Err(_) => bail!("{} must be a number, got {:?}", name, raw),
                },
                None => Ok(None),
            }
        }

        let env = PersistedConfig {
            provider: var("COPILOT_PROVIDER"),
            model: var("COPILOT_MODEL"),
            base_url: var("OPENAI_BASE_URL"),
            research_concurrency: number("MAX_CONCURRENT_RESEARCH", var("MAX_CONCURRENT_RESEARCH"))?,
            research_max_iterations: number(
                "MAX_RESEARCH_ITERATIONS",
                var("MAX_RESEARCH_ITERATIONS"),
            )?,
            obligation_concurrency: number(
                "MAX_CONCURRENT_OBLIGATIONS",
                var("MAX_CONCURRENT_OBLIGATIONS"),
            )?,
            call_timeout_secs: number("CALL_TIMEOUT_SECS", var("CALL_TIMEOUT_SECS"))?,
            searxng_url: var("SEARXNG_URL"),
            knowledge_base_url: var("DSA_RETRIEVER_URL"),
            ..Default::default()
        };
        self.merge(env);
        Ok(())
    }

    /// Resolve into the coordinator's configuration
    pub fn to_coordinator_config(&self) -> Result<CoordinatorConfig> {
        let mut config = CoordinatorConfig::default();

        if let Some(id) = &self.provider {
            let provider = LlmProvider::parse(id)
                .with_context(|| format!("unknown provider {:?}", id))?;
            let model = self
                .model
                .clone()
                .unwrap_or_else(|| provider.default_model().to_string());
            config.model = ModelConfig::with_provider(provider, model);
        } else if let Some(model) = &self.model {
            config.model.model = model.clone();
        }
        if let Some(url) = &self.base_url {
            if config.model.provider.supports_base_url() {
                config.model = config.model.with_base_url(url.clone());
            } else {
                tracing::warn!(
                    provider = %config.model.provider.display_name(),
                    "base_url ignored for this provider"
                );
            }
        }
        if let Some(max_tokens) = self.max_tokens {
            config.model.max_tokens = max_tokens;
        }

        if let Some(v) = self.matcher_max_iterations {
            config.matcher_max_iterations = v.max(1);
        }
        if let Some(v) = self.max_suggestions {
            config.max_suggestions = v;
        }
        if let Some(v) = self.research_concurrency {
            config.research_concurrency = v.max(1);
        }
        if let Some(v) = self.research_max_iterations {
            config.research_max_iterations = v.max(1);
        }
        if let Some(v) = self.assistant_max_iterations {
            config.assistant_max_iterations = v.max(1);
        }
        if let Some(v) = self.obligation_concurrency {
            config.obligation_concurrency = v.max(1);
        }
        if let Some(v) = self.max_search_results {
            config.max_search_results = v.max(1);
        }
        if let Some(v) = self.call_timeout_secs {
            config.call_timeout_secs = v;
        }
        config.searxng_url = self.searxng_url.clone();
        config.knowledge_base_url = self.knowledge_base_url.clone();
        config.questions_path = self.questions_path.clone();
        config.obligations_path = self.obligations_path.clone();

        Ok(config)
    }
}

/// Provider listing for clients choosing a model
#[derive(Debug, Serialize, ToSchema)]
pub struct ProviderInfo {
    pub id: String,
    pub name: String,
    pub default_model: String,
    pub supports_base_url: bool,
    pub env_var: String,
}

pub fn provider_info() -> Vec<ProviderInfo> {
    LlmProvider::all()
        .into_iter()
        .map(|p| ProviderInfo {
            id: serde_json::to_value(&p)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_else(|| p.display_name().to_lowercase()),
            name: p.display_name().to_string(),
            default_model: p.default_model().to_string(),
            supports_base_url: p.supports_base_url(),
            env_var: p.api_key_env().to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_merge_keeps_unset_fields() {
        let mut config = PersistedConfig {
            provider: Some("openai".to_string()),
            research_concurrency: Some(10),
            ..Default::default()
        };
        config.merge(PersistedConfig {
            research_concurrency: Some(20),
            searxng_url: Some("http://localhost:8888".to_string()),
            ..Default::default()
        });
        assert_eq!(config.provider.as_deref(), Some("openai"));
        assert_eq!(config.research_concurrency, Some(20));
        assert_eq!(config.searxng_url.as_deref(), Some("http://localhost:8888"));
    }

    #[test]
    fn test_env_overrides_file() {
        let mut config = PersistedConfig {
            obligation_concurrency: Some(4),
            ..Default::default()
        };
        config
            .apply_env(env(&[
                ("MAX_CONCURRENT_OBLIGATIONS", "8"),
                ("DSA_RETRIEVER_URL", "http://retriever:8000"),
                ("MAX_RESEARCH_ITERATIONS", "2"),
            ]))
            .unwrap();
        assert_eq!(config.obligation_concurrency, Some(8));
        assert_eq!(config.research_max_iterations, Some(2));
        assert_eq!(config.knowledge_base_url.as_deref(), Some("http://retriever:8000"));

        let err = config
            .apply_env(env(&[("CALL_TIMEOUT_SECS", "soon")]))
            .unwrap_err();
        assert!(err.to_string().contains("CALL_TIMEOUT_SECS"));
    }

    #[test]
    fn test_to_coordinator_config() {
        let config = PersistedConfig::default().to_coordinator_config().unwrap();
        assert_eq!(config.research_concurrency, 17);
        assert_eq!(config.model.provider, LlmProvider::DeepSeek);

        let config = PersistedConfig {
            provider: Some("openai".to_string()),
            base_url: Some("http://localhost:4000/v1".to_string()),
            research_concurrency: Some(0),
            assistant_max_iterations: Some(0),
            call_timeout_secs: Some(30),
            ..Default::default()
        }
        .to_coordinator_config()
        .unwrap();
        assert_eq!(config.model.provider, LlmProvider::OpenAI);
        assert_eq!(config.model.model, LlmProvider::OpenAI.default_model());
        assert_eq!(config.model.base_url.as_deref(), Some("http://localhost:4000/v1"));
        assert_eq!(config.research_concurrency, 1);
        assert_eq!(config.assistant_max_iterations, 1);
        assert_eq!(config.research_max_iterations, 3);
        assert_eq!(config.call_timeout_secs, 30);

        let err = PersistedConfig {
            provider: Some("mystery".to_string()),
            ..Default::default()
        }
        .to_coordinator_config();
        assert!(err.is_err());
    }

    #[test]
    fn test_provider_info() {
        let providers = provider_info();
        assert_eq!(providers.len(), LlmProvider::all().len());
        assert!(providers
            .iter()
            .any(|p| p.id == "deepseek" && p.env_var == "DEEPSEEK_API_KEY"));
    }
}
