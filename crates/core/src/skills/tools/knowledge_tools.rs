//! # Knowledge Tools
//!
//! `retrieve_dsa_knowledge`: client for the regulation retriever service
//! (`POST {url}/query`).

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::tools::{SourceCitation, Tool, ToolOutput, KNOWLEDGE_BASE};

/// Official text of Regulation (EU) 2022/2065
const REGULATION_URL: &str =
    "https://eur-lex.europa.eu/legal-content/EN/TXT/?uri=CELEX:32022R2065";

const DEFAULT_LIMIT: u64 = 5;

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct KnowledgeChunk {
    pub id: String,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub section: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub chunk_type: String,
    #[serde(default)]
    pub score: f64,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    results: Vec<KnowledgeChunk>,
}

pub struct KnowledgeBaseTool {
    client: reqwest::Client,
    endpoint: String,
}

impl KnowledgeBaseTool {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/query", base_url.trim_end_matches('/')),
        })
    }
}

pub fn format_chunks(chunks: &[KnowledgeChunk]) -> (String, Vec<SourceCitation>) {
    let mut content = String::new();
    let mut citations = Vec::new();

    for chunk in chunks {
        let url = format!("{}#{}", REGULATION_URL, chunk.id);
        let heading = if chunk.section.is_empty() {
            chunk.title.clone()
        } else {
            format!("{} ({})", chunk.title, chunk.section)
        };
        content.push_str(&format!("**{}**\n   {}\n   {}\n\n", heading, url, chunk.content.trim()));
        citations.push(SourceCitation::new(url, Some(chunk.title.as_str())));
    }

    if content.is_empty() {
        content.push_str("No matching passages in the regulation.\n");
    }
    (content, citations)
}

#[async_trait]
impl Tool for KnowledgeBaseTool {
    fn name(&self) -> &'static str {
        KNOWLEDGE_BASE
    }

    async fn call(&self, input: Value) -> Result<ToolOutput> {
        let query = input
            .get("query")
            .and_then(|q| q.as_str())
            .filter(|q| !q.trim().is_empty())
            .context("retrieve_dsa_knowledge needs a query")?;

        let mut body = json!({
            "query": query,
            "limit": input.get("limit").and_then(|l| l.as_u64()).unwrap_or(DEFAULT_LIMIT),
        });
        for key in ["category", "chunk_type"] {
            if let Some(v) = input.get(key).and_then(|v| v.as_str()) {
                body[key] = json!(v);
            }
        }

        let response: QueryResponse = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("knowledge base unreachable at {}", self.endpoint))?
            .error_for_status()?
            .json()
            .await
            .context("invalid knowledge base response")?;

        let (content, citations) = format_chunks(&response.results);
        Ok(ToolOutput { content, citations })
    }
}
