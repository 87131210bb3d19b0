//! # Search Tools
//!
//! `web_search`: Tavily when `TAVILY_API_KEY` is set, SearXNG otherwise (or
//! when Tavily fails).

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tools::{dedup_sources, SourceCitation, Tool, ToolOutput, WEB_SEARCH};

const TAVILY_ENDPOINT: &str = "https://api.tavily.com/search";

/// Longest snippet kept per hit
const MAX_SNIPPET_CHARS: usize = 600;

/// One search result
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

pub struct WebSearchTool {
    client: reqwest::Client,
    tavily_key: Option<String>,
    searxng_url: Option<String>,
    max_results: usize,
    max_queries: usize,
}

impl WebSearchTool {
    pub fn new(searxng_url: Option<String>, max_results: usize, max_queries: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .user_agent("dsa-copilot/0.1")
            .build()?;
        Ok(Self {
            client,
            tavily_key: std::env::var("TAVILY_API_KEY")
                .ok()
                .filter(|k| !k.trim().is_empty()),
            searxng_url,
            max_results: max_results.max(1),
            max_queries: max_queries.max(1),
        })
    }

    async fn search(&self, query: &str) -> Result<Vec<SearchHit>> {
        if let Some(key) = &self.tavily_key {
            match self.try_tavily(key, query).await {
                Ok(hits) => return Ok(hits),
                Err(e) => tracing::warn!("tavily search failed, falling back: {:#}", e),
            }
        }
        self.try_searxng(query)
            .await
            .context("no search backend available")
    }

    async fn try_tavily(&self, key: &str, query: &str) -> Result<Vec<SearchHit>> {
        let response = self
            .client
            .post(TAVILY_ENDPOINT)
            .json(&json!({
                "api_key": key,
                "query": query,
                "max_results": self.max_results,
                "search_depth": "basic",
            }))
            .send()
            .await?
            .error_for_status()?;
        let body: Value = response.json().await?;
        Ok(parse_tavily(&body))
    }

    async fn try_searxng(&self, query: &str) -> Result<Vec<SearchHit>> {
        // 1. configured instance, 2. public instances, 3. local fallback
        let mut endpoints: Vec<String> = Vec::new();
        if let Some(custom) = &self.searxng_url {
            endpoints.push(format!("{}/search", custom.trim_end_matches('/')));
        }
        endpoints.extend([
            "https://searx.be/search".to_string(),
            "https://search.sapti.me/search".to_string(),
            "https://searx.tiekoetter.com/search".to_string(),
        ]);
        endpoints.push("http://localhost:8888/search".to_string());

        for endpoint in endpoints {
            let url = format!("{}?q={}&format=json", endpoint, urlencoding::encode(query));
            let Ok(response) = self.client.get(&url).send().await else {
                continue;
            };
            if let Ok(body) = response.json::<Value>().await {
                if body.get("results").is_some() {
                    return Ok(parse_searxng(&body, self.max_results));
                }
            }
            tracing::debug!(endpoint, "searxng endpoint returned no usable body");
        }

        anyhow::bail!("all SearXNG endpoints failed")
    }
}

/// Accepts `{"queries": [...]}` or `{"query": "..."}`
pub fn queries_from_input(input: &Value, max: usize) -> Vec<String> {
    let mut queries: Vec<String> = match input.get("queries").and_then(|q| q.as_array()) {
        Some(list) => list
            .iter()
            .filter_map(|q| q.as_str())
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty())
            .collect(),
        None => input
            .get("query")
            .and_then(|q| q.as_str())
            .map(|q| vec![q.trim().to_string()])
            .unwrap_or_default(),
    };
    queries.retain(|q| !q.is_empty());
    queries.truncate(max);
    queries
}

fn str_field<'a>(v: &'a Value, key: &str) -> &'a str {
    v.get(key).and_then(|s| s.as_str()).unwrap_or("")
}

pub fn parse_tavily(body: &Value) -> Vec<SearchHit> {
    body.get("results")
        .and_then(|r| r.as_array())
        .map(|results| {
            results
                .iter()
                .map(|r| SearchHit {
                    title: str_field(r, "title").to_string(),
                    url: str_field(r, "url").to_string(),
                    snippet: str_field(r, "content").to_string(),
                })
                .filter(|h| !h.url.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

pub fn parse_searxng(body: &Value, max_results: usize) -> Vec<SearchHit> {
    body.get("results")
        .and_then(|r| r.as_array())
        .map(|results| {
            results
                .iter()
                .map(|r| SearchHit {
                    title: str_field(r, "title").to_string(),
                    url: str_field(r, "url").to_string(),
                    snippet: str_field(r, "content").to_string(),
                })
                .filter(|h| !h.url.is_empty())
                .take(max_results)
                .collect()
        })
        .unwrap_or_default()
}

/// Render hits as `**Title**\n   URL\n   snippet` blocks
pub fn format_hits(query: &str, hits: &[SearchHit]) -> String {
    let mut out = format!("Results for \"{}\":\n", query);
    if hits.is_empty() {
        out.push_str("No results found.\n");
        return out;
    }
    for (i, hit) in hits.iter().enumerate() {
        let title = if hit.title.trim().is_empty() {
            hit.url.as_str()
        } else {
            hit.title.trim()
        };
        let snippet: String = hit.snippet.chars().take(MAX_SNIPPET_CHARS).collect();
        out.push_str(&format!(
            "{}. **{}**\n   {}\n   {}\n\n",
            i + 1,
            title,
            hit.url,
            snippet.trim()
        ));
    }
    out
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &'static str {
        WEB_SEARCH
    }

    async fn call(&self, input: Value) -> Result<ToolOutput> {
        let queries = queries_from_input(&input, self.max_queries);
        if queries.is_empty() {
            anyhow::bail!("web_search needs a non-empty query");
        }

        let mut content = String::new();
        let mut citations = Vec::new();
        let mut failures = Vec::new();

        for query in &queries {
            match self.search(query).await {
                Ok(hits) => {
                    content.push_str(&format_hits(query, &hits));
                    citations.extend(
                        hits.iter()
                            .map(|h| SourceCitation::new(h.url.as_str(), Some(h.title.as_str()))),
                    );
                }
                Err(e) => failures.push(format!("{}: {:#}", query, e)),
            }
        }

        if failures.len() == queries.len() {
            anyhow::bail!("web search failed: {}", failures.join("; "));
        }

        Ok(ToolOutput {
            content,
            citations: dedup_sources(citations),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queries_from_input() {
        let input = json!({ "queries": ["a", " ", "b", "c"] });
        assert_eq!(queries_from_input(&input, 2), vec!["a", "b"]);
        assert_eq!(queries_from_input(&json!({ "query": " acme " }), 5), vec!["acme"]);
        assert!(queries_from_input(&json!({}), 5).is_empty());
    }

    #[test]
    fn test_parse_tavily() {
        let body = json!({
            "results": [
                { "title": "Acme Corp", "url": "https://acme.example", "content": "Widgets", "score": 0.9 },
                { "title": "No url", "content": "dropped" }
            ]
        });
        let hits = parse_tavily(&body);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].snippet, "Widgets");
    }

    #[test]
    fn test_parse_searxng_limits() {
        let results: Vec<Value> = (0..15)
            .map(|i| json!({ "title": format!("r{}", i), "url": format!("https://r{}.example", i), "content": "" }))
            .collect();
        let hits = parse_searxng(&json!({ "results": results }), 10);
        assert_eq!(hits.len(), 10);
    }

    #[test]
    fn test_format_hits_is_extractable() {
        let hits = vec![SearchHit {
            title: "Acme Corp".to_string(),
            url: "https://acme.example".to_string(),
            snippet: "Makes widgets".to_string(),
        }];
        let text = format_hits("acme", &hits);
        let sources = crate::tools::extract_sources(&text);
        assert_eq!(sources, vec![SourceCitation::new("https://acme.example", Some("Acme Corp"))]);
        assert!(format_hits("nothing", &[]).contains("No results found."));
    }

    #[tokio::test]
    async fn test_empty_query_rejected() {
        let tool = WebSearchTool::new(None, 10, 2).unwrap();
        assert!(tool.call(json!({ "queries": [] })).await.is_err());
    }
}
