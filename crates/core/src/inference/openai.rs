//! OpenAI-compatible chat completions gateway (OpenAI, DeepSeek, OpenRouter,
//! Grok, local proxies).

use std::collections::VecDeque;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::{json, Value};

use super::{InferenceGateway, InferenceRequest, TokenStream};
use crate::models::ModelConfig;

pub struct OpenAiGateway {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    max_tokens: u32,
}

impl OpenAiGateway {
    pub fn new(config: &ModelConfig) -> Result<Self> {
        let base_url = config.resolved_base_url().with_context(|| {
            format!(
                "{} has no OpenAI-compatible endpoint",
                config.provider.display_name()
            )
        })?;
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", base_url),
            model: config.model.clone(),
            api_key: config.api_key(),
            max_tokens: config.max_tokens,
        })
    }

    fn body(&self, request: &InferenceRequest, stream: bool) -> Value {
        let mut messages = Vec::new();
        if let Some(system) = &request.system {
            messages.push(json!({ "role": "system", "content": system }));
        }
        messages.push(json!({ "role": "user", "content": request.prompt }));

        json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": request.max_tokens.unwrap_or(self.max_tokens),
            "stream": stream,
        })
    }

    async fn send(&self, body: Value) -> Result<reqwest::Response> {
        let mut builder = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .with_context(|| format!("request to {} failed", self.endpoint))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let snippet: String = text.chars().take(300).collect();
            anyhow::bail!("inference endpoint returned {}: {}", status, snippet);
        }
        Ok(response)
    }
}

#[async_trait]
impl InferenceGateway for OpenAiGateway {
    async fn complete(&self, request: InferenceRequest) -> Result<String> {
        let response = self.send(self.body(&request, false)).await?;
        let json: Value = response.json().await.context("invalid completion body")?;

        json.pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .context("completion has no message content")
    }

    async fn stream(&self, request: InferenceRequest) -> Result<TokenStream> {
        let response = self.send(self.body(&request, true)).await?;
        let bytes = response
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()))
            .boxed();

        let state = DecodeState {
            bytes,
            decoder: SseLineDecoder::default(),
            pending: VecDeque::new(),
            finished: false,
        };

        let tokens = stream::unfold(state, |mut st| async move {
            loop {
                if let Some(token) = st.pending.pop_front() {
                    return Some((Ok(token), st));
                }
                if st.finished {
                    return None;
                }
                match st.bytes.next().await {
                    Some(Ok(chunk)) => {
                        let deltas = st.decoder.push(&chunk);
                        st.absorb(deltas);
                    }
                    Some(Err(e)) => {
                        st.finished = true;
                        return Some((Err(anyhow::Error::new(e).context("stream interrupted")), st));
                    }
                    None => {
                        let deltas = st.decoder.finish();
                        st.absorb(deltas);
                        st.finished = true;
                    }
                }
            }
        });

        Ok(tokens.boxed())
    }
}

struct DecodeState {
    bytes: futures::stream::BoxStream<'static, reqwest::Result<Vec<u8>>>,
    decoder: SseLineDecoder,
    pending: VecDeque<String>,
    finished: bool,
}

impl DecodeState {
    fn absorb(&mut self, deltas: Vec<SseDelta>) {
        for delta in deltas {
            match delta {
                SseDelta::Content(text) => self.pending.push_back(text),
                SseDelta::Done => {
                    self.finished = true;
                    break;
                }
            }
        }
    }
}

/// One decoded server-sent record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseDelta {
    Content(String),
    Done,
}

/// Incremental decoder for `data:` lines. Chunk boundaries may fall anywhere,
/// including inside a multi-byte character.
#[derive(Debug, Default)]
pub struct SseLineDecoder {
    buffer: Vec<u8>,
}

impl SseLineDecoder {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseDelta> {
        self.buffer.extend_from_slice(chunk);
        let mut deltas = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(delta) = parse_line(&String::from_utf8_lossy(&line)) {
                deltas.push(delta);
            }
        }
        deltas
    }

    /// Flush a trailing line with no newline
    pub fn finish(&mut self) -> Vec<SseDelta> {
        let line = std::mem::take(&mut self.buffer);
        parse_line(&String::from_utf8_lossy(&line))
            .into_iter()
            .collect()
    }
}

fn parse_line(line: &str) -> Option<SseDelta> {
    let data = line.trim().strip_prefix("data:")?.trim();
    if data == "[DONE]" {
        return Some(SseDelta::Done);
    }
    let json: Value = serde_json::from_str(data).ok()?;
    json.pointer("/choices/0/delta/content")
        .and_then(|c| c.as_str())
        .filter(|c| !c.is_empty())
        .map(|c| SseDelta::Content(c.to_string()))
}
