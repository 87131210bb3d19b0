//! Scripted doubles for the capability interfaces, shared by unit tests.

use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};

use crate::inference::{InferenceGateway, InferenceRequest, TokenStream};
use crate::swarm::bus::{EventBus, EventStream};
use crate::swarm::events::{AgentKind, StreamEvent};
use crate::swarm::session::{Session, SessionContext};
use crate::tools::{ToolCall, ToolInvoker, ToolOutput};

type Reply = dyn Fn(&InferenceRequest) -> Result<String> + Send + Sync;

/// Gateway answering from a closure over the request
pub struct ScriptedGateway {
    reply: Box<Reply>,
    chunk_chars: Option<usize>,
    pub prompts: Mutex<Vec<String>>,
}

impl ScriptedGateway {
    pub fn new(reply: impl Fn(&InferenceRequest) -> Result<String> + Send + Sync + 'static) -> Self {
        Self {
            reply: Box::new(reply),
            chunk_chars: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Stream replies in chunks of `n` characters
    pub fn chunked(mut self, n: usize) -> Self {
        self.chunk_chars = Some(n.max(1));
        self
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().map(|p| p.len()).unwrap_or(0)
    }
}

#[async_trait]
impl InferenceGateway for ScriptedGateway {
    async fn complete(&self, request: InferenceRequest) -> Result<String> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(request.prompt.clone());
        }
        (self.reply)(&request)
    }

    async fn stream(&self, request: InferenceRequest) -> Result<TokenStream> {
        let text = self.complete(request).await?;
        let chunks: Vec<Result<String>> = match self.chunk_chars {
            Some(n) => text
                .chars()
                .collect::<Vec<_>>()
                .chunks(n)
                .map(|c| Ok(c.iter().collect()))
                .collect(),
            None => vec![Ok(text)],
        };
        Ok(stream::iter(chunks).boxed())
    }
}

type Respond = dyn Fn(&ToolCall) -> Result<ToolOutput> + Send + Sync;
type Hang = dyn Fn(&ToolCall) -> bool + Send + Sync;

/// Tool invoker answering from a closure; selected calls can hang forever
pub struct ScriptedTools {
    respond: Box<Respond>,
    hang: Option<Box<Hang>>,
    supported: Option<Vec<&'static str>>,
    pub calls: Mutex<Vec<ToolCall>>,
}

impl ScriptedTools {
    pub fn new(respond: impl Fn(&ToolCall) -> Result<ToolOutput> + Send + Sync + 'static) -> Self {
        Self {
            respond: Box::new(respond),
            hang: None,
            supported: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn hang_when(mut self, hang: impl Fn(&ToolCall) -> bool + Send + Sync + 'static) -> Self {
        self.hang = Some(Box::new(hang));
        self
    }

    /// Restrict `supports` to these tool names
    pub fn only(mut self, names: Vec<&'static str>) -> Self {
        self.supported = Some(names);
        self
    }

    pub fn count(&self, name: &str) -> usize {
        self.calls
            .lock()
            .map(|c| c.iter().filter(|call| call.name == name).count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl ToolInvoker for ScriptedTools {
    async fn invoke(&self, call: ToolCall) -> Result<ToolOutput> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call.clone());
        }
        if self.hang.as_ref().is_some_and(|hang| hang(&call)) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        (self.respond)(&call)
    }

    fn supports(&self, name: &str) -> bool {
        self.supported
            .as_ref()
            .map_or(true, |names| names.contains(&name))
    }
}

/// A session context plus the consumer end of its bus
pub fn session(kind: AgentKind, timeout: Duration) -> (Session, SessionContext, EventStream) {
    let session = Session::new(kind);
    let (emitter, stream) = EventBus::channel(4096, kind, session.cancel_token());
    let ctx = SessionContext::new(&session, emitter, timeout);
    (session, ctx, stream)
}

/// Close the bus with `done` and collect everything the agent emitted
pub async fn drain(ctx: SessionContext, stream: EventStream) -> Vec<StreamEvent> {
    ctx.emitter.done().await;
    drop(ctx);
    stream.collect().await
}

pub fn count(events: &[StreamEvent], type_name: &str) -> usize {
    events.iter().filter(|e| e.type_name() == type_name).count()
}
