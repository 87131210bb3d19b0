//! # Event Bus
//!
//! Many producers (the session driver and every running unit) share cloned
//! [`Emitter`]s over one bounded channel; the single [`EventStream`] consumer
//! drains it in receipt order and enforces the terminal contract:
//!
//! - at most one `result`
//! - after `error`, nothing but `done`
//! - `done` is always the last record
//! - producers vanishing without a terminal record yield `error` + `done`
//! - cancellation yields a synthetic `done` and closes the channel

use futures::stream::{self, Stream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::events::{AgentKind, AgentOutput, StreamEvent};
use crate::tools::SourceCitation;

/// Constructor for per-session channels
pub struct EventBus;

impl EventBus {
    /// Open a bus with a bounded buffer. Producers block once `capacity`
    /// events are pending; nothing is dropped.
    pub fn channel(
        capacity: usize,
        agent: AgentKind,
        cancel: CancellationToken,
    ) -> (Emitter, EventStream) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let emitter = Emitter {
            tx,
            agent,
            cancel: cancel.clone(),
        };
        let stream = EventStream {
            rx,
            cancel,
            result_seen: false,
            errored: false,
            finished: false,
        };
        (emitter, stream)
    }
}

/// Producer handle. Cheap to clone, one per concurrent task.
#[derive(Clone)]
pub struct Emitter {
    tx: mpsc::Sender<StreamEvent>,
    agent: AgentKind,
    cancel: CancellationToken,
}

impl Emitter {
    pub fn agent(&self) -> AgentKind {
        self.agent
    }

    /// Enqueue an event, waiting for buffer space. Returns `false` once the
    /// session is cancelled or the consumer is gone.
    pub async fn emit(&self, event: StreamEvent) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            sent = self.tx.send(event) => sent.is_ok(),
        }
    }

    pub async fn token(&self, node: &str, content: impl Into<String>) -> bool {
        self.emit(StreamEvent::Token {
            content: content.into(),
            node: node.to_string(),
            agent: self.agent,
        })
        .await
    }

    pub async fn llm_start(&self, node: &str) -> bool {
        self.emit(StreamEvent::LlmStart {
            node: node.to_string(),
            agent: self.agent,
        })
        .await
    }

    pub async fn tool_start(&self, name: &str, node: &str, input: String) -> bool {
        self.emit(StreamEvent::ToolStart {
            name: name.to_string(),
            node: node.to_string(),
            input,
            agent: self.agent,
        })
        .await
    }

    pub async fn tool_end(
        &self,
        name: &str,
        node: &str,
        output_length: usize,
        sources: Vec<SourceCitation>,
        error: Option<String>,
    ) -> bool {
        self.emit(StreamEvent::ToolEnd {
            name: name.to_string(),
            node: node.to_string(),
            output_length,
            sources,
            error,
            agent: self.agent,
        })
        .await
    }

    pub async fn phase_start(&self, phase: &str) -> bool {
        self.emit(StreamEvent::PhaseStart {
            phase: phase.to_string(),
            agent: self.agent,
        })
        .await
    }

    pub async fn phase_end(&self, phase: &str) -> bool {
        self.emit(StreamEvent::PhaseEnd {
            phase: phase.to_string(),
            agent: self.agent,
        })
        .await
    }

    pub async fn result(&self, data: AgentOutput) -> bool {
        self.emit(StreamEvent::Result { data }).await
    }

    pub async fn error(&self, message: impl Into<String>) -> bool {
        self.emit(StreamEvent::Error {
            message: message.into(),
        })
        .await
    }

    pub async fn done(&self) -> bool {
        self.emit(StreamEvent::Done).await
    }
}

/// Single consumer side of a session bus
pub struct EventStream {
    rx: mpsc::Receiver<StreamEvent>,
    cancel: CancellationToken,
    result_seen: bool,
    errored: bool,
    finished: bool,
}

impl EventStream {
    /// Next event in receipt order, or `None` after the terminal `done`.
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        if self.finished {
            return None;
        }

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    tracing::debug!("event bus closed by cancellation");
                    return Some(self.finish());
                }
                event = self.rx.recv() => event,
            };

            match next {
                None => {
                    if self.errored || self.result_seen {
                        return Some(self.finish());
                    }
                    self.errored = true;
                    return Some(StreamEvent::Error {
                        message: "session ended without a terminal event".to_string(),
                    });
                }
                Some(StreamEvent::Done) => return Some(self.finish()),
                Some(event @ StreamEvent::Error { .. }) => {
                    if self.errored {
                        continue;
                    }
                    self.errored = true;
                    return Some(event);
                }
                Some(event @ StreamEvent::Result { .. }) => {
                    if self.errored || self.result_seen {
                        tracing::warn!("dropping duplicate or late result event");
                        continue;
                    }
                    self.result_seen = true;
                    return Some(event);
                }
                Some(event) => {
                    if self.errored {
                        continue;
                    }
                    return Some(event);
                }
            }
        }
    }

    fn finish(&mut self) -> StreamEvent {
        self.finished = true;
        self.rx.close();
        StreamEvent::Done
    }

    /// Drain every remaining event, including the terminal `done`
    pub async fn collect(mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.recv().await {
            events.push(event);
        }
        events
    }

    /// Adapt into a `Stream` that ends right after `done`
    pub fn into_stream(self) -> impl Stream<Item = StreamEvent> + Send + 'static {
        stream::unfold(self, |mut bus| async move {
            let event = bus.recv().await?;
            Some((event, bus))
        })
    }
}
