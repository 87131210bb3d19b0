//! # Stream Transport
//!
//! Maps one session's event bus onto one outbound connection: a server-sent
//! `data:` record per event (JSON with a `type` discriminator), ending right
//! after `done`. The [`SessionGuard`] travels with the body, so a client
//! disconnect drops it and cancels the session.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};

use axum::response::sse::{Event, KeepAlive, Sse};
use copilot_core::swarm::{EstimatedPhase, EventStream, PhaseEstimator, Session, StreamEvent};
use futures::stream::{self, Stream, StreamExt};
use serde::Serialize;
use utoipa::ToSchema;

struct Tracked {
    session: Session,
    estimator: PhaseEstimator,
}

/// Live sessions, keyed by id
#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<Mutex<HashMap<String, Tracked>>>,
}

/// Snapshot of one live session
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SessionInfo {
    pub id: String,
    pub agent: String,
    pub started_at: String,
    /// Advisory progress estimate; not a completion signal
    pub phase: String,
    pub tool_calls: u32,
    pub llm_calls: u32,
}

fn phase_name(phase: EstimatedPhase) -> String {
    serde_json::to_value(phase)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default()
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a session until the returned guard drops
    pub fn register(&self, session: Session) -> SessionGuard {
        if let Ok(mut sessions) = self.inner.lock() {
            sessions.insert(
                session.id.clone(),
                Tracked {
                    session: session.clone(),
                    estimator: PhaseEstimator::new(),
                },
            );
        }
        tracing::debug!(session = %session.id, agent = %session.kind, "session registered");
        SessionGuard {
            session,
            registry: self.clone(),
        }
    }

    pub fn observe(&self, id: &str, event: &StreamEvent) {
        if let Ok(mut sessions) = self.inner.lock() {
            if let Some(tracked) = sessions.get_mut(id) {
                tracked.estimator.observe(event);
            }
        }
    }

    pub fn list(&self) -> Vec<SessionInfo> {
        let mut infos: Vec<SessionInfo> = match self.inner.lock() {
            Ok(sessions) => sessions.values().map(Tracked::info).collect(),
            Err(_) => Vec::new(),
        };
        infos.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        infos
    }

    pub fn get(&self, id: &str) -> Option<SessionInfo> {
        self.inner.lock().ok()?.get(id).map(Tracked::info)
    }

    /// Inbound cancellation. Returns false for unknown ids.
    pub fn cancel(&self, id: &str) -> bool {
        let Ok(sessions) = self.inner.lock() else {
            return false;
        };
        match sessions.get(id) {
            Some(tracked) => {
                tracked.session.cancel();
                tracing::info!(session = %id, "session cancelled by client");
                true
            }
            None => false,
        }
    }

    fn remove(&self, id: &str) {
        if let Ok(mut sessions) = self.inner.lock() {
            sessions.remove(id);
        }
    }
}

impl Tracked {
    fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.session.id.clone(),
            agent: self.session.kind.to_string(),
            started_at: self.session.started_at.to_rfc3339(),
            phase: phase_name(self.estimator.phase),
            tool_calls: self.estimator.tool_starts,
            llm_calls: self.estimator.llm_starts,
        }
    }
}

/// Cancels and deregisters its session when dropped
pub struct SessionGuard {
    session: Session,
    registry: SessionRegistry,
}

impl SessionGuard {
    pub fn session(&self) -> &Session {
        &self.session
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.session.cancel();
        self.registry.remove(&self.session.id);
        tracing::debug!(session = %self.session.id, "session closed");
    }
}

/// The session's events in receipt order, ending after `done`.
/// The guard lives exactly as long as the returned stream.
pub fn records(events: EventStream, guard: SessionGuard) -> impl Stream<Item = StreamEvent> + Send {
    stream::unfold((events, guard), |(mut events, guard)| async move {
        let event = events.recv().await?;
        guard.registry.observe(&guard.session.id, &event);
        Some((event, (events, guard)))
    })
}

/// SSE response for one session
pub fn sse(
    events: EventStream,
    guard: SessionGuard,
) -> Sse<impl Stream<Item = Result<Event, Infallible>> + Send> {
    let stream = records(events, guard).map(|event| Ok(Event::default().data(event.to_json())));
    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use copilot_core::swarm::{AgentKind, EventBus};

    fn open(registry: &SessionRegistry) -> (String, copilot_core::swarm::Emitter, EventStream, SessionGuard) {
        let session = Session::new(AgentKind::CompanyResearcher);
        let id = session.id.clone();
        let (emitter, events) = EventBus::channel(16, session.kind, session.cancel_token());
        let guard = registry.register(session);
        (id, emitter, events, guard)
    }

    #[tokio::test]
    async fn test_stream_ends_after_done_and_deregisters() {
        let registry = SessionRegistry::new();
        let (id, emitter, events, guard) = open(&registry);
        assert!(registry.get(&id).is_some());

        emitter.tool_start("web_search", "q01", "{}".to_string()).await;
        emitter.llm_start("q01").await;
        emitter.llm_start("q01").await;
        emitter.done().await;
        emitter.token("q01", "late").await;

        let mut stream = Box::pin(records(events, guard));
        let mut seen = Vec::new();
        while let Some(event) = stream.next().await {
            if seen.len() == 2 {
                // Estimate reflects the events relayed so far
                let info = registry.get(&id).unwrap();
                assert_eq!(info.tool_calls, 1);
                assert_eq!(info.llm_calls, 2);
                assert_eq!(info.phase, "analysis");
            }
            seen.push(event.type_name());
        }
        assert_eq!(seen, vec!["tool_start", "llm_start", "llm_start", "done"]);

        drop(stream);
        assert!(registry.get(&id).is_none());
        assert!(registry.list().is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_cancels_session() {
        let registry = SessionRegistry::new();
        let (id, emitter, events, guard) = open(&registry);
        let session = guard.session().clone();

        emitter.phase_start("research").await;
        let mut stream = Box::pin(records(events, guard));
        assert_eq!(stream.next().await.map(|e| e.type_name()), Some("phase_start"));

        // Client goes away mid-session
        drop(stream);
        assert!(session.is_cancelled());
        assert!(registry.get(&id).is_none());
        assert!(!emitter.phase_end("research").await);
    }

    #[tokio::test]
    async fn test_inbound_cancel() {
        let registry = SessionRegistry::new();
        let (id, emitter, events, guard) = open(&registry);
        assert_eq!(registry.list().len(), 1);

        emitter.phase_start("research").await;
        assert!(registry.cancel(&id));
        assert!(!registry.cancel("missing"));

        let seen: Vec<_> = records(events, guard).collect().await;
        assert!(matches!(seen.last(), Some(StreamEvent::Done)));
        assert!(!seen.iter().any(|e| matches!(e, StreamEvent::Error { .. })));
        assert!(registry.list().is_empty());
    }
}
