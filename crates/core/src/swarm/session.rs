//! # Sessions
//!
//! One client-visible run of one agent, with its own event bus and
//! cancellation scope.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::bus::Emitter;
use super::events::AgentKind;
use super::scheduler::BoundedScheduler;
use crate::error::{CopilotError, CopilotResult};

/// A running session
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: String,
    pub kind: AgentKind,
    pub started_at: DateTime<Utc>,
    #[serde(skip)]
    cancel: CancellationToken,
}

impl Session {
    pub fn new(kind: AgentKind) -> Self {
        Self {
            id: session_id(),
            kind,
            started_at: Utc::now(),
            cancel: CancellationToken::new(),
        }
    }

    /// Signal every outstanding unit of this session to stop
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

/// What an agent needs from its session while running
#[derive(Clone)]
pub struct SessionContext {
    pub session_id: String,
    pub emitter: Emitter,
    pub cancel: CancellationToken,
    /// Timeout applied to every external call
    pub call_timeout: Duration,
}

impl SessionContext {
    pub fn new(session: &Session, emitter: Emitter, call_timeout: Duration) -> Self {
        Self {
            session_id: session.id.clone(),
            emitter,
            cancel: session.cancel_token(),
            call_timeout,
        }
    }

    /// Fail fast once the session is cancelled
    pub fn check(&self) -> CopilotResult<()> {
        if self.cancel.is_cancelled() {
            Err(CopilotError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Race `fut` against cancellation, abandoning it if the session stops
    pub async fn until_cancelled<F: Future>(&self, fut: F) -> CopilotResult<F::Output> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(CopilotError::Cancelled),
            output = fut => Ok(output),
        }
    }

    /// A scheduler sharing this session's cancellation scope
    pub fn scheduler(&self, limit: usize) -> BoundedScheduler {
        BoundedScheduler::new(limit, self.cancel.clone())
    }
}

/// Time-ordered, mostly unique id (not cryptographic)
fn session_id() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_nanos();
    format!("{:x}-{:08x}", nanos, rand_u32())
}

fn rand_u32() -> u32 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};
    RandomState::new().build_hasher().finish() as u32
}
