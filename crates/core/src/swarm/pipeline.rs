//! # Resolution Pipeline
//!
//! The entity-resolution state machine. A finite set of states with a hard
//! iteration cap; the matcher drives it, this type only decides transitions.
//!
//! ```text
//! searching → evaluating → resolved
//!     ▲           │      → ambiguous
//!     └───────────┘      → exhausted (cap reached)
//! ```

use serde::{Deserialize, Serialize};

/// State of an entity resolution run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionState {
    /// Running a web search
    Searching,
    /// Asking the model to judge the results
    Evaluating,
    /// Exactly one canonical identity found
    Resolved,
    /// Plausible candidates, none exact
    Ambiguous,
    /// Iteration cap reached without candidates
    Exhausted,
}

impl ResolutionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionState::Searching => "searching",
            ResolutionState::Evaluating => "evaluating",
            ResolutionState::Resolved => "resolved",
            ResolutionState::Ambiguous => "ambiguous",
            ResolutionState::Exhausted => "exhausted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ResolutionState::Resolved | ResolutionState::Ambiguous | ResolutionState::Exhausted
        )
    }
}

/// What the evaluator concluded about one round of results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Exact,
    Candidates,
    None,
}

/// The resolution state machine
#[derive(Debug, Clone)]
pub struct ResolutionPipeline {
    /// Current state
    pub state: ResolutionState,
    /// Completed search rounds
    pub iterations: u32,
    /// Hard cap on search rounds
    pub max_iterations: u32,
}

impl Default for ResolutionPipeline {
    fn default() -> Self {
        Self::new(5)
    }
}

impl ResolutionPipeline {
    pub fn new(max_iterations: u32) -> Self {
        Self {
            state: ResolutionState::Searching,
            iterations: 0,
            max_iterations: max_iterations.max(1),
        }
    }

    /// Search round finished; move on to evaluation
    pub fn searched(&mut self) {
        if self.state == ResolutionState::Searching {
            self.iterations += 1;
            self.state = ResolutionState::Evaluating;
        }
    }

    /// Apply the evaluator's verdict. Returns the new state.
    pub fn evaluate(&mut self, verdict: Verdict) -> ResolutionState {
        if self.state != ResolutionState::Evaluating {
            return self.state;
        }
        self.state = match verdict {
            Verdict::Exact => ResolutionState::Resolved,
            Verdict::Candidates => ResolutionState::Ambiguous,
            Verdict::None if self.iterations >= self.max_iterations => ResolutionState::Exhausted,
            Verdict::None => ResolutionState::Searching,
        };
        self.state
    }

    /// Rounds left before exhaustion
    pub fn remaining(&self) -> u32 {
        self.max_iterations.saturating_sub(self.iterations)
    }
}
