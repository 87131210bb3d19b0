//! # Advisory Progress Estimate
//!
//! A cosmetic guess at which phase a research session is in, derived from
//! counting tool starts against reasoning starts on the bus. Nothing in the
//! core reads it back; it is only reported to clients.

use serde::Serialize;

use super::events::StreamEvent;

/// Tool starts after which the run is assumed to be summarizing
const TOOL_CALL_THRESHOLD: u32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimatedPhase {
    Starting,
    Research,
    Analysis,
    Finished,
}

#[derive(Debug, Clone, Serialize)]
pub struct PhaseEstimator {
    pub phase: EstimatedPhase,
    pub tool_starts: u32,
    pub llm_starts: u32,
}

impl Default for PhaseEstimator {
    fn default() -> Self {
        Self {
            phase: EstimatedPhase::Starting,
            tool_starts: 0,
            llm_starts: 0,
        }
    }
}

impl PhaseEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one event, returning the (possibly unchanged) estimate
    pub fn observe(&mut self, event: &StreamEvent) -> EstimatedPhase {
        match event {
            StreamEvent::ToolStart { .. } => self.tool_starts += 1,
            StreamEvent::LlmStart { .. } => self.llm_starts += 1,
            StreamEvent::Done | StreamEvent::Error { .. } => {
                self.phase = EstimatedPhase::Finished;
                return self.phase;
            }
            _ => return self.phase,
        }

        if self.phase == EstimatedPhase::Finished {
            return self.phase;
        }
        self.phase = if self.tool_starts >= TOOL_CALL_THRESHOLD
            || (self.tool_starts > 0 && self.llm_starts > self.tool_starts)
        {
            EstimatedPhase::Analysis
        } else {
            EstimatedPhase::Research
        };
        self.phase
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::swarm::events::AgentKind;

    fn tool_start() -> StreamEvent {
        StreamEvent::ToolStart {
            name: "web_search".to_string(),
            node: "research".to_string(),
            input: String::new(),
            agent: AgentKind::CompanyResearcher,
        }
    }

    fn llm_start() -> StreamEvent {
        StreamEvent::LlmStart {
            node: "research".to_string(),
            agent: AgentKind::CompanyResearcher,
        }
    }

    #[test]
    fn test_research_then_analysis() {
        let mut estimator = PhaseEstimator::new();
        assert_eq!(estimator.phase, EstimatedPhase::Starting);

        assert_eq!(estimator.observe(&tool_start()), EstimatedPhase::Research);
        assert_eq!(estimator.observe(&llm_start()), EstimatedPhase::Research);
        assert_eq!(estimator.observe(&llm_start()), EstimatedPhase::Analysis);
    }

    #[test]
    fn test_threshold_forces_analysis() {
        let mut estimator = PhaseEstimator::new();
        for _ in 0..29 {
            estimator.observe(&tool_start());
        }
        assert_eq!(estimator.phase, EstimatedPhase::Research);
        assert_eq!(estimator.observe(&tool_start()), EstimatedPhase::Analysis);
    }

    #[test]
    fn test_done_finishes() {
        let mut estimator = PhaseEstimator::new();
        estimator.observe(&tool_start());
        assert_eq!(estimator.observe(&StreamEvent::Done), EstimatedPhase::Finished);
        assert_eq!(estimator.observe(&tool_start()), EstimatedPhase::Finished);
    }
}
