//! # Matcher Skill
//!
//! Entity resolution: turns a free-text organization name plus jurisdiction
//! into a canonical identity by alternating web searches and model
//! judgments, driven by [`ResolutionPipeline`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{CopilotError, CopilotResult};
use crate::inference::{InferenceGateway, InferenceRequest};
use crate::skills::artifact_registry::{CompanyMatch, CompanyMatchResult, MatchConfidence};
use crate::skills::llm_helpers::{parse_json_reply, stream_reply};
use crate::skills::prompts;
use crate::swarm::pipeline::{ResolutionPipeline, ResolutionState, Verdict};
use crate::swarm::session::SessionContext;
use crate::tools::{invoke_tool, ToolCall, ToolInvoker, WEB_SEARCH};

/// Output limit of one evaluation reply
const EVALUATE_MAX_TOKENS: u32 = 2000;

/// Input of entity resolution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchRequest {
    pub company_name: String,
    pub country_of_establishment: String,
}

impl MatchRequest {
    pub fn validate(&self) -> CopilotResult<()> {
        if self.company_name.trim().is_empty() {
            return Err(CopilotError::InvalidInput(
                "company_name is required".to_string(),
            ));
        }
        if self.country_of_establishment.trim().is_empty() {
            return Err(CopilotError::InvalidInput(
                "country_of_establishment is required".to_string(),
            ));
        }
        Ok(())
    }
}

/// Model judgment of one search round
#[derive(Debug, Deserialize)]
struct Evaluation {
    verdict: Verdict,
    #[serde(default)]
    exact_match: Option<CompanyMatch>,
    #[serde(default)]
    suggestions: Vec<CompanyMatch>,
    #[serde(default)]
    refined_query: Option<String>,
}

impl Evaluation {
    fn nothing() -> Self {
        Self {
            verdict: Verdict::None,
            exact_match: None,
            suggestions: Vec::new(),
            refined_query: None,
        }
    }

    /// Downgrade verdicts that lack the data they claim
    fn normalized(mut self) -> Self {
        if self.verdict == Verdict::Exact && self.exact_match.is_none() {
            self.verdict = Verdict::Candidates;
        }
        if self.verdict == Verdict::Candidates && self.suggestions.is_empty() {
            self.verdict = Verdict::None;
        }
        self
    }
}

pub struct MatcherSkill {
    gateway: Arc<dyn InferenceGateway>,
    tools: Arc<dyn ToolInvoker>,
    max_iterations: u32,
    max_suggestions: usize,
    max_queries: usize,
    max_results: usize,
}

impl MatcherSkill {
    pub fn new(gateway: Arc<dyn InferenceGateway>, tools: Arc<dyn ToolInvoker>) -> Self {
        Self {
            gateway,
            tools,
            max_iterations: 5,
            max_suggestions: 3,
            max_queries: 5,
            max_results: 10,
        }
    }

    pub fn with_limits(
        mut self,
        max_iterations: u32,
        max_suggestions: usize,
        max_queries: usize,
        max_results: usize,
    ) -> Self {
        self.max_iterations = max_iterations;
        self.max_suggestions = max_suggestions;
        self.max_queries = max_queries;
        self.max_results = max_results;
        self
    }

    #[tracing::instrument(skip_all, fields(session = %ctx.session_id, company = %request.company_name))]
    pub async fn run(
        &self,
        ctx: &SessionContext,
        request: &MatchRequest,
    ) -> CopilotResult<CompanyMatchResult> {
        request.validate()?;
        let name = request.company_name.trim();
        let country = request.country_of_establishment.trim();
        let emitter = &ctx.emitter;

        let mut pipeline = ResolutionPipeline::new(self.max_iterations);
        let mut queries = self.initial_queries(name, country);

        loop {
            ctx.check()?;

            emitter.phase_start(ResolutionState::Searching.as_str()).await;
            let call = ToolCall::new(
                WEB_SEARCH,
                json!({ "queries": queries, "max_results": self.max_results }),
            );
            let search = ctx
                .until_cancelled(invoke_tool(
                    self.tools.as_ref(),
                    call,
                    emitter,
                    "searching",
                    ctx.call_timeout,
                ))
                .await?;
            emitter.phase_end(ResolutionState::Searching.as_str()).await;
            pipeline.searched();

            let evaluation = match search {
                Ok(output) => {
                    emitter.phase_start(ResolutionState::Evaluating.as_str()).await;
                    let evaluation = self
                        .evaluate(ctx, name, country, &pipeline, &output.content)
                        .await?;
                    emitter.phase_end(ResolutionState::Evaluating.as_str()).await;
                    evaluation
                }
                Err(e) => {
                    tracing::warn!(round = pipeline.iterations, "search round failed: {:#}", e);
                    Evaluation::nothing()
                }
            };

            let state = pipeline.evaluate(evaluation.verdict);
            if !state.is_terminal() {
                tracing::debug!(
                    round = pipeline.iterations,
                    remaining = pipeline.remaining(),
                    "no match yet, refining query"
                );
                queries = self.refined_queries(
                    name,
                    country,
                    pipeline.iterations,
                    evaluation.refined_query,
                );
                continue;
            }

            let result = match state {
                ResolutionState::Resolved => {
                    let Some(mut exact) = evaluation.exact_match else {
                        // normalized() guarantees a match for an exact verdict
                        return Err(CopilotError::Internal(anyhow::anyhow!(
                            "resolved without a match"
                        )));
                    };
                    exact.confidence = MatchConfidence::Exact;
                    CompanyMatchResult::resolved(
                        name,
                        exact,
                        evaluation.suggestions,
                        self.max_suggestions,
                    )
                }
                ResolutionState::Ambiguous => {
                    CompanyMatchResult::candidates(name, evaluation.suggestions, self.max_suggestions)
                }
                ResolutionState::Exhausted
                | ResolutionState::Searching
                | ResolutionState::Evaluating => CompanyMatchResult::not_found(name),
            };

            tracing::info!(state = state.as_str(), rounds = pipeline.iterations, "resolution finished");
            emitter.phase_start(state.as_str()).await;
            emitter.phase_end(state.as_str()).await;
            return Ok(result);
        }
    }

    async fn evaluate(
        &self,
        ctx: &SessionContext,
        name: &str,
        country: &str,
        pipeline: &ResolutionPipeline,
        results: &str,
    ) -> CopilotResult<Evaluation> {
        let iteration = pipeline.iterations;
        let prompt = prompts::render(
            prompts::MATCHER_EVALUATE,
            &[
                ("company_name", name),
                ("country", country),
                ("iteration", &iteration.to_string()),
                ("max_iterations", &pipeline.max_iterations.to_string()),
                ("remaining", &pipeline.remaining().to_string()),
                ("results", results),
            ],
        );
        let request = InferenceRequest::new(prompt)
            .with_system(prompts::SYSTEM)
            .with_max_tokens(EVALUATE_MAX_TOKENS);

        let reply = ctx
            .until_cancelled(stream_reply(
                self.gateway.as_ref(),
                request,
                &ctx.emitter,
                "evaluating",
                ctx.call_timeout,
            ))
            .await?;

        let evaluation = reply
            .and_then(|text| parse_json_reply::<Evaluation>(&text))
            .map(Evaluation::normalized)
            .unwrap_or_else(|e| {
                tracing::warn!(round = iteration, "evaluation unusable, treating as no match: {:#}", e);
                Evaluation::nothing()
            });
        Ok(evaluation)
    }

    fn initial_queries(&self, name: &str, country: &str) -> Vec<String> {
        let mut queries = vec![
            format!("{} {} official website", name, country),
            format!("{} company {}", name, country),
        ];
        queries.truncate(self.max_queries.max(1));
        queries
    }

    fn refined_queries(
        &self,
        name: &str,
        country: &str,
        iteration: u32,
        refined: Option<String>,
    ) -> Vec<String> {
        let mut queries: Vec<String> = refined
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty())
            .into_iter()
            .collect();
        let fallback = match iteration {
            1 => format!("\"{}\" {}", name, country),
            2 => format!("{} headquarters registered office", name),
            3 => format!("{} legal entity company register {}", name, country),
            _ => name.to_string(),
        };
        queries.push(fallback);
        queries.truncate(self.max_queries.max(1));
        queries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::swarm::events::{AgentKind, StreamEvent};
    use crate::testing::{self, ScriptedGateway, ScriptedTools};
    use crate::tools::{SourceCitation, ToolOutput};

    fn search_results() -> ScriptedTools {
        ScriptedTools::new(|_| {
            Ok(ToolOutput {
                content: "1. **Acme Corp**\n   https://acme.example\n   Acme Corp, Brussels".to_string(),
                citations: vec![SourceCitation::new("https://acme.example", Some("Acme Corp"))],
            })
        })
    }

    fn request(name: &str) -> MatchRequest {
        MatchRequest {
            company_name: name.to_string(),
            country_of_establishment: "Belgium".to_string(),
        }
    }

    fn phases(events: &[StreamEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::PhaseStart { phase, .. } => Some(phase.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_exact_match_resolves() {
        let gateway = Arc::new(ScriptedGateway::new(|_| {
            Ok(r#"{"verdict":"exact","exact_match":{"name":"Acme Corp","url":"https://acme.example","confidence":"high"},"suggestions":[]}"#.to_string())
        }).chunked(16));
        let tools = Arc::new(search_results());
        let skill = MatcherSkill::new(gateway, tools.clone());
        let (_session, ctx, stream) = testing::session(AgentKind::CompanyMatcher, Duration::from_secs(5));

        let result = skill.run(&ctx, &request("Acme Corp")).await.unwrap();
        let events = testing::drain(ctx, stream).await;

        let exact = result.exact_match.unwrap();
        assert_eq!(exact.name, "Acme Corp");
        assert_eq!(exact.confidence, MatchConfidence::Exact);
        assert!(result.suggestions.is_empty());
        assert_eq!(tools.count(WEB_SEARCH), 1);
        assert_eq!(phases(&events), vec!["searching", "evaluating", "resolved"]);
        assert_eq!(testing::count(&events, "tool_start"), 1);
        assert_eq!(testing::count(&events, "tool_end"), 1);
        assert!(testing::count(&events, "token") > 1);
    }

    #[tokio::test]
    async fn test_exact_match_keeps_ranked_suggestions() {
        let gateway = Arc::new(ScriptedGateway::new(|_| {
            Ok(r#"{"verdict":"exact",
                "exact_match":{"name":"Acme Corp","url":"https://acme.example","confidence":"high"},
                "suggestions":[
                    {"name":"Acme Labs","url":"https://labs.example","confidence":"low"},
                    {"name":"Acme Corp","url":"https://acme.example","confidence":"high"},
                    {"name":"Acme Holding","url":"https://holding.example","confidence":"medium"}
                ]}"#.to_string())
        }));
        let skill = MatcherSkill::new(gateway, Arc::new(search_results()));
        let (_session, ctx, _stream) = testing::session(AgentKind::CompanyMatcher, Duration::from_secs(5));

        let result = skill.run(&ctx, &request("Acme Corp")).await.unwrap();
        assert_eq!(result.exact_match.map(|m| m.name), Some("Acme Corp".to_string()));
        let names: Vec<&str> = result.suggestions.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["Acme Holding", "Acme Labs"]);
    }

    #[tokio::test]
    async fn test_exhaustion_after_five_rounds() {
        let gateway = Arc::new(ScriptedGateway::new(|_| {
            Ok(r#"{"verdict":"none","exact_match":null,"suggestions":[],"refined_query":"xyzzy 9912 company"}"#.to_string())
        }));
        let tools = Arc::new(search_results());
        let skill = MatcherSkill::new(gateway.clone(), tools.clone());
        let (_session, ctx, stream) = testing::session(AgentKind::CompanyMatcher, Duration::from_secs(5));

        let result = skill.run(&ctx, &request("Xyzzy9912")).await.unwrap();
        let events = testing::drain(ctx, stream).await;

        assert!(result.exact_match.is_none());
        assert!(result.suggestions.is_empty());
        assert_eq!(tools.count(WEB_SEARCH), 5);
        assert_eq!(gateway.calls(), 5);
        assert_eq!(phases(&events).last().map(String::as_str), Some("exhausted"));
        assert_eq!(testing::count(&events, "result"), 0);

        // Refined query from the model is used on the next round
        let calls = tools.calls.lock().unwrap();
        assert_eq!(calls[1].input["queries"][0], "xyzzy 9912 company");
    }

    #[tokio::test]
    async fn test_candidates_are_ranked_and_capped() {
        let gateway = Arc::new(ScriptedGateway::new(|_| {
            Ok(r#"Here you go: {"verdict":"candidates","suggestions":[
                {"name":"Acme Low","url":"https://l.example","confidence":"low"},
                {"name":"Acme SA","url":"https://sa.example","confidence":"high"},
                {"name":"Acme BV","url":"https://bv.example","confidence":"medium"},
                {"name":"Acme GmbH","url":"https://gmbh.example","confidence":"high"}
            ]}"#.to_string())
        }));
        let skill = MatcherSkill::new(gateway, Arc::new(search_results()));
        let (_session, ctx, _stream) = testing::session(AgentKind::CompanyMatcher, Duration::from_secs(5));

        let result = skill.run(&ctx, &request("Acme")).await.unwrap();
        let names: Vec<&str> = result.suggestions.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["Acme SA", "Acme GmbH", "Acme BV"]);
        assert!(result.exact_match.is_none());
    }

    #[tokio::test]
    async fn test_unparseable_evaluation_counts_as_no_match() {
        let gateway = Arc::new(ScriptedGateway::new(|_| Ok("I am not sure.".to_string())));
        let tools = Arc::new(search_results());
        let skill = MatcherSkill::new(gateway, tools.clone()).with_limits(2, 3, 5, 10);
        let (_session, ctx, _stream) = testing::session(AgentKind::CompanyMatcher, Duration::from_secs(5));

        let result = skill.run(&ctx, &request("Acme")).await.unwrap();
        assert_eq!(result, CompanyMatchResult::not_found("Acme"));
        assert_eq!(tools.count(WEB_SEARCH), 2);
    }

    #[tokio::test]
    async fn test_failed_search_skips_evaluation() {
        let gateway = Arc::new(ScriptedGateway::new(|_| Ok("{}".to_string())));
        let tools = Arc::new(ScriptedTools::new(|_| anyhow::bail!("search backend down")));
        let skill = MatcherSkill::new(gateway.clone(), tools).with_limits(3, 3, 5, 10);
        let (_session, ctx, _stream) = testing::session(AgentKind::CompanyMatcher, Duration::from_secs(5));

        let result = skill.run(&ctx, &request("Acme")).await.unwrap();
        assert!(result.exact_match.is_none());
        assert_eq!(gateway.calls(), 0);
    }

    #[tokio::test]
    async fn test_rejects_missing_input() {
        let skill = MatcherSkill::new(
            Arc::new(ScriptedGateway::new(|_| Ok(String::new()))),
            Arc::new(search_results()),
        );
        let (_session, ctx, _stream) = testing::session(AgentKind::CompanyMatcher, Duration::from_secs(5));

        let mut req = request("  ");
        assert!(matches!(skill.run(&ctx, &req).await, Err(CopilotError::InvalidInput(_))));
        req.company_name = "Acme".to_string();
        req.country_of_establishment = String::new();
        assert!(matches!(skill.run(&ctx, &req).await, Err(CopilotError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_cancelled_session_stops() {
        let skill = MatcherSkill::new(
            Arc::new(ScriptedGateway::new(|_| Ok(String::new()))),
            Arc::new(search_results()),
        );
        let (session, ctx, _stream) = testing::session(AgentKind::CompanyMatcher, Duration::from_secs(5));
        session.cancel();
        assert!(matches!(
            skill.run(&ctx, &request("Acme")).await,
            Err(CopilotError::Cancelled)
        ));
    }
}
