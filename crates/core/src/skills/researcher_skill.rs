//! # Researcher Skill
//!
//! Parallel research: every sub-question of the question table becomes one
//! unit run through the bounded scheduler. A unit searches, extracts an
//! answer, and may search again with a model-proposed query while the answer
//! is still insufficient (capped rounds). Failed units degrade to a
//! low-confidence placeholder. A final call writes advisory consistency notes
//! over the whole answer set; notes that name answers are also appended to
//! those answers' traces.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use regex::Regex;
use serde_json::json;

use crate::error::{CopilotError, CopilotResult};
use crate::inference::{InferenceGateway, InferenceRequest};
use crate::skills::artifact_registry::{
    Confidence, ResearchAnswer, ResearchReport, INSUFFICIENT_INFORMATION, UNKNOWN_SOURCE,
};
use crate::skills::llm_helpers::stream_reply;
use crate::skills::prompts;
use crate::state::questions::{QuestionTable, SubQuestion};
use crate::swarm::bus::Emitter;
use crate::swarm::scheduler::UnitResult;
use crate::swarm::session::SessionContext;
use crate::tools::{invoke_tool, ToolCall, ToolInvoker, WEB_SEARCH};

pub const RESEARCH_PHASE: &str = "research";
pub const ANALYSIS_PHASE: &str = "analysis";

/// Output limit of one extraction reply
const EXTRACT_MAX_TOKENS: u32 = 500;
/// Output limit of the consistency notes
const NOTES_MAX_TOKENS: u32 = 2000;

/// Fields pulled out of an extraction reply
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub answer: String,
    pub source: String,
    pub confidence: Confidence,
    /// Follow-up search the model asked for
    pub next_query: Option<String>,
}

impl Extraction {
    pub fn is_insufficient(&self) -> bool {
        self.answer == INSUFFICIENT_INFORMATION
    }

    /// The follow-up query, only while the answer is still missing
    fn refinement(&self) -> Option<String> {
        self.next_query.clone().filter(|_| self.is_insufficient())
    }
}

/// Parse `ANSWER:` / `SOURCE:` / `CONFIDENCE:` / `NEXT_QUERY:` lines (any
/// case, markdown emphasis tolerated). Missing answers mean insufficient
/// information at `Low` confidence.
pub fn parse_extraction(reply: &str) -> Extraction {
    let mut answer = None;
    let mut source = None;
    let mut confidence = None;
    let mut next_query = None;

    for line in reply.lines() {
        let line = line.trim().trim_start_matches(['*', '-', '#', ' ']);
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key
            .trim()
            .trim_end_matches('*')
            .to_ascii_uppercase()
            .replace(' ', "_");
        let value = value.trim().trim_start_matches('*').trim();
        if value.is_empty() {
            continue;
        }
        match key.as_str() {
            "ANSWER" if answer.is_none() => answer = Some(value.to_string()),
            "SOURCE" if source.is_none() => source = Some(value.to_string()),
            "CONFIDENCE" if confidence.is_none() => confidence = Some(Confidence::parse(value)),
            "NEXT_QUERY" if next_query.is_none() && !value.eq_ignore_ascii_case("none") => {
                next_query = Some(value.trim_matches('"').to_string())
            }
            _ => {}
        }
    }

    match answer {
        Some(answer) if !answer.eq_ignore_ascii_case(INSUFFICIENT_INFORMATION) => Extraction {
            answer,
            source: source.unwrap_or_else(|| UNKNOWN_SOURCE.to_string()),
            confidence: confidence.unwrap_or_default(),
            next_query,
        },
        _ => Extraction {
            answer: INSUFFICIENT_INFORMATION.to_string(),
            source: source.unwrap_or_else(|| UNKNOWN_SOURCE.to_string()),
            confidence: Confidence::Low,
            next_query,
        },
    }
}

/// Search queries for one question
fn question_queries(company: &str, question: &SubQuestion, max: usize) -> Vec<String> {
    let mut queries = vec![format!("{} {}", company, question.question)];
    if let Some(guidance) = question.guidance.as_deref().filter(|g| !g.trim().is_empty()) {
        queries.push(format!("{} {}", company, guidance));
    }
    queries.truncate(max.max(1));
    queries
}

/// Unit node id for the question at `index`
fn node_id(index: usize) -> String {
    format!("q{:02}", index + 1)
}

fn node_ref_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"\bq(\d{2,3})\b").ok())
        .as_ref()
}

/// Append every note line that names an answer (`q03`) to that answer's
/// trace. `answers` pairs each answer with its question index.
fn annotate_traces(answers: &mut [(usize, ResearchAnswer)], notes: &str) {
    let Some(pattern) = node_ref_pattern() else {
        return;
    };
    for line in notes.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let mut named: Vec<usize> = pattern
            .captures_iter(line)
            .filter_map(|cap| cap.get(1)?.as_str().parse::<usize>().ok())
            .filter(|n| *n > 0)
            .map(|n| n - 1)
            .collect();
        named.sort_unstable();
        named.dedup();
        for (index, answer) in answers.iter_mut() {
            if !named.contains(index) {
                continue;
            }
            let note = format!("consistency: {}", line);
            answer.raw_trace = Some(match answer.raw_trace.take() {
                Some(trace) => format!("{}\n\n{}", trace, note),
                None => note,
            });
        }
    }
}

pub struct ResearcherSkill {
    gateway: Arc<dyn InferenceGateway>,
    tools: Arc<dyn ToolInvoker>,
    questions: Arc<QuestionTable>,
    concurrency: usize,
    max_queries: usize,
    max_results: usize,
    max_rounds: u32,
}

/// Everything one research unit needs, owned so it can move into a task
struct QuestionUnit {
    gateway: Arc<dyn InferenceGateway>,
    tools: Arc<dyn ToolInvoker>,
    emitter: Emitter,
    company: String,
    question: SubQuestion,
    node: String,
    timeout: Duration,
    max_queries: usize,
    max_results: usize,
    max_rounds: u32,
}

impl QuestionUnit {
    async fn search(&self, queries: Vec<String>) -> anyhow::Result<String> {
        let call = ToolCall::new(
            WEB_SEARCH,
            json!({ "queries": queries, "max_results": self.max_results }),
        );
        let output = invoke_tool(
            self.tools.as_ref(),
            call,
            &self.emitter,
            &self.node,
            self.timeout,
        )
        .await?;
        Ok(output.content)
    }

    async fn extract(&self, results: &str, round: u32) -> anyhow::Result<String> {
        let prompt = prompts::render(
            prompts::RESEARCH_EXTRACT,
            &[
                ("company_name", &self.company),
                ("section", self.question.section.title()),
                ("question", &self.question.question),
                ("guidance", self.question.guidance.as_deref().unwrap_or("none")),
                ("round", &round.to_string()),
                ("max_rounds", &self.max_rounds.to_string()),
                ("results", results),
            ],
        );
        let request = InferenceRequest::new(prompt)
            .with_system(prompts::SYSTEM)
            .with_max_tokens(EXTRACT_MAX_TOKENS);
        stream_reply(
            self.gateway.as_ref(),
            request,
            &self.emitter,
            &self.node,
            self.timeout,
        )
        .await
    }

    async fn run(self) -> anyhow::Result<ResearchAnswer> {
        let queries = question_queries(&self.company, &self.question, self.max_queries);
        let mut results = self.search(queries).await?;
        let reply = self.extract(&results, 1).await?;
        let mut extraction = parse_extraction(&reply);
        let mut trace = vec![reply];

        // Later rounds only refine; their failures keep the earlier answer
        let mut round = 1;
        while round < self.max_rounds {
            let Some(query) = extraction.refinement() else {
                break;
            };
            round += 1;
            let refined = match self.search(vec![query]).await {
                Ok(more) => {
                    results.push_str("\n\n");
                    results.push_str(&more);
                    self.extract(&results, round).await
                }
                Err(e) => Err(e),
            };
            match refined {
                Ok(reply) => {
                    extraction = parse_extraction(&reply);
                    trace.push(reply);
                }
                Err(e) => {
                    tracing::debug!(node = %self.node, round, "refinement failed: {:#}", e);
                    break;
                }
            }
        }

        Ok(ResearchAnswer {
            section: self.question.section,
            question: self.question.question,
            answer: extraction.answer,
            source: extraction.source,
            confidence: extraction.confidence,
            raw_trace: Some(trace.join("\n\n---\n\n")),
        })
    }
}

impl ResearcherSkill {
    pub fn new(
        gateway: Arc<dyn InferenceGateway>,
        tools: Arc<dyn ToolInvoker>,
        questions: Arc<QuestionTable>,
    ) -> Self {
        Self {
            gateway,
            tools,
            questions,
            concurrency: 17,
            max_queries: 2,
            max_results: 10,
            max_rounds: 3,
        }
    }

    pub fn with_limits(mut self, concurrency: usize, max_queries: usize, max_results: usize) -> Self {
        self.concurrency = concurrency;
        self.max_queries = max_queries;
        self.max_results = max_results;
        self
    }

    /// Search rounds per question, the first included
    pub fn with_max_rounds(mut self, max_rounds: u32) -> Self {
        self.max_rounds = max_rounds.max(1);
        self
    }

    #[tracing::instrument(skip_all, fields(session = %ctx.session_id, company = %company_name))]
    pub async fn run(&self, ctx: &SessionContext, company_name: &str) -> CopilotResult<ResearchReport> {
        let company = company_name.trim();
        if company.is_empty() {
            return Err(CopilotError::InvalidInput(
                "company_name is required".to_string(),
            ));
        }
        ctx.check()?;

        let questions = self.questions.questions();
        tracing::info!(
            questions = questions.len(),
            concurrency = self.concurrency,
            max_rounds = self.max_rounds,
            "starting parallel research"
        );
        ctx.emitter.phase_start(RESEARCH_PHASE).await;

        let units: Vec<_> = questions
            .iter()
            .enumerate()
            .map(|(index, question)| {
                let unit = QuestionUnit {
                    gateway: self.gateway.clone(),
                    tools: self.tools.clone(),
                    emitter: ctx.emitter.clone(),
                    company: company.to_string(),
                    question: question.clone(),
                    node: node_id(index),
                    timeout: ctx.call_timeout,
                    max_queries: self.max_queries,
                    max_results: self.max_results,
                    max_rounds: self.max_rounds,
                };
                move || unit.run()
            })
            .collect();

        let batch = ctx.scheduler(self.concurrency).run(units).await;
        if batch.cancelled {
            return Err(CopilotError::Cancelled);
        }
        ctx.emitter.phase_end(RESEARCH_PHASE).await;

        // Reduce once, after every unit finished, keeping completion order.
        let mut answers: Vec<(usize, ResearchAnswer)> = batch
            .completed
            .into_iter()
            .map(|record| {
                let question = &questions[record.index];
                let result = UnitResult::from_outcome(record.outcome, || {
                    ResearchAnswer::insufficient(question.section, &question.question, None)
                });
                let answer = match result {
                    UnitResult::Ok(answer) => answer,
                    UnitResult::Degraded { mut value, reason } => {
                        tracing::warn!(index = record.index, "research unit degraded: {}", reason);
                        value.raw_trace = Some(reason);
                        value
                    }
                };
                (record.index, answer)
            })
            .collect();

        ctx.emitter.phase_start(ANALYSIS_PHASE).await;
        let consistency_notes = self.consistency_notes(ctx, company, &answers).await?;
        annotate_traces(&mut answers, &consistency_notes);
        ctx.emitter.phase_end(ANALYSIS_PHASE).await;

        Ok(ResearchReport {
            company_name: company.to_string(),
            answers: answers.into_iter().map(|(_, answer)| answer).collect(),
            consistency_notes,
        })
    }

    async fn consistency_notes(
        &self,
        ctx: &SessionContext,
        company: &str,
        answers: &[(usize, ResearchAnswer)],
    ) -> CopilotResult<String> {
        let listing: String = answers
            .iter()
            .map(|(index, a)| {
                format!(
                    "{} [{}] {}\n  -> {} (confidence: {:?}, source: {})\n",
                    node_id(*index),
                    a.section.as_str(),
                    a.question,
                    a.answer,
                    a.confidence,
                    a.source
                )
            })
            .collect();
        let prompt = prompts::render(
            prompts::RESEARCH_CONSISTENCY,
            &[("company_name", company), ("answers", &listing)],
        );
        let request = InferenceRequest::new(prompt)
            .with_system(prompts::SYSTEM)
            .with_max_tokens(NOTES_MAX_TOKENS);

        let reply = ctx
            .until_cancelled(stream_reply(
                self.gateway.as_ref(),
                request,
                &ctx.emitter,
                "consistency",
                ctx.call_timeout,
            ))
            .await?;

        Ok(reply.unwrap_or_else(|e| {
            tracing::warn!("consistency notes unavailable: {:#}", e);
            String::new()
        }))
    }
}
