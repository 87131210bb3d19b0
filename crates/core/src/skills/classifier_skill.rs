//! # Classifier Skill
//!
//! Two steps. One inference call turns a [`CompanyProfile`] into a complete
//! [`Classification`]; the rule table then decides applicability for every
//! obligation, and a bounded batch of narrative calls explains each
//! decision. A closing call summarizes the report.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;

use crate::error::{CopilotError, CopilotResult};
use crate::inference::{InferenceGateway, InferenceRequest};
use crate::skills::artifact_registry::{
    Classification, CompanyProfile, ComplianceReport, ObligationAnalysis, ServiceCategory,
};
use crate::skills::llm_helpers::{parse_json_reply, stream_reply};
use crate::skills::prompts;
use crate::state::obligations::RuleTable;
use crate::swarm::bus::Emitter;
use crate::swarm::scheduler::UnitResult;
use crate::swarm::session::SessionContext;
use crate::tools::{invoke_tool, ToolCall, ToolInvoker, KNOWLEDGE_BASE};

pub const CLASSIFICATION_PHASE: &str = "classification";
pub const OBLIGATIONS_PHASE: &str = "obligations";
pub const SUMMARY_PHASE: &str = "summary";

const KNOWLEDGE_LIMIT: u64 = 3;
const SUMMARY_MAX_TOKENS: u32 = 2000;

#[derive(Debug, Deserialize)]
struct Narrative {
    implications: String,
    #[serde(default)]
    action_items: Vec<String>,
}

/// Serde name of a category, as the rule table and prompts spell it
fn category_name(category: ServiceCategory) -> String {
    serde_json::to_value(category)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| format!("{:?}", category))
}

/// Count-based summary used when the synthesis call fails
pub fn fallback_summary(company: &str, category: ServiceCategory, applicable: usize, total: usize) -> String {
    format!(
        "{} is classified as {}; {} of {} obligations apply.",
        company,
        category_name(category),
        applicable,
        total
    )
}

/// One obligation narrative, owned so it can move into a task
struct NarrativeUnit {
    gateway: Arc<dyn InferenceGateway>,
    tools: Arc<dyn ToolInvoker>,
    emitter: Emitter,
    company: String,
    category: String,
    article: String,
    title: String,
    applies: bool,
    timeout: Duration,
}

impl NarrativeUnit {
    async fn run(self) -> anyhow::Result<ObligationAnalysis> {
        let node = self.article.to_lowercase().replace([' ', '.'], "");

        let mut context = String::new();
        if self.tools.supports(KNOWLEDGE_BASE) {
            let call = ToolCall::new(
                KNOWLEDGE_BASE,
                json!({
                    "query": format!("{} {}", self.article, self.title),
                    "limit": KNOWLEDGE_LIMIT,
                }),
            );
            // A failed lookup only costs context
            if let Ok(output) =
                invoke_tool(self.tools.as_ref(), call, &self.emitter, &node, self.timeout).await
            {
                context = format!("Relevant regulation text:\n{}", output.content);
            }
        }

        let applicability = if self.applies { "apply" } else { "not apply" };
        let prompt = prompts::render(
            prompts::OBLIGATION_NARRATIVE,
            &[
                ("company_name", &self.company),
                ("category", &self.category),
                ("article", &self.article),
                ("title", &self.title),
                ("applicability", applicability),
                ("context", &context),
            ],
        );
        let reply = stream_reply(
            self.gateway.as_ref(),
            InferenceRequest::new(prompt).with_system(prompts::SYSTEM),
            &self.emitter,
            &node,
            self.timeout,
        )
        .await?;
        let narrative: Narrative = parse_json_reply(&reply)?;

        Ok(ObligationAnalysis {
            article: self.article,
            title: self.title,
            applies: self.applies,
            implications: narrative.implications,
            action_items: if self.applies {
                narrative.action_items
            } else {
                Vec::new()
            },
        })
    }
}

pub struct ClassifierSkill {
    gateway: Arc<dyn InferenceGateway>,
    tools: Arc<dyn ToolInvoker>,
    rules: Arc<RuleTable>,
    concurrency: usize,
}

impl ClassifierSkill {
    pub fn new(
        gateway: Arc<dyn InferenceGateway>,
        tools: Arc<dyn ToolInvoker>,
        rules: Arc<RuleTable>,
    ) -> Self {
        Self {
            gateway,
            tools,
            rules,
            concurrency: 6,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    #[tracing::instrument(skip_all, fields(session = %ctx.session_id, company = %profile.company_name))]
    pub async fn run(&self, ctx: &SessionContext, profile: &CompanyProfile) -> CopilotResult<ComplianceReport> {
        let company = profile.company_name.trim();
        if company.is_empty() {
            return Err(CopilotError::InvalidInput(
                "company_profile.company_name is required".to_string(),
            ));
        }
        ctx.check()?;

        ctx.emitter.phase_start(CLASSIFICATION_PHASE).await;
        let classification = self.classify(ctx, profile).await?;
        ctx.emitter.phase_end(CLASSIFICATION_PHASE).await;

        let category = classification.service_classification.service_category;
        let decisions = self.rules.evaluate(&classification);
        tracing::info!(
            category = %category_name(category),
            rules = decisions.len(),
            applicable = decisions.iter().filter(|(_, applies)| *applies).count(),
            "classification complete"
        );

        ctx.emitter.phase_start(OBLIGATIONS_PHASE).await;
        let units: Vec<_> = decisions
            .iter()
            .map(|(rule, applies)| {
                let unit = NarrativeUnit {
                    gateway: self.gateway.clone(),
                    tools: self.tools.clone(),
                    emitter: ctx.emitter.clone(),
                    company: company.to_string(),
                    category: category_name(category),
                    article: rule.article.clone(),
                    title: rule.title.clone(),
                    applies: *applies,
                    timeout: ctx.call_timeout,
                };
                move || unit.run()
            })
            .collect();

        let batch = ctx.scheduler(self.concurrency).run(units).await;
        if batch.cancelled {
            return Err(CopilotError::Cancelled);
        }
        ctx.emitter.phase_end(OBLIGATIONS_PHASE).await;

        // Rule-table order, one entry per rule
        let mut outcomes = batch.into_indexed();
        let obligations: Vec<ObligationAnalysis> = decisions
            .iter()
            .enumerate()
            .map(|(index, (rule, applies))| {
                let fallback = || ObligationAnalysis::fallback(&rule.article, &rule.title, *applies);
                let outcome = outcomes
                    .remove(&index)
                    .unwrap_or_else(|| Ok(fallback()));
                match UnitResult::from_outcome(outcome, fallback) {
                    UnitResult::Ok(analysis) => analysis,
                    UnitResult::Degraded { value, reason } => {
                        tracing::warn!(article = %rule.article, "obligation narrative degraded: {}", reason);
                        value
                    }
                }
            })
            .collect();

        let mut report = ComplianceReport {
            company_name: company.to_string(),
            classification,
            obligations,
            summary: String::new(),
        };

        ctx.emitter.phase_start(SUMMARY_PHASE).await;
        report.summary = self.summarize(ctx, &report).await?;
        ctx.emitter.phase_end(SUMMARY_PHASE).await;

        Ok(report)
    }

    async fn classify(&self, ctx: &SessionContext, profile: &CompanyProfile) -> CopilotResult<Classification> {
        let schema = serde_json::to_string_pretty(&schemars::schema_for!(Classification))
            .map_err(anyhow::Error::from)?;
        let prompt = prompts::render(
            prompts::CLASSIFIER,
            &[("profile", &profile.render()), ("schema", &schema)],
        );

        let reply = ctx
            .until_cancelled(stream_reply(
                self.gateway.as_ref(),
                InferenceRequest::new(prompt).with_system(prompts::SYSTEM),
                &ctx.emitter,
                "classifier",
                ctx.call_timeout,
            ))
            .await?;

        reply
            .and_then(|text| parse_json_reply::<Classification>(&text))
            .map_err(|e| CopilotError::Classification(format!("{:#}", e)))
    }

    async fn summarize(&self, ctx: &SessionContext, report: &ComplianceReport) -> CopilotResult<String> {
        let category = report.classification.service_classification.service_category;
        let applicable = report.applicable_count();
        let total = report.obligations.len();

        let classification = serde_json::to_string_pretty(&report.classification)
            .map_err(anyhow::Error::from)?;
        let listing: String = report
            .obligations
            .iter()
            .filter(|o| o.applies)
            .map(|o| format!("- {} {}: {}\n", o.article, o.title, o.implications))
            .collect();
        let prompt = prompts::render(
            prompts::REPORT_SUMMARY,
            &[
                ("company_name", &report.company_name),
                ("classification", &classification),
                ("applicable", &applicable.to_string()),
                ("total", &total.to_string()),
                ("obligations", &listing),
            ],
        );

        let reply = ctx
            .until_cancelled(stream_reply(
                self.gateway.as_ref(),
                InferenceRequest::new(prompt)
                    .with_system(prompts::SYSTEM)
                    .with_max_tokens(SUMMARY_MAX_TOKENS),
                &ctx.emitter,
                "summary",
                ctx.call_timeout,
            ))
            .await?;

        Ok(match reply {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => fallback_summary(&report.company_name, category, applicable, total),
            Err(e) => {
                tracing::warn!("report summary unavailable: {:#}", e);
                fallback_summary(&report.company_name, category, applicable, total)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skills::artifact_registry::ProfileFact;
    use crate::state::obligations::tests::classification;
    use crate::state::obligations::{Facet, ObligationRule, Predicate};
    use crate::state::questions::Section;
    use crate::swarm::events::AgentKind;
    use crate::testing::{self, ScriptedGateway, ScriptedTools};
    use crate::tools::ToolOutput;
    use tokio_test::{assert_err, assert_ok};

    fn profile() -> CompanyProfile {
        CompanyProfile {
            company_name: "Acme Corp".to_string(),
            facts: vec![ProfileFact {
                section: Section::ServiceType,
                question: "Does the service store user content?".to_string(),
                answer: "Yes, sellers publish listings.".to_string(),
                source: Some("https://acme.example".to_string()),
            }],
        }
    }

    /// 30 rules, 12 of which require the hosting facet
    fn synthetic_rules() -> Arc<RuleTable> {
        let rules = (1..=30)
            .map(|i| ObligationRule {
                article: format!("Art. {}", i),
                title: format!("Obligation {}", i),
                applies_when: if i <= 12 {
                    Predicate::Facet(Facet::Hosting)
                } else {
                    Predicate::Facet(Facet::VeryLarge)
                },
            })
            .collect();
        Arc::new(RuleTable::from_rules("test", rules))
    }

    fn hosting_gateway() -> ScriptedGateway {
        let verdict = serde_json::to_string(&classification(
            true,
            ServiceCategory::Hosting,
            false,
            false,
        ))
        .unwrap();
        ScriptedGateway::new(move |request| {
            if request.prompt.contains("Make all three determinations") {
                Ok(format!("Here is the result:\n{}", verdict))
            } else if request.prompt.contains("Obligation: Art. 5 ") {
                anyhow::bail!("upstream 503")
            } else if request.prompt.contains("Obligation: Art.") {
                Ok(r#"{"implications": "The company must act.", "action_items": ["Publish a contact point"]}"#.to_string())
            } else if request.max_tokens == Some(SUMMARY_MAX_TOKENS) {
                Ok("Acme Corp is an in-scope hosting service.".to_string())
            } else {
                anyhow::bail!("summary requested without an output limit")
            }
        })
    }

    #[test]
    fn test_fallback_summary() {
        assert_eq!(
            fallback_summary("Acme", ServiceCategory::OnlineMarketplace, 12, 30),
            "Acme is classified as online_marketplace; 12 of 30 obligations apply."
        );
    }

    #[tokio::test]
    async fn test_every_rule_gets_one_entry() {
        let tools = Arc::new(ScriptedTools::new(|_| Ok(ToolOutput::default())).only(vec![]));
        let skill = ClassifierSkill::new(Arc::new(hosting_gateway()), tools.clone(), synthetic_rules());
        let (_session, ctx, stream) =
            testing::session(AgentKind::ServiceCategorizer, Duration::from_secs(2));

        let report = assert_ok!(skill.run(&ctx, &profile()).await);
        let events = testing::drain(ctx, stream).await;

        assert_eq!(report.obligations.len(), 30);
        assert_eq!(report.applicable_count(), 12);
        for (i, obligation) in report.obligations.iter().enumerate() {
            assert_eq!(obligation.article, format!("Art. {}", i + 1));
            assert_eq!(obligation.applies, i < 12);
        }
        // Art. 5 failed and fell back without flipping applicability
        assert_eq!(
            report.obligations[4].implications,
            "applies: true, no detailed analysis available"
        );
        assert!(report.obligations[4].action_items.is_empty());
        assert_eq!(report.obligations[0].action_items, vec!["Publish a contact point"]);
        assert!(report.obligations[20].action_items.is_empty());

        assert_eq!(report.summary, "Acme Corp is an in-scope hosting service.");
        assert_eq!(tools.count(KNOWLEDGE_BASE), 0);
        assert_eq!(testing::count(&events, "result"), 0);
    }

    #[tokio::test]
    async fn test_knowledge_lookup_is_optional() {
        let tools = Arc::new(ScriptedTools::new(|call| {
            if call.input["query"].as_str().unwrap_or_default().starts_with("Art. 2 ") {
                anyhow::bail!("retriever down");
            }
            Ok(ToolOutput {
                content: "**Article**\n   https://eur-lex.europa.eu\n   text".to_string(),
                citations: Vec::new(),
            })
        }));
        let skill = ClassifierSkill::new(Arc::new(hosting_gateway()), tools.clone(), synthetic_rules())
            .with_concurrency(4);
        let (_session, ctx, stream) =
            testing::session(AgentKind::ServiceCategorizer, Duration::from_secs(2));

        let report = assert_ok!(skill.run(&ctx, &profile()).await);
        let events = testing::drain(ctx, stream).await;

        assert_eq!(tools.count(KNOWLEDGE_BASE), 30);
        assert_eq!(report.obligations[1].implications, "The company must act.");
        assert_eq!(testing::count(&events, "tool_start"), 30);
        assert_eq!(testing::count(&events, "tool_end"), 30);
    }

    #[tokio::test]
    async fn test_classification_failure_is_fatal() {
        let gateway = ScriptedGateway::new(|_| Ok("I am not sure how to classify this.".to_string()));
        let tools = Arc::new(ScriptedTools::new(|_| Ok(ToolOutput::default())));
        let skill = ClassifierSkill::new(Arc::new(gateway), tools, synthetic_rules());
        let (_session, ctx, _stream) =
            testing::session(AgentKind::ServiceCategorizer, Duration::from_secs(2));

        let err = assert_err!(skill.run(&ctx, &profile()).await);
        assert!(matches!(err, CopilotError::Classification(_)));
    }

    #[tokio::test]
    async fn test_summary_falls_back() {
        let verdict = serde_json::to_string(&classification(
            true,
            ServiceCategory::OnlineMarketplace,
            true,
            false,
        ))
        .unwrap();
        let gateway = ScriptedGateway::new(move |request| {
            if request.prompt.contains("Make all three determinations") {
                Ok(verdict.clone())
            } else if request.prompt.contains("executive audience") {
                anyhow::bail!("context length exceeded")
            } else {
                Ok("not json".to_string())
            }
        });
        let tools = Arc::new(ScriptedTools::new(|_| Ok(ToolOutput::default())).only(vec![]));
        let skill = ClassifierSkill::new(Arc::new(gateway), tools, synthetic_rules());
        let (_session, ctx, _stream) =
            testing::session(AgentKind::ServiceCategorizer, Duration::from_secs(2));

        let report = assert_ok!(skill.run(&ctx, &profile()).await);
        assert_eq!(report.applicable_count(), 30);
        assert!(report
            .obligations
            .iter()
            .all(|o| o.implications == "applies: true, no detailed analysis available"));
        assert_eq!(
            report.summary,
            "Acme Corp is classified as online_marketplace; 30 of 30 obligations apply."
        );
    }

    #[tokio::test]
    async fn test_invalid_and_cancelled() {
        let tools = Arc::new(ScriptedTools::new(|_| Ok(ToolOutput::default())));
        let skill = ClassifierSkill::new(Arc::new(hosting_gateway()), tools, synthetic_rules());
        let (session, ctx, _stream) =
            testing::session(AgentKind::ServiceCategorizer, Duration::from_secs(2));

        let mut empty = profile();
        empty.company_name = "  ".to_string();
        assert!(matches!(skill.run(&ctx, &empty).await, Err(CopilotError::InvalidInput(_))));

        session.cancel();
        assert!(matches!(skill.run(&ctx, &profile()).await, Err(CopilotError::Cancelled)));
    }
}
