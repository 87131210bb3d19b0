//! # Artifact Registry
//!
//! Shared payload types produced by the agents and carried in `result`
//! events. These are the only shapes the transport ever serializes as
//! terminal data.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::state::questions::Section;

// ============================================================================
// Entity Resolution Artifacts
// ============================================================================

/// How closely a candidate matches the requested organization
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MatchConfidence {
    Exact,
    High,
    Medium,
    Low,
}

impl MatchConfidence {
    /// Sort key, best first
    pub fn rank(&self) -> u8 {
        match self {
            MatchConfidence::Exact => 0,
            MatchConfidence::High => 1,
            MatchConfidence::Medium => 2,
            MatchConfidence::Low => 3,
        }
    }
}

/// A candidate canonical identity
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct CompanyMatch {
    pub name: String,
    pub url: String,
    pub confidence: MatchConfidence,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Terminal payload of entity resolution
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct CompanyMatchResult {
    pub input_name: String,
    /// Always serialized; `null` when nothing matched exactly
    pub exact_match: Option<CompanyMatch>,
    pub suggestions: Vec<CompanyMatch>,
}

impl CompanyMatchResult {
    pub fn not_found(input_name: &str) -> Self {
        Self {
            input_name: input_name.to_string(),
            exact_match: None,
            suggestions: Vec::new(),
        }
    }

    /// Exact match plus the remaining candidates, ranked; the exact match's
    /// own URL never reappears among the suggestions
    pub fn resolved(
        input_name: &str,
        exact: CompanyMatch,
        suggestions: Vec<CompanyMatch>,
        limit: usize,
    ) -> Self {
        let suggestions = rank_suggestions(suggestions, Some(&exact.url), limit);
        Self {
            input_name: input_name.to_string(),
            exact_match: Some(exact),
            suggestions,
        }
    }

    /// Rank candidates best-first and keep at most `limit`
    pub fn candidates(input_name: &str, suggestions: Vec<CompanyMatch>, limit: usize) -> Self {
        Self {
            input_name: input_name.to_string(),
            exact_match: None,
            suggestions: rank_suggestions(suggestions, None, limit),
        }
    }
}

fn url_key(url: &str) -> String {
    url.trim().trim_end_matches('/').to_ascii_lowercase()
}

/// Stable sort by confidence, one entry per URL (the best-ranked), capped
fn rank_suggestions(
    mut suggestions: Vec<CompanyMatch>,
    exclude_url: Option<&str>,
    limit: usize,
) -> Vec<CompanyMatch> {
    suggestions.sort_by_key(|m| m.confidence.rank());
    let mut seen: Vec<String> = exclude_url.map(url_key).into_iter().collect();
    suggestions.retain(|m| {
        let key = url_key(&m.url);
        if seen.contains(&key) {
            false
        } else {
            seen.push(key);
            true
        }
    });
    suggestions.truncate(limit);
    suggestions
}

// ============================================================================
// Research Artifacts
// ============================================================================

/// Confidence tier of an extracted answer
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
pub enum Confidence {
    High,
    Medium,
    #[default]
    Low,
}

impl Confidence {
    /// Lenient parse; anything unrecognized is `Low`
    pub fn parse(text: &str) -> Self {
        let lowered = text.trim().to_ascii_lowercase();
        if lowered.starts_with("high") {
            Confidence::High
        } else if lowered.starts_with("medium") || lowered.starts_with("moderate") {
            Confidence::Medium
        } else {
            Confidence::Low
        }
    }
}

/// Answer text used when extraction could not produce one
pub const INSUFFICIENT_INFORMATION: &str = "insufficient information";
/// Source used when no source could be attributed
pub const UNKNOWN_SOURCE: &str = "Unknown";

/// One answered sub-question
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ResearchAnswer {
    pub section: Section,
    pub question: String,
    pub answer: String,
    pub source: String,
    pub confidence: Confidence,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_trace: Option<String>,
}

impl ResearchAnswer {
    /// The degraded answer substituted for a failed unit
    pub fn insufficient(section: Section, question: &str, reason: Option<String>) -> Self {
        Self {
            section,
            question: question.to_string(),
            answer: INSUFFICIENT_INFORMATION.to_string(),
            source: UNKNOWN_SOURCE.to_string(),
            confidence: Confidence::Low,
            raw_trace: reason,
        }
    }
}

/// Terminal payload of parallel research
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ResearchReport {
    pub company_name: String,
    /// In completion order
    pub answers: Vec<ResearchAnswer>,
    /// Advisory prose; never scored
    #[serde(default)]
    pub consistency_notes: String,
}

impl ResearchReport {
    /// Classification input built from this report
    pub fn profile(&self) -> CompanyProfile {
        CompanyProfile::from_answers(&self.company_name, &self.answers)
    }
}

// ============================================================================
// Profile (input of classification)
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ProfileFact {
    pub section: Section,
    pub question: String,
    pub answer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Confirmed facts about one organization
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct CompanyProfile {
    pub company_name: String,
    #[serde(default)]
    pub facts: Vec<ProfileFact>,
}

impl CompanyProfile {
    /// Build a profile from research, keeping only answers above `Low`
    pub fn from_answers(company_name: &str, answers: &[ResearchAnswer]) -> Self {
        let facts = answers
            .iter()
            .filter(|a| a.confidence != Confidence::Low)
            .map(|a| ProfileFact {
                section: a.section,
                question: a.question.clone(),
                answer: a.answer.clone(),
                source: (a.source != UNKNOWN_SOURCE).then(|| a.source.clone()),
            })
            .collect();
        Self {
            company_name: company_name.to_string(),
            facts,
        }
    }

    /// Human-readable block for prompts, grouped by section
    pub fn render(&self) -> String {
        let mut out = format!("Company: {}\n", self.company_name);
        for section in Section::all() {
            let facts: Vec<_> = self.facts.iter().filter(|f| f.section == section).collect();
            if facts.is_empty() {
                continue;
            }
            out.push_str(&format!("\n## {}\n", section.title()));
            for fact in facts {
                out.push_str(&format!("- Q: {}\n  A: {}\n", fact.question, fact.answer));
            }
        }
        out
    }
}

// ============================================================================
// Classification Artifacts
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ServiceCategory {
    MereConduit,
    Caching,
    Hosting,
    OnlinePlatform,
    #[serde(alias = "marketplace")]
    OnlineMarketplace,
    #[serde(alias = "online_search_engine")]
    SearchEngine,
    #[serde(alias = "none", alias = "not_intermediary")]
    NotApplicable,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct TerritorialScope {
    pub is_in_scope: bool,
    #[serde(default)]
    pub reasoning: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ServiceClassification {
    pub service_category: ServiceCategory,
    pub is_intermediary: bool,
    pub is_hosting: bool,
    pub is_online_platform: bool,
    pub is_marketplace: bool,
    pub is_search_engine: bool,
    #[serde(default)]
    pub reasoning: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct SizeDesignation {
    pub is_vlop_vlose: bool,
    pub qualifies_for_sme_exemption: bool,
    #[serde(default)]
    pub reasoning: String,
}

/// The three sub-judgments, always produced and published together
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct Classification {
    pub territorial_scope: TerritorialScope,
    pub service_classification: ServiceClassification,
    pub size_designation: SizeDesignation,
}

/// Narrative for one obligation rule
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ObligationAnalysis {
    pub article: String,
    pub title: String,
    pub applies: bool,
    pub implications: String,
    pub action_items: Vec<String>,
}

impl ObligationAnalysis {
    /// Stand-in when the narrative could not be written
    pub fn fallback(article: &str, title: &str, applies: bool) -> Self {
        Self {
            article: article.to_string(),
            title: title.to_string(),
            applies,
            implications: format!("applies: {}, no detailed analysis available", applies),
            action_items: Vec::new(),
        }
    }
}

/// Terminal payload of the classification engine
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ComplianceReport {
    pub company_name: String,
    pub classification: Classification,
    /// One entry per rule, in rule-table order
    pub obligations: Vec<ObligationAnalysis>,
    pub summary: String,
}

impl ComplianceReport {
    pub fn applicable_count(&self) -> usize {
        self.obligations.iter().filter(|o| o.applies).count()
    }
}

// ============================================================================
// Assistant Artifacts
// ============================================================================

/// Terminal payload of the chat assistant
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ChatReply {
    pub response: String,
}
