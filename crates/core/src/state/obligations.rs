//! # Obligation Rule Table
//!
//! Declarative mapping from classification facets to regulatory articles.
//! Each rule carries a small predicate AST:
//!
//! ```json
//! { "all": ["in_scope", "online_platform", { "any": [{ "not": "sme_exempt" }, "very_large"] }] }
//! ```
//!
//! `{"all": []}` is true and `{"any": []}` is false.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CopilotError, CopilotResult};
use crate::skills::artifact_registry::Classification;

const DEFAULT_TABLE: &str = include_str!("defaults/obligations.json");

/// Boolean facet of a [`Classification`]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Facet {
    InScope,
    Intermediary,
    Hosting,
    OnlinePlatform,
    Marketplace,
    SearchEngine,
    VeryLarge,
    SmeExempt,
}

impl Facet {
    pub fn value(&self, c: &Classification) -> bool {
        let service = &c.service_classification;
        match self {
            Facet::InScope => c.territorial_scope.is_in_scope,
            Facet::Intermediary => service.is_intermediary,
            Facet::Hosting => service.is_hosting,
            Facet::OnlinePlatform => service.is_online_platform,
            Facet::Marketplace => service.is_marketplace,
            Facet::SearchEngine => service.is_search_engine,
            Facet::VeryLarge => c.size_designation.is_vlop_vlose,
            Facet::SmeExempt => c.size_designation.qualifies_for_sme_exemption,
        }
    }
}

/// Applicability predicate over classification facets
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Predicate {
    Facet(Facet),
    All { all: Vec<Predicate> },
    Any { any: Vec<Predicate> },
    Not { not: Box<Predicate> },
}

impl Predicate {
    pub fn evaluate(&self, c: &Classification) -> bool {
        match self {
            Predicate::Facet(facet) => facet.value(c),
            Predicate::All { all } => all.iter().all(|p| p.evaluate(c)),
            Predicate::Any { any } => any.iter().any(|p| p.evaluate(c)),
            Predicate::Not { not } => !not.evaluate(c),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObligationRule {
    pub article: String,
    pub title: String,
    pub applies_when: Predicate,
}

impl ObligationRule {
    pub fn applies(&self, c: &Classification) -> bool {
        self.applies_when.evaluate(c)
    }
}

/// Versioned, immutable list of obligation rules
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleTable {
    pub version: String,
    rules: Vec<ObligationRule>,
}

impl RuleTable {
    /// The table bundled with the binary
    pub fn embedded() -> CopilotResult<Self> {
        Self::parse(DEFAULT_TABLE)
    }

    /// Load an override table from disk
    pub async fn load(path: impl AsRef<Path>) -> CopilotResult<Self> {
        let raw = crate::state::io::read_file(path)
            .await
            .map_err(|e| CopilotError::Table {
                table: "obligation",
                reason: format!("{:#}", e),
            })?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> CopilotResult<Self> {
        let table: RuleTable = serde_json::from_str(raw).map_err(|e| CopilotError::Table {
            table: "obligation",
            reason: e.to_string(),
        })?;
        if table.rules.is_empty() {
            return Err(CopilotError::Table {
                table: "obligation",
                reason: "table has no rules".to_string(),
            });
        }
        let mut seen = std::collections::HashSet::new();
        for rule in &table.rules {
            if !seen.insert(rule.article.as_str()) {
                return Err(CopilotError::Table {
                    table: "obligation",
                    reason: format!("duplicate article {}", rule.article),
                });
            }
        }
        Ok(table)
    }

    pub fn from_rules(version: &str, rules: Vec<ObligationRule>) -> Self {
        Self {
            version: version.to_string(),
            rules,
        }
    }

    pub fn rules(&self) -> &[ObligationRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Every rule paired with its applicability, in table order
    pub fn evaluate<'a>(&'a self, c: &Classification) -> Vec<(&'a ObligationRule, bool)> {
        self.rules.iter().map(|rule| (rule, rule.applies(c))).collect()
    }
}
