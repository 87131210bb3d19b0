//! # Question Table
//!
//! The fixed set of research sub-questions. Loaded once at startup (the
//! bundled table or an override file) and shared read-only by every session.

use std::path::Path;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{CopilotError, CopilotResult};

const DEFAULT_TABLE: &str = include_str!("defaults/questions.json");

/// Category a sub-question belongs to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Section {
    TerritorialScope,
    ServiceType,
    Size,
}

impl Section {
    pub fn all() -> [Section; 3] {
        [Section::TerritorialScope, Section::ServiceType, Section::Size]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Section::TerritorialScope => "territorial_scope",
            Section::ServiceType => "service_type",
            Section::Size => "size",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Section::TerritorialScope => "Territorial scope",
            Section::ServiceType => "Service type",
            Section::Size => "Size",
        }
    }
}

/// One research question
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubQuestion {
    pub section: Section,
    pub question: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guidance: Option<String>,
}

/// Versioned, immutable list of sub-questions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionTable {
    pub version: String,
    questions: Vec<SubQuestion>,
}

impl QuestionTable {
    /// The table bundled with the binary
    pub fn embedded() -> CopilotResult<Self> {
        Self::parse(DEFAULT_TABLE)
    }

    /// Load an override table from disk
    pub async fn load(path: impl AsRef<Path>) -> CopilotResult<Self> {
        let raw = crate::state::io::read_file(path)
            .await
            .map_err(|e| CopilotError::Table {
                table: "question",
                reason: format!("{:#}", e),
            })?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> CopilotResult<Self> {
        let table: QuestionTable =
            serde_json::from_str(raw).map_err(|e| CopilotError::Table {
                table: "question",
                reason: e.to_string(),
            })?;
        if table.questions.is_empty() {
            return Err(CopilotError::Table {
                table: "question",
                reason: "table has no questions".to_string(),
            });
        }
        if let Some(blank) = table.questions.iter().position(|q| q.question.trim().is_empty()) {
            return Err(CopilotError::Table {
                table: "question",
                reason: format!("question {} is empty", blank),
            });
        }
        Ok(table)
    }

    /// Build a table directly (used by callers assembling custom sets)
    pub fn from_questions(version: &str, questions: Vec<SubQuestion>) -> Self {
        Self {
            version: version.to_string(),
            questions,
        }
    }

    pub fn questions(&self) -> &[SubQuestion] {
        &self.questions
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    pub fn in_section(&self, section: Section) -> impl Iterator<Item = &SubQuestion> {
        self.questions.iter().filter(move |q| q.section == section)
    }
}
