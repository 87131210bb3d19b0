//! Default prompt templates bundled at compile time.
//!
//! Placeholders are written `{{name}}` and filled by [`render`].

/// Shared system instructions
pub const SYSTEM: &str = "You are a careful analyst of EU Digital Services Act compliance. \
Follow the requested output format exactly.";

/// Entity resolution - judge one round of search results
pub const MATCHER_EVALUATE: &str = include_str!("defaults/matcher_evaluate.md");

/// Research - extract an answer from search results
pub const RESEARCH_EXTRACT: &str = include_str!("defaults/research_extract.md");

/// Research - advisory consistency notes over all answers
pub const RESEARCH_CONSISTENCY: &str = include_str!("defaults/research_consistency.md");

/// Classification - the single atomic classification call
pub const CLASSIFIER: &str = include_str!("defaults/classifier.md");

/// Obligations - narrative for one rule
pub const OBLIGATION_NARRATIVE: &str = include_str!("defaults/obligation_narrative.md");

/// Obligations - executive summary of the report
pub const REPORT_SUMMARY: &str = include_str!("defaults/report_summary.md");

/// Assistant - one reason/act step
pub const ASSISTANT_STEP: &str = include_str!("defaults/assistant_step.md");

/// Assistant - forced answer once the step cap is reached
pub const ASSISTANT_FINAL: &str = include_str!("defaults/assistant_final.md");

/// All default prompts with their slugs
pub fn all_defaults() -> Vec<(&'static str, &'static str)> {
    vec![
        ("matcher_evaluate", MATCHER_EVALUATE),
        ("research_extract", RESEARCH_EXTRACT),
        ("research_consistency", RESEARCH_CONSISTENCY),
        ("classifier", CLASSIFIER),
        ("obligation_narrative", OBLIGATION_NARRATIVE),
        ("report_summary", REPORT_SUMMARY),
        ("assistant_step", ASSISTANT_STEP),
        ("assistant_final", ASSISTANT_FINAL),
    ]
}

/// Fill `{{key}}` placeholders. Unknown placeholders are left as is.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (key, value) in vars {
        out = out.replace(&format!("{{{{{}}}}}", key), value);
    }
    out
}
