//! Source citation handling: URL-keyed dedup and extraction from tool text.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

use super::SourceCitation;

/// Most citations attached to a single `tool_end`
pub const MAX_SOURCES_PER_TOOL: usize = 8;

/// Collapse citations sharing a URL.
///
/// Each URL keeps its first-seen position; a later non-empty title replaces
/// an earlier one. Running it on its own output changes nothing.
pub fn dedup_sources(sources: impl IntoIterator<Item = SourceCitation>) -> Vec<SourceCitation> {
    let mut out: Vec<SourceCitation> = Vec::new();
    let mut seen: HashMap<String, usize> = HashMap::new();

    for source in sources {
        let url = source.url.trim();
        if url.is_empty() {
            continue;
        }
        match seen.get(url) {
            Some(&pos) => {
                if source.title.as_deref().is_some_and(|t| !t.trim().is_empty()) {
                    out[pos].title = source.title;
                }
            }
            None => {
                seen.insert(url.to_string(), out.len());
                out.push(SourceCitation {
                    url: url.to_string(),
                    title: source.title.filter(|t| !t.trim().is_empty()),
                });
            }
        }
    }

    out
}

fn titled_link_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"\*\*([^*]+)\*\*\n\s+(https?://[^\s]+)").ok())
        .as_ref()
}

fn bare_url_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r#"https?://[^\s)\]>"']+"#).ok())
        .as_ref()
}

/// Pull citations out of formatted tool output.
///
/// `**Title**` followed by an indented URL on the next line is preferred;
/// if no such pair exists, bare URLs are taken untitled.
pub fn extract_sources(text: &str) -> Vec<SourceCitation> {
    let mut found = Vec::new();

    if let Some(re) = titled_link_pattern() {
        for cap in re.captures_iter(text) {
            if let (Some(title), Some(url)) = (cap.get(1), cap.get(2)) {
                found.push(SourceCitation::new(
                    url.as_str().trim_end_matches(['.', ',']),
                    Some(title.as_str().trim()),
                ));
            }
        }
    }

    if found.is_empty() {
        if let Some(re) = bare_url_pattern() {
            for m in re.find_iter(text) {
                found.push(SourceCitation::new(
                    m.as_str().trim_end_matches(['.', ',']),
                    None,
                ));
            }
        }
    }

    let mut sources = dedup_sources(found);
    sources.truncate(MAX_SOURCES_PER_TOOL);
    sources
}
