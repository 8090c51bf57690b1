//! Core domain types for Triangulate research results.

use chrono::{DateTime, Utc};
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use url::Url;

/// Title used when nothing better can be derived for a source.
pub const UNTITLED_SOURCE: &str = "Untitled Source";

// ---------------------------------------------------------------------------
// SourceKind
// ---------------------------------------------------------------------------

/// Origin of a piece of evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    /// AI-answer search service (results plus an inline generated answer).
    AiSearch,
    /// Generic web search (organic results).
    WebSearch,
    /// User-supplied URLs fetched and extracted directly.
    Custom,
}

impl SourceKind {
    /// All source kinds in merge order.
    pub const ALL: [SourceKind; 3] = [Self::AiSearch, Self::WebSearch, Self::Custom];

    /// Stable machine name (matches the serde representation).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AiSearch => "ai-search",
            Self::WebSearch => "web-search",
            Self::Custom => "custom",
        }
    }

    /// Human label used in notes and prompt sections.
    pub fn label(&self) -> &'static str {
        match self {
            Self::AiSearch => "AI search",
            Self::WebSearch => "Web search",
            Self::Custom => "Custom",
        }
    }

    /// Subsection heading inside the "SOURCES USED" block.
    pub fn sources_used_label(&self) -> &'static str {
        match self {
            Self::AiSearch => "AI Search Sources",
            Self::WebSearch => "Web Search Sources",
            Self::Custom => "Custom Sources",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Prominence hint attached by the fetchers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

// ---------------------------------------------------------------------------
// SearchResult
// ---------------------------------------------------------------------------

/// One piece of evidence, normalized across all vendors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Source URL; the dedup key within one aggregated result set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Display title. May be empty until [`SearchResult::ensure_title`] runs.
    #[serde(default)]
    pub title: String,
    /// Short excerpt shown in citations and prompts.
    #[serde(default)]
    pub snippet: String,
    /// Full extracted body (custom sources only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Which adapter produced this result.
    pub source: SourceKind,
    /// Whether the final answer cites this source.
    #[serde(default)]
    pub used: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    /// Ordering hint computed by the aggregator (higher first).
    #[serde(default)]
    pub relevance_score: f64,
    /// Rank position reported by the vendor (1-based).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<u32>,
}

impl SearchResult {
    /// Create a result with only the required fields set.
    pub fn new(source: SourceKind, url: Option<String>, title: impl Into<String>) -> Self {
        Self {
            url,
            title: title.into(),
            snippet: String::new(),
            content: None,
            source,
            used: false,
            priority: None,
            relevance_score: 0.0,
            position: None,
        }
    }

    /// Builder-style snippet setter.
    pub fn with_snippet(mut self, snippet: impl Into<String>) -> Self {
        self.snippet = snippet.into();
        self
    }

    /// Best available body text: full content, else the snippet.
    pub fn body(&self) -> &str {
        match &self.content {
            Some(content) if !content.is_empty() => content,
            _ => &self.snippet,
        }
    }

    /// Guarantee a non-empty title, deriving one when the vendor gave none.
    pub fn ensure_title(&mut self) {
        if self.title.trim().is_empty() {
            self.title = derive_title(self.url.as_deref(), &self.snippet);
        }
    }
}

/// Derive a citation title from a URL, falling back to the snippet.
///
/// Order: humanized last path segment, then domain name, then a snippet
/// excerpt, then [`UNTITLED_SOURCE`].
pub fn derive_title(url: Option<&str>, snippet: &str) -> String {
    if let Some(parsed) = url.and_then(|u| Url::parse(u).ok()) {
        if let Some(title) = title_from_path(&parsed) {
            return title;
        }
        if let Some(title) = title_from_domain(&parsed) {
            return title;
        }
    }

    let snippet = snippet.trim();
    if snippet.is_empty() {
        return UNTITLED_SOURCE.to_string();
    }
    let excerpt: String = snippet.chars().take(30).collect();
    format!("Source: {excerpt}...")
}

fn title_from_path(url: &Url) -> Option<String> {
    let last = url.path_segments()?.filter(|s| !s.is_empty()).last()?;
    let decoded = percent_decode_str(last).decode_utf8_lossy().into_owned();
    let stem = match decoded.rsplit_once('.') {
        Some((stem, ext))
            if !stem.is_empty() && !ext.is_empty() && ext.chars().all(char::is_alphanumeric) =>
        {
            stem.to_string()
        }
        _ => decoded,
    };
    let title = title_case(&stem.replace(['-', '_'], " "));
    (!title.is_empty()).then_some(title)
}

fn title_from_domain(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    let host = host.strip_prefix("www.").unwrap_or(host);
    let mut labels: Vec<&str> = host.split('.').collect();
    if labels.len() > 1 {
        labels.pop();
    }
    let title = title_case(&labels.join(".").replace(['-', '_'], " "));
    (!title.is_empty()).then_some(title)
}

/// Capitalize the first letter of each whitespace-separated word.
fn title_case(s: &str) -> String {
    s.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

// ---------------------------------------------------------------------------
// ExtractionResult
// ---------------------------------------------------------------------------

/// Output of fetching and extracting one custom URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    /// Page title, when one could be found.
    pub title: Option<String>,
    pub url: String,
    /// Extracted main text, already truncated to the content cap.
    pub content: String,
}

// ---------------------------------------------------------------------------
// ResearchQuery / ResearchResult
// ---------------------------------------------------------------------------

/// Inbound research request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchQuery {
    /// Natural-language question; must be non-empty after trimming.
    pub query: String,
    /// Optional user-supplied URLs (http/https only).
    #[serde(default)]
    pub custom_urls: Vec<String>,
    /// Requested answer language. Translation happens outside the core.
    #[serde(default = "default_language")]
    pub language: String,
}

impl ResearchQuery {
    /// Create a query with no custom URLs and the default language.
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            custom_urls: Vec::new(),
            language: default_language(),
        }
    }
}

fn default_language() -> String {
    "english".into()
}

/// The outward-facing answer for one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchResult {
    /// The query as submitted, trimmed.
    pub query: String,
    /// Final Markdown answer.
    pub answer: String,
    /// Candidate sources, annotated with `used`.
    pub sources: Vec<SearchResult>,
    pub generated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_from_last_path_segment() {
        assert_eq!(
            derive_title(Some("https://example.com/my-article-title"), ""),
            "My Article Title"
        );
        assert_eq!(
            derive_title(Some("https://example.com/blog/rust_async_guide.html"), ""),
            "Rust Async Guide"
        );
    }

    #[test]
    fn title_from_domain_when_no_path() {
        assert_eq!(derive_title(Some("https://www.example.com/"), ""), "Example");
        assert_eq!(derive_title(Some("https://my-site.org"), ""), "My Site");
    }

    #[test]
    fn title_from_snippet_then_literal() {
        assert_eq!(
            derive_title(None, "The quick brown fox jumps over the lazy dog"),
            "Source: The quick brown fox jumps over...",
        );
        assert_eq!(derive_title(None, "  "), UNTITLED_SOURCE);
        assert_eq!(derive_title(Some("not a url"), ""), UNTITLED_SOURCE);
    }

    #[test]
    fn ensure_title_keeps_existing() {
        let mut result = SearchResult::new(
            SourceKind::WebSearch,
            Some("https://example.com/x".into()),
            "Given Title",
        );
        result.ensure_title();
        assert_eq!(result.title, "Given Title");

        let mut empty = SearchResult::new(
            SourceKind::WebSearch,
            Some("https://example.com/my-article-title".into()),
            "",
        );
        empty.ensure_title();
        assert_eq!(empty.title, "My Article Title");
    }

    #[test]
    fn percent_encoded_segments_are_decoded() {
        assert_eq!(
            derive_title(Some("https://example.com/caf%C3%A9-guide"), ""),
            "Café Guide"
        );
        assert_eq!(
            derive_title(Some("https://example.com/docs/100%25-safe%zz"), ""),
            "100% Safe%zz"
        );
    }

    #[test]
    fn source_kind_serialization() {
        let json = serde_json::to_string(&SourceKind::AiSearch).expect("serialize");
        assert_eq!(json, "\"ai-search\"");
        let parsed: SourceKind = serde_json::from_str("\"web-search\"").expect("deserialize");
        assert_eq!(parsed, SourceKind::WebSearch);
    }

    #[test]
    fn research_result_serialization() {
        let result = ResearchResult {
            query: "what is rust".into(),
            answer: "# Rust".into(),
            sources: vec![SearchResult::new(
                SourceKind::Custom,
                Some("https://example.com/".into()),
                "Example",
            )],
            generated_at: Utc::now(),
        };

        let json = serde_json::to_string_pretty(&result).expect("serialize");
        assert!(json.contains("\"generated_at\""));
        let parsed: ResearchResult = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed.sources.len(), 1);
        assert_eq!(parsed.sources[0].source, SourceKind::Custom);
    }

    #[test]
    fn research_query_defaults() {
        let query: ResearchQuery = serde_json::from_str(r#"{"query":"hello"}"#).expect("parse");
        assert_eq!(query.language, "english");
        assert!(query.custom_urls.is_empty());
    }
}
