//! AI-answer search adapter.
//!
//! The structured search endpoint is tried first. Any failure there
//! (non-2xx, transport error, malformed body) falls back to a chat
//! completion whose citations are recovered from the response and from
//! URLs embedded in the generated text.

use std::collections::HashSet;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, instrument, warn};

use triangulate_markdown::normalize_answer;
use triangulate_shared::{AiSearchConfig, Priority, ResearchError, Result, SearchResult, SourceKind};

use crate::chat::{ChatClient, ChatMessage, ChatRequest};
use crate::{SourceBatch, build_client, transport_error, upstream_error};

pub const SERVICE: &str = "ai-search";

/// Results at these leading positions are marked high priority.
const HIGH_PRIORITY_COUNT: usize = 3;

const ANALYSIS_HEADER: &str = "## AI Search Analysis";
const SEARCH_FOOTER: &str =
    "*The above analysis was generated by the AI search service and enriched with web search results.*";
const CHAT_FOOTER: &str =
    "*This comprehensive analysis was generated by the AI search service with integrated web search.*";
const CHAT_SNIPPET: &str = "Source from AI search research";

const RESEARCH_DIRECTIVE: &str = "\n\nIMPORTANT: Your response MUST include rich, detailed information with many facts, figures, and specific details. Include at least 5-10 different sources in your research. Prioritize authoritative and diverse sources. ALWAYS include your sources.";

const FALLBACK_TEMPERATURE: f32 = 0.1;
const FALLBACK_MAX_TOKENS: u32 = 2000;

/// How far before a URL to look for its title.
const TITLE_WINDOW_CHARS: usize = 100;

static URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://[^\s)\]]+").expect("valid regex"));
static LINK_TITLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]+)\]\(\s*$").expect("valid regex"));
static QUOTED_TITLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"["']([^"']+)["']\s*\(?\s*$"#).expect("valid regex"));

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    answer: Option<String>,
    web_search: WebSearchBlock,
}

#[derive(Deserialize)]
struct WebSearchBlock {
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[derive(Deserialize)]
struct SearchHit {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    extract: Option<String>,
    #[serde(default)]
    content: Option<String>,
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

pub struct AiSearchSource {
    http: Client,
    chat: ChatClient,
    config: AiSearchConfig,
    api_key: String,
    system_prompt: String,
}

impl AiSearchSource {
    /// `system_prompt` is the base instruction for the chat fallback.
    pub fn new(
        config: &AiSearchConfig,
        api_key: impl Into<String>,
        system_prompt: impl Into<String>,
    ) -> Result<Self> {
        let api_key = api_key.into();
        let timeout = Duration::from_secs(config.timeout_secs);
        Ok(Self {
            http: build_client(timeout)?,
            chat: ChatClient::new(SERVICE, config.chat_endpoint.clone(), api_key.clone(), timeout)?,
            config: config.clone(),
            api_key,
            system_prompt: system_prompt.into(),
        })
    }

    #[instrument(skip_all, fields(service = SERVICE))]
    pub async fn fetch(&self, query: &str) -> Result<SourceBatch> {
        let batch = match self.search(query).await {
            Ok(batch) => batch,
            Err(e) => {
                warn!(error = %e, "search endpoint failed, falling back to chat completion");
                self.chat_fallback(query).await?
            }
        };
        info!(
            results = batch.results.len(),
            has_answer = batch.answer.is_some(),
            "AI search complete"
        );
        Ok(batch)
    }

    async fn search(&self, query: &str) -> Result<SourceBatch> {
        let body = json!({
            "query": query,
            "highlight": true,
            "web_search": true,
            "include_answer": true,
            "include_links": true,
            "max_results": self.config.max_results,
        });

        let response = self
            .http
            .post(&self.config.search_endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(SERVICE, e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(upstream_error(SERVICE, status.as_u16(), &text));
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| ResearchError::parse(format!("{SERVICE}: invalid search body: {e}")))?;

        let results = parsed
            .web_search
            .results
            .into_iter()
            .enumerate()
            .map(|(i, hit)| search_hit_to_result(i, hit))
            .collect();

        let answer = parsed
            .answer
            .map(|a| normalize_answer(&a))
            .filter(|a| !a.is_empty())
            .map(|a| format!("{ANALYSIS_HEADER}\n\n{a}\n\n{SEARCH_FOOTER}"));

        Ok(SourceBatch {
            results,
            answer,
            ..SourceBatch::empty(SourceKind::AiSearch)
        })
    }

    async fn chat_fallback(&self, query: &str) -> Result<SourceBatch> {
        let request = ChatRequest {
            model: self.config.model.clone(),
            messages: vec![
                ChatMessage::system(format!("{}{RESEARCH_DIRECTIVE}", self.system_prompt)),
                ChatMessage::user(format!(
                    "I need comprehensive information about: {query}. Please research this thoroughly and provide detailed facts, data points, and insights from multiple sources. Include rich context and specific details."
                )),
            ],
            temperature: FALLBACK_TEMPERATURE,
            max_tokens: FALLBACK_MAX_TOKENS,
            return_citations: true,
        };
        let completion = self.chat.complete(&request).await?;
        let text = completion.content;

        let results = collect_citation_urls(&text, &completion.citations)
            .into_iter()
            .enumerate()
            .map(|(i, url)| {
                let title = citation_title(&text, &url).unwrap_or_default();
                let mut result = SearchResult::new(SourceKind::AiSearch, Some(url), title)
                    .with_snippet(CHAT_SNIPPET);
                result.priority = Some(priority_for(i));
                result.ensure_title();
                result
            })
            .collect();

        Ok(SourceBatch {
            results,
            answer: Some(format!(
                "{ANALYSIS_HEADER}\n\n{}\n\n{CHAT_FOOTER}",
                normalize_answer(&text)
            )),
            ..SourceBatch::empty(SourceKind::AiSearch)
        })
    }
}

fn priority_for(index: usize) -> Priority {
    if index < HIGH_PRIORITY_COUNT {
        Priority::High
    } else {
        Priority::Medium
    }
}

fn search_hit_to_result(index: usize, hit: SearchHit) -> SearchResult {
    let extract = hit.extract.as_deref().map(normalize_answer).unwrap_or_default();
    let content = hit.content.as_deref().map(normalize_answer).unwrap_or_default();
    let snippet = match (extract.is_empty(), content.is_empty()) {
        (false, false) if extract != content => format!("{extract}\n\n{content}"),
        (false, _) => extract,
        (true, _) => content,
    };

    let mut result =
        SearchResult::new(SourceKind::AiSearch, hit.url, hit.title.unwrap_or_default())
            .with_snippet(snippet);
    result.priority = Some(priority_for(index));
    result.position = u32::try_from(index + 1).ok();
    result.ensure_title();
    result
}

/// URLs embedded in `text` followed by the explicit citations, deduplicated.
fn collect_citation_urls(text: &str, citations: &[String]) -> Vec<String> {
    let embedded = URL_RE
        .find_iter(text)
        .map(|m| trim_url_punctuation(m.as_str()).to_string());
    let cited = citations.iter().map(|c| c.trim().to_string());

    let mut seen = HashSet::new();
    embedded
        .chain(cited)
        .filter(|url| !url.is_empty() && seen.insert(url.clone()))
        .collect()
}

/// Strip sentence punctuation that the URL regex swallowed.
pub(crate) fn trim_url_punctuation(url: &str) -> &str {
    url.trim_end_matches(['.', ',', ';', ':', '!', '?', '"', '\'', '>', '*', '_'])
}

/// A Markdown link label or a quoted string right before the URL.
fn citation_title(text: &str, url: &str) -> Option<String> {
    let start = text.find(url)?;
    let before = &text[..start];
    let window_start = before
        .char_indices()
        .rev()
        .nth(TITLE_WINDOW_CHARS - 1)
        .map_or(0, |(i, _)| i);
    let window = &before[window_start..];

    [&*LINK_TITLE_RE, &*QUOTED_TITLE_RE]
        .into_iter()
        .find_map(|re| re.captures(window))
        .map(|caps| caps[1].trim().to_string())
        .filter(|title| !title.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config_for(server: &wiremock::MockServer) -> AiSearchConfig {
        AiSearchConfig {
            search_endpoint: format!("{}/search", server.uri()),
            chat_endpoint: format!("{}/chat/completions", server.uri()),
            ..AiSearchConfig::default()
        }
    }

    #[test]
    fn titles_recovered_from_surrounding_text() {
        let text = r#"See [Ocean Report](https://ocean.example/report) and "Reef Survey" (https://reef.example/survey) or https://bare.example/page."#;
        assert_eq!(
            citation_title(text, "https://ocean.example/report").as_deref(),
            Some("Ocean Report")
        );
        assert_eq!(
            citation_title(text, "https://reef.example/survey").as_deref(),
            Some("Reef Survey")
        );
        assert_eq!(citation_title(text, "https://bare.example/page"), None);
    }

    #[test]
    fn citation_urls_are_trimmed_and_unioned() {
        let text = "Read https://a.example/x. Then https://b.example/y, and https://a.example/x again.";
        let urls = collect_citation_urls(
            text,
            &["https://b.example/y".into(), "https://c.example/z".into()],
        );
        assert_eq!(
            urls,
            vec!["https://a.example/x", "https://b.example/y", "https://c.example/z"]
        );
    }

    #[test]
    fn snippet_combines_extract_and_content() {
        let hit = SearchHit {
            url: Some("https://x.example/tides-and-moons".into()),
            title: None,
            extract: Some("Extract <b>text</b>".into()),
            content: Some("Longer content".into()),
        };
        let result = search_hit_to_result(4, hit);
        assert_eq!(result.snippet, "Extract **text**\n\nLonger content");
        assert_eq!(result.title, "Tides And Moons");
        assert_eq!(result.priority, Some(Priority::Medium));
        assert_eq!(result.position, Some(5));
    }

    #[tokio::test]
    async fn structured_search_results() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .and(wiremock::matchers::path("/search"))
            .and(wiremock::matchers::header("authorization", "Bearer pk"))
            .and(wiremock::matchers::body_partial_json(json!({
                "query": "tide pools",
                "include_answer": true,
                "max_results": 10
            })))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_json(json!({
                "answer": "Tide pools <em>hold</em> water.",
                "web_search": {"results": [
                    {"url": "https://a.example/1", "title": "One", "extract": "first"},
                    {"url": "https://a.example/2", "title": "Two", "content": "second"},
                    {"url": "https://a.example/3", "title": "Three"},
                    {"url": "https://a.example/4", "title": "Four"}
                ]}
            })))
            .mount(&server)
            .await;

        let source = AiSearchSource::new(&config_for(&server), "pk", "system").unwrap();
        let batch = source.fetch("tide pools").await.unwrap();

        assert_eq!(batch.kind, SourceKind::AiSearch);
        assert_eq!(batch.results.len(), 4);
        let priorities: Vec<_> = batch.results.iter().map(|r| r.priority).collect();
        assert_eq!(
            priorities,
            vec![
                Some(Priority::High),
                Some(Priority::High),
                Some(Priority::High),
                Some(Priority::Medium)
            ]
        );
        let answer = batch.answer.unwrap();
        assert!(answer.starts_with("## AI Search Analysis\n\nTide pools *hold* water."));
        assert!(answer.ends_with(SEARCH_FOOTER));
    }

    #[tokio::test]
    async fn falls_back_to_chat_on_server_error() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .and(wiremock::matchers::path("/search"))
            .respond_with(wiremock::ResponseTemplate::new(500))
            .mount(&server)
            .await;
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .and(wiremock::matchers::path("/chat/completions"))
            .and(wiremock::matchers::body_partial_json(json!({
                "model": "sonar-pro",
                "max_tokens": 2000,
                "return_citations": true
            })))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"content": "Per \"Coastal Survey\" (https://coast.example/survey), pools warm fast."}}],
                "citations": ["https://cite.example/a"]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let source = AiSearchSource::new(&config_for(&server), "pk", "system").unwrap();
        let batch = source.fetch("tide pools").await.unwrap();

        let urls: Vec<_> = batch.results.iter().filter_map(|r| r.url.as_deref()).collect();
        assert_eq!(urls, vec!["https://coast.example/survey", "https://cite.example/a"]);
        assert_eq!(batch.results[0].title, "Coastal Survey");
        assert_eq!(batch.results[0].snippet, CHAT_SNIPPET);
        assert!(batch.answer.unwrap().ends_with(CHAT_FOOTER));
    }

    #[tokio::test]
    async fn both_endpoints_failing_is_an_error() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .respond_with(wiremock::ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let source = AiSearchSource::new(&config_for(&server), "pk", "system").unwrap();
        let err = source.fetch("anything").await.unwrap_err();
        assert!(matches!(err, ResearchError::Upstream { status: 500, .. }));
    }
}
