//! Concurrent fan-out to the three source adapters and the merge that
//! follows.
//!
//! Each adapter runs in isolation: a missing key or a failed call becomes a
//! diagnostic and zero results from that source, never an aborted request.

use std::collections::{HashMap, HashSet};

use tracing::{info, instrument, warn};

use triangulate_extractor::{ContentExtractor, ExtractorOptions};
use triangulate_shared::{
    AppConfig, Credentials, ResearchError, Result, SearchResult, SourceKind, require_api_key,
};
use triangulate_sources::{AiSearchSource, CustomUrlSource, SourceBatch, WebSearchSource};

use crate::pipeline::ProgressReporter;
use crate::prompts::PromptSet;

/// Baseline score for AI-search and custom results.
const BASELINE_SCORE: f64 = 0.9;
/// Score of a featured (knowledge-graph) result.
const FEATURED_SCORE: f64 = 1.0;
/// Score lost per organic web rank.
const RANK_STEP: f64 = 0.05;

// ---------------------------------------------------------------------------
// CandidatePool
// ---------------------------------------------------------------------------

/// Deduplicated, ranked evidence handed to the synthesizer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CandidatePool {
    sources: Vec<SearchResult>,
}

impl CandidatePool {
    /// Build a pool from already-ranked results.
    pub fn new(sources: Vec<SearchResult>) -> Self {
        Self { sources }
    }

    pub fn sources(&self) -> &[SearchResult] {
        &self.sources
    }

    pub fn into_sources(self) -> Vec<SearchResult> {
        self.sources
    }

    /// Results of one kind, in ranked order.
    pub fn by_kind(&self, kind: SourceKind) -> impl Iterator<Item = &SearchResult> {
        self.sources.iter().filter(move |s| s.source == kind)
    }

    /// Kinds with at least one result, in [`SourceKind::ALL`] order.
    pub fn kinds_present(&self) -> Vec<SourceKind> {
        SourceKind::ALL
            .into_iter()
            .filter(|kind| self.by_kind(*kind).next().is_some())
            .collect()
    }

    pub fn urls(&self) -> Vec<&str> {
        self.sources.iter().filter_map(|s| s.url.as_deref()).collect()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

/// Everything the fan-out produced.
#[derive(Debug, Clone)]
pub struct Aggregation {
    pub pool: CandidatePool,
    /// The AI-search service's own answer, with its attribution header.
    pub ai_answer: Option<String>,
    /// Answer-box or knowledge-graph text from web search.
    pub web_answer: Option<String>,
    pub diagnostics: Vec<String>,
}

// ---------------------------------------------------------------------------
// Aggregator
// ---------------------------------------------------------------------------

/// An adapter that is either ready or was skipped for lack of a key.
enum Slot<T> {
    Ready(T),
    Skipped(String),
}

enum Outcome {
    Fetched(SourceBatch),
    Skipped(String),
    Failed(ResearchError),
}

pub struct Aggregator {
    ai_search: Slot<AiSearchSource>,
    web_search: Slot<WebSearchSource>,
    custom: CustomUrlSource,
    max_per_source: usize,
}

impl Aggregator {
    pub fn new(config: &AppConfig, credentials: &Credentials, prompts: &PromptSet) -> Result<Self> {
        let ai_search = slot(
            require_api_key(
                credentials.ai_search.as_deref(),
                "AI search",
                &config.ai_search.api_key_env,
            )
            .and_then(|key| {
                AiSearchSource::new(&config.ai_search, key, prompts.search_system.clone())
            }),
        )?;

        let web_search = slot(
            require_api_key(
                credentials.web_search.as_deref(),
                "Web search",
                &config.web_search.api_key_env,
            )
            .and_then(|key| WebSearchSource::new(&config.web_search, key)),
        )?;

        let extractor = ContentExtractor::new(ExtractorOptions::from_config(&config.extraction))?;

        Ok(Self {
            ai_search,
            web_search,
            custom: CustomUrlSource::new(extractor),
            max_per_source: config.defaults.max_results_per_source.max(1),
        })
    }

    /// Query every source concurrently and merge what comes back.
    ///
    /// Fails with [`ResearchError::NoSources`] only when no source produced
    /// a single result.
    #[instrument(skip_all, fields(custom_urls = custom_urls.len()))]
    pub async fn aggregate(
        &self,
        query: &str,
        custom_urls: &[String],
        progress: &dyn ProgressReporter,
    ) -> Result<Aggregation> {
        let ai = async {
            match &self.ai_search {
                Slot::Ready(source) => into_outcome(source.fetch(query).await),
                Slot::Skipped(reason) => Outcome::Skipped(reason.clone()),
            }
        };
        let web = async {
            match &self.web_search {
                Slot::Ready(source) => into_outcome(source.fetch(query).await),
                Slot::Skipped(reason) => Outcome::Skipped(reason.clone()),
            }
        };
        let custom = async {
            if custom_urls.is_empty() {
                Outcome::Fetched(SourceBatch::empty(SourceKind::Custom))
            } else {
                into_outcome(self.custom.fetch(custom_urls).await)
            }
        };

        let (ai, web, custom) = tokio::join!(ai, web, custom);

        let mut diagnostics = Vec::new();
        let mut batches = HashMap::new();
        for (kind, outcome) in [
            (SourceKind::AiSearch, ai),
            (SourceKind::WebSearch, web),
            (SourceKind::Custom, custom),
        ] {
            match outcome {
                Outcome::Fetched(batch) => {
                    if let Some(summary) = &batch.failure_summary {
                        warn!(source = %kind, %summary, "partial source failure");
                        diagnostics.push(format!("{}: {summary}", kind.label()));
                    }
                    progress.source_finished(kind, batch.results.len() + batch.featured.len());
                    batches.insert(kind, batch);
                }
                Outcome::Skipped(reason) => {
                    warn!(source = %kind, %reason, "source skipped");
                    progress.source_failed(kind, &reason);
                    diagnostics.push(format!("{}: skipped, {reason}", kind.label()));
                }
                Outcome::Failed(e) => {
                    warn!(source = %kind, error = %e, "source failed");
                    progress.source_failed(kind, &e.to_string());
                    diagnostics.push(format!("{}: {e}", kind.label()));
                }
            }
        }

        let ai_answer = batches
            .get_mut(&SourceKind::AiSearch)
            .and_then(|b| b.answer.take());
        let web_answer = batches
            .get_mut(&SourceKind::WebSearch)
            .and_then(|b| b.answer.take());

        let pool = merge(
            batches.remove(&SourceKind::AiSearch),
            batches.remove(&SourceKind::WebSearch),
            batches.remove(&SourceKind::Custom),
            self.max_per_source,
        );

        if pool.is_empty() {
            return Err(ResearchError::NoSources { diagnostics });
        }

        info!(
            total = pool.len(),
            kinds = ?pool.kinds_present(),
            diagnostics = diagnostics.len(),
            "aggregation complete"
        );

        Ok(Aggregation {
            pool,
            ai_answer,
            web_answer,
            diagnostics,
        })
    }
}

/// A configuration error skips the adapter; anything else aborts construction.
fn slot<T>(built: Result<T>) -> Result<Slot<T>> {
    match built {
        Ok(source) => Ok(Slot::Ready(source)),
        Err(e) if e.is_configuration() => Ok(Slot::Skipped(e.to_string())),
        Err(e) => Err(e),
    }
}

fn into_outcome(result: Result<SourceBatch>) -> Outcome {
    match result {
        Ok(batch) => Outcome::Fetched(batch),
        Err(e) if e.is_configuration() => Outcome::Skipped(e.to_string()),
        Err(e) => Outcome::Failed(e),
    }
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

/// URL with fragment and trailing slash removed, for duplicate detection.
pub fn dedup_key(url: &str) -> String {
    let url = url.trim();
    let url = url.split_once('#').map_or(url, |(base, _)| base);
    url.trim_end_matches('/').to_string()
}

/// Merge batches in source order, score, deduplicate and cap per kind.
///
/// Results without a URL cannot be cited and are dropped.
pub fn merge(
    ai: Option<SourceBatch>,
    web: Option<SourceBatch>,
    custom: Option<SourceBatch>,
    max_per_source: usize,
) -> CandidatePool {
    let mut scored: Vec<SearchResult> = Vec::new();

    if let Some(batch) = ai {
        scored.extend(batch.results.into_iter().map(|r| with_score(r, BASELINE_SCORE)));
    }
    if let Some(batch) = web {
        scored.extend(batch.featured.into_iter().map(|r| with_score(r, FEATURED_SCORE)));
        scored.extend(batch.results.into_iter().enumerate().map(|(i, r)| {
            let score = (BASELINE_SCORE - RANK_STEP * i as f64).max(0.0);
            with_score(r, score)
        }));
    }
    if let Some(batch) = custom {
        scored.extend(batch.results.into_iter().map(|r| with_score(r, BASELINE_SCORE)));
    }

    let mut seen = HashSet::new();
    let mut per_kind: HashMap<SourceKind, usize> = HashMap::new();
    let mut kept: Vec<SearchResult> = scored
        .into_iter()
        .filter(|r| {
            let Some(url) = r.url.as_deref().filter(|u| !u.trim().is_empty()) else {
                return false;
            };
            let count = per_kind.entry(r.source).or_default();
            if *count >= max_per_source || !seen.insert(dedup_key(url)) {
                return false;
            }
            *count += 1;
            true
        })
        .collect();

    kept.sort_by(|a, b| b.relevance_score.total_cmp(&a.relevance_score));
    for result in &mut kept {
        result.ensure_title();
    }
    CandidatePool::new(kept)
}

fn with_score(mut result: SearchResult, score: f64) -> SearchResult {
    result.relevance_score = score;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::SilentProgress;
    use serde_json::json;

    fn result(kind: SourceKind, url: &str, title: &str) -> SearchResult {
        SearchResult::new(kind, Some(url.to_string()), title)
    }

    fn batch(kind: SourceKind, results: Vec<SearchResult>) -> SourceBatch {
        SourceBatch {
            results,
            ..SourceBatch::empty(kind)
        }
    }

    #[test]
    fn dedup_key_ignores_fragment_and_trailing_slash() {
        assert_eq!(dedup_key("https://a.example/x/#top"), "https://a.example/x");
        assert_eq!(dedup_key(" https://a.example/x "), "https://a.example/x");
    }

    #[test]
    fn merge_dedups_first_occurrence_wins() {
        let ai = batch(
            SourceKind::AiSearch,
            vec![result(SourceKind::AiSearch, "https://shared.example/a", "From AI")],
        );
        let web = batch(
            SourceKind::WebSearch,
            vec![
                result(SourceKind::WebSearch, "https://shared.example/a/", "From web"),
                result(SourceKind::WebSearch, "https://web.example/b", "B"),
            ],
        );
        let pool = merge(Some(ai), Some(web), None, 10);

        assert_eq!(pool.len(), 2);
        let shared = pool.sources().iter().find(|s| s.title == "From AI").unwrap();
        assert_eq!(shared.source, SourceKind::AiSearch);
        let urls = pool.urls();
        let unique: HashSet<_> = urls.iter().map(|u| dedup_key(u)).collect();
        assert_eq!(unique.len(), urls.len());
    }

    #[test]
    fn merge_scores_and_orders() {
        let web = SourceBatch {
            featured: vec![result(SourceKind::WebSearch, "https://kg.example/", "KG")],
            ..batch(
                SourceKind::WebSearch,
                vec![
                    result(SourceKind::WebSearch, "https://w.example/1", "W1"),
                    result(SourceKind::WebSearch, "https://w.example/2", "W2"),
                ],
            )
        };
        let ai = batch(
            SourceKind::AiSearch,
            vec![result(SourceKind::AiSearch, "https://ai.example/1", "A1")],
        );
        let custom = batch(
            SourceKind::Custom,
            vec![result(SourceKind::Custom, "https://c.example/1", "C1")],
        );
        let pool = merge(Some(ai), Some(web), Some(custom), 10);

        let titles: Vec<_> = pool.sources().iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["KG", "A1", "W1", "C1", "W2"]);
        let scores: Vec<_> = pool.sources().iter().map(|s| s.relevance_score).collect();
        assert!((scores[4] - 0.85).abs() < 1e-9);
    }

    #[test]
    fn merge_caps_each_kind_and_drops_urlless() {
        let web: Vec<_> = (0..15)
            .map(|i| result(SourceKind::WebSearch, &format!("https://w.example/{i}"), "W"))
            .collect();
        let mut ai = vec![result(SourceKind::AiSearch, "https://ai.example/", "A")];
        ai.push(SearchResult::new(SourceKind::AiSearch, None, "No URL"));

        let pool = merge(
            Some(batch(SourceKind::AiSearch, ai)),
            Some(batch(SourceKind::WebSearch, web)),
            None,
            10,
        );
        assert_eq!(pool.by_kind(SourceKind::WebSearch).count(), 10);
        assert_eq!(pool.by_kind(SourceKind::AiSearch).count(), 1);
        assert_eq!(
            pool.kinds_present(),
            vec![SourceKind::AiSearch, SourceKind::WebSearch]
        );
    }

    #[test]
    fn merge_backfills_titles() {
        let web = batch(
            SourceKind::WebSearch,
            vec![result(SourceKind::WebSearch, "https://example.com/my-article-title", "")],
        );
        let pool = merge(None, Some(web), None, 10);
        assert_eq!(pool.sources()[0].title, "My Article Title");
    }

    fn config_for(server: &wiremock::MockServer) -> AppConfig {
        let mut config = AppConfig::default();
        config.ai_search.search_endpoint = format!("{}/ai/search", server.uri());
        config.ai_search.chat_endpoint = format!("{}/ai/chat", server.uri());
        config.web_search.endpoint = format!("{}/web", server.uri());
        config
    }

    fn all_keys() -> Credentials {
        Credentials {
            ai_search: Some("ai".into()),
            web_search: Some("web".into()),
            synthesis: None,
        }
    }

    async fn mount_web(server: &wiremock::MockServer) {
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .and(wiremock::matchers::path("/web"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_json(json!({
                "organic": [
                    {"title": "Foxes in towns", "link": "https://w.example/foxes", "snippet": "s"}
                ]
            })))
            .mount(server)
            .await;
    }

    async fn mount_custom_page(server: &wiremock::MockServer) -> String {
        let html = std::fs::read_to_string(
            std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../../../fixtures/html/paragraphs.html"),
        )
        .unwrap();
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/custom/foxes"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_raw(html, "text/html"))
            .mount(server)
            .await;
        format!("{}/custom/foxes", server.uri())
    }

    #[tokio::test]
    async fn ai_search_outage_leaves_other_sources() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .and(wiremock::matchers::path_regex("^/ai/"))
            .respond_with(wiremock::ResponseTemplate::new(500))
            .mount(&server)
            .await;
        mount_web(&server).await;
        let custom_url = mount_custom_page(&server).await;

        let aggregator =
            Aggregator::new(&config_for(&server), &all_keys(), &PromptSet::default()).unwrap();
        let aggregation = aggregator
            .aggregate("urban foxes", &[custom_url], &SilentProgress)
            .await
            .unwrap();

        assert_eq!(
            aggregation.pool.kinds_present(),
            vec![SourceKind::WebSearch, SourceKind::Custom]
        );
        assert!(aggregation.ai_answer.is_none());
        assert_eq!(aggregation.diagnostics.len(), 1);
        assert!(aggregation.diagnostics[0].starts_with("AI search: "));
        assert!(aggregation.diagnostics[0].contains("500"));
    }

    #[tokio::test]
    async fn missing_keys_are_skipped_not_fatal() {
        let server = wiremock::MockServer::start().await;
        mount_web(&server).await;

        let credentials = Credentials {
            web_search: Some("web".into()),
            ..Credentials::default()
        };
        let aggregator =
            Aggregator::new(&config_for(&server), &credentials, &PromptSet::default()).unwrap();
        let aggregation = aggregator
            .aggregate("urban foxes", &[], &SilentProgress)
            .await
            .unwrap();

        assert_eq!(aggregation.pool.len(), 1);
        assert_eq!(aggregation.diagnostics.len(), 1);
        assert!(aggregation.diagnostics[0].contains("PERPLEXITY_API_KEY"));
        assert!(aggregation.diagnostics[0].starts_with("AI search: skipped, "));
    }

    #[test]
    fn configuration_errors_skip_other_errors_fail() {
        assert!(matches!(
            into_outcome(Err(ResearchError::config("no key"))),
            Outcome::Skipped(reason) if reason.contains("no key")
        ));
        assert!(matches!(
            into_outcome(Err(ResearchError::Network("reset".into()))),
            Outcome::Failed(ResearchError::Network(_))
        ));
        assert!(matches!(
            slot::<()>(Err(ResearchError::config("no key"))),
            Ok(Slot::Skipped(_))
        ));
        assert!(slot::<()>(Err(ResearchError::Network("tls".into()))).is_err());
    }

    #[tokio::test]
    async fn all_sources_failing_is_no_sources() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::any())
            .respond_with(wiremock::ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let aggregator =
            Aggregator::new(&config_for(&server), &all_keys(), &PromptSet::default()).unwrap();
        let urls = vec![format!("{}/custom/down", server.uri())];
        let err = aggregator
            .aggregate("anything", &urls, &SilentProgress)
            .await
            .unwrap_err();

        match err {
            ResearchError::NoSources { diagnostics } => assert_eq!(diagnostics.len(), 3),
            other => panic!("expected NoSources, got {other:?}"),
        }
    }
}
