//! Custom-URL adapter: user-supplied pages run through the content extractor.
//!
//! The whole batch is validated before anything is fetched. After that,
//! each URL succeeds or fails on its own.

use std::collections::HashSet;

use futures::StreamExt;
use tracing::{debug, info, instrument, warn};

use triangulate_extractor::{ContentExtractor, ExtractionError, parse_http_url};
use triangulate_shared::{ExtractionResult, ResearchError, Result, SearchResult, SourceKind};

use crate::SourceBatch;

/// Characters of extracted content kept as the snippet.
const SNIPPET_CHARS: usize = 300;

pub struct CustomUrlSource {
    extractor: ContentExtractor,
}

impl CustomUrlSource {
    pub fn new(extractor: ContentExtractor) -> Self {
        Self { extractor }
    }

    /// Fail with every malformed or non-http(s) URL named.
    pub fn validate(urls: &[String]) -> Result<()> {
        let invalid: Vec<&str> = urls
            .iter()
            .map(String::as_str)
            .filter(|url| parse_http_url(url).is_err())
            .collect();
        if invalid.is_empty() {
            Ok(())
        } else {
            Err(ResearchError::validation(format!(
                "Invalid URLs detected: {}",
                invalid.join(", ")
            )))
        }
    }

    #[instrument(skip_all, fields(urls = urls.len()))]
    pub async fn fetch(&self, urls: &[String]) -> Result<SourceBatch> {
        Self::validate(urls)?;

        let mut seen = HashSet::new();
        let unique: Vec<String> = urls
            .iter()
            .map(|url| url.trim().to_string())
            .filter(|url| seen.insert(url.clone()))
            .collect();

        let concurrency = self.extractor.options().concurrency;
        let outcomes: Vec<(String, std::result::Result<ExtractionResult, ExtractionError>)> =
            futures::stream::iter(unique)
                .map(|url| async move {
                    let outcome = self.extractor.try_extract(&url).await;
                    (url, outcome)
                })
                .buffered(concurrency)
                .collect()
                .await;

        let mut results = Vec::new();
        let mut failures = Vec::new();
        for (url, outcome) in outcomes {
            match outcome {
                Ok(extracted) => {
                    debug!(%url, chars = extracted.content.chars().count(), "custom URL extracted");
                    results.push(to_search_result(extracted));
                }
                Err(e) => {
                    warn!(%url, error = %e, "custom URL failed");
                    failures.push(format!("{url}: {e}"));
                }
            }
        }

        info!(
            extracted = results.len(),
            failed = failures.len(),
            "custom URLs complete"
        );

        let failure_summary = (!failures.is_empty()).then(|| {
            format!(
                "Failed to fetch content from {} URLs: {}",
                failures.len(),
                failures.join("; ")
            )
        });

        Ok(SourceBatch {
            results,
            failure_summary,
            ..SourceBatch::empty(SourceKind::Custom)
        })
    }
}

fn to_search_result(extracted: ExtractionResult) -> SearchResult {
    let snippet = if extracted.content.chars().count() > SNIPPET_CHARS {
        let head: String = extracted.content.chars().take(SNIPPET_CHARS).collect();
        format!("{head}...")
    } else {
        extracted.content.clone()
    };

    let mut result = SearchResult::new(
        SourceKind::Custom,
        Some(extracted.url),
        extracted.title.unwrap_or_default(),
    )
    .with_snippet(snippet);
    result.content = Some(extracted.content);
    result.ensure_title();
    result
}
