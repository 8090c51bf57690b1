//! Content extraction for user-supplied URLs.
//!
//! [`ContentExtractor::extract`] fetches a page and runs the
//! [`StrategyCascade`] over it. Ordinary failures (bad scheme, timeout,
//! non-200, oversized body, too little text) are logged and become `None`.

mod fetch;
pub mod strategies;
mod text;

use std::sync::OnceLock;
use std::time::Duration;

use reqwest::Client;
use tracing::{debug, instrument, warn};
use url::Url;

use triangulate_shared::{ExtractionConfig, ExtractionResult, ResearchError};

pub use fetch::ExtractionError;
pub use strategies::{CascadeHit, ExtractionStrategy, Page, StrategyCascade, StrategyOutput};
pub use text::{extract_title, truncate_preserving_sentences};

/// Environment variable that switches DOM parsing off (`0`, `false`, `off`, `no`).
pub const DOM_PARSING_ENV: &str = "TRIANGULATE_DOM_PARSING";

// ---------------------------------------------------------------------------
// DomCapability
// ---------------------------------------------------------------------------

/// Whether DOM-based strategies may run in this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomCapability {
    Available,
    Unavailable,
}

impl DomCapability {
    /// Resolve the capability once per process from [`DOM_PARSING_ENV`].
    pub fn detect() -> Self {
        static DETECTED: OnceLock<DomCapability> = OnceLock::new();
        *DETECTED.get_or_init(|| {
            let capability = Self::from_env_value(std::env::var(DOM_PARSING_ENV).ok().as_deref());
            debug!(?capability, "DOM parsing capability resolved");
            capability
        })
    }

    pub fn from_env_value(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase()) {
            Some(v) if matches!(v.as_str(), "0" | "false" | "off" | "no") => Self::Unavailable,
            _ => Self::Available,
        }
    }

    pub fn is_available(self) -> bool {
        self == Self::Available
    }
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Knobs for fetching and extraction.
#[derive(Debug, Clone)]
pub struct ExtractorOptions {
    /// Per-request timeout.
    pub timeout: Duration,
    /// Responses larger than this are rejected.
    pub max_response_bytes: u64,
    /// Text floor for the structured-data and full-text strategies.
    pub min_content_chars: usize,
    /// Text floor for the readability and pattern strategies.
    pub success_chars: usize,
    /// Extracted content is truncated to this many characters.
    pub max_content_chars: usize,
    /// Concurrent extractions when a batch of URLs is processed.
    pub concurrency: usize,
    pub dom: DomCapability,
}

impl Default for ExtractorOptions {
    fn default() -> Self {
        Self::from_config(&ExtractionConfig::default())
    }
}

impl ExtractorOptions {
    pub fn from_config(config: &ExtractionConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.timeout_secs),
            max_response_bytes: config.max_response_bytes as u64,
            min_content_chars: config.min_content_chars,
            success_chars: config.min_content_chars.max(300),
            max_content_chars: config.max_content_chars,
            concurrency: config.concurrency.max(1),
            dom: if config.dom_parsing {
                DomCapability::detect()
            } else {
                DomCapability::Unavailable
            },
        }
    }
}

// ---------------------------------------------------------------------------
// ContentExtractor
// ---------------------------------------------------------------------------

/// Fetches pages and pulls out their main content.
pub struct ContentExtractor {
    client: Client,
    options: ExtractorOptions,
    cascade: StrategyCascade,
}

impl ContentExtractor {
    pub fn new(options: ExtractorOptions) -> triangulate_shared::Result<Self> {
        let client = fetch::build_client(options.timeout).map_err(|e| {
            ResearchError::Network(format!("failed to build HTTP client: {e}"))
        })?;

        Ok(Self {
            client,
            options,
            cascade: StrategyCascade::new(),
        })
    }

    pub fn options(&self) -> &ExtractorOptions {
        &self.options
    }

    /// Extract `url`, logging and swallowing any failure.
    #[instrument(skip_all, fields(url = %url))]
    pub async fn extract(&self, url: &str) -> Option<ExtractionResult> {
        match self.try_extract(url).await {
            Ok(result) => Some(result),
            Err(e) => {
                warn!(url, error = %e, "content extraction failed");
                None
            }
        }
    }

    /// Like [`extract`](Self::extract) but keeps the reason for a failure.
    pub async fn try_extract(&self, url: &str) -> Result<ExtractionResult, ExtractionError> {
        let parsed = parse_http_url(url)?;
        let html = fetch::fetch_html(
            &self.client,
            &parsed,
            self.options.timeout,
            self.options.max_response_bytes,
        )
        .await?;
        debug!(bytes = html.len(), "page fetched");

        run_cascade(&self.cascade, &html, url, &parsed, &self.options)
    }
}

/// Parse `raw` and require an http or https scheme.
pub fn parse_http_url(raw: &str) -> Result<Url, ExtractionError> {
    let url = Url::parse(raw.trim()).map_err(|e| ExtractionError::InvalidUrl(format!("{raw}: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ExtractionError::InvalidScheme(other.to_string())),
    }
}

/// Run the extraction cascade over HTML that is already in hand.
pub fn extract_from_html(
    html: &str,
    url: &str,
    options: &ExtractorOptions,
) -> Result<ExtractionResult, ExtractionError> {
    let parsed = parse_http_url(url)?;
    run_cascade(&StrategyCascade::new(), html, url, &parsed, options)
}

fn run_cascade(
    cascade: &StrategyCascade,
    html: &str,
    url: &str,
    parsed: &Url,
    options: &ExtractorOptions,
) -> Result<ExtractionResult, ExtractionError> {
    let page = Page {
        html,
        url: parsed,
        min_chars: options.min_content_chars,
        success_chars: options.success_chars,
    };
    let hit = cascade
        .run(&page, options.dom)
        .ok_or(ExtractionError::InsufficientContent {
            min: options.min_content_chars,
        })?;

    let content = truncate_preserving_sentences(&hit.output.content, options.max_content_chars);
    let title = hit.output.title.or_else(|| extract_title(html));
    debug!(
        strategy = hit.strategy,
        chars = content.chars().count(),
        has_title = title.is_some(),
        "content extracted"
    );

    Ok(ExtractionResult {
        title,
        url: url.to_string(),
        content,
    })
}
