//! Source fetchers for Triangulate.
//!
//! Three independent adapters turn vendor responses into normalized
//! [`SearchResult`] records:
//! - [`AiSearchSource`]: structured AI search with a chat-completion fallback
//! - [`WebSearchSource`]: organic web results plus answer-box data
//! - [`CustomUrlSource`]: user-supplied pages run through the content extractor
//!
//! Vendor field names never leave this crate.

pub mod ai_search;
pub mod chat;
pub mod custom_urls;
pub mod web_search;

use std::time::Duration;

use reqwest::Client;

use triangulate_shared::{ResearchError, Result, SearchResult, SourceKind};

pub use ai_search::AiSearchSource;
pub use chat::{ChatClient, ChatCompletion, ChatMessage, ChatRequest};
pub use custom_urls::CustomUrlSource;
pub use web_search::WebSearchSource;

/// User-Agent for vendor API calls.
const USER_AGENT: &str = concat!("Triangulate/", env!("CARGO_PKG_VERSION"));

/// Longest vendor error body echoed into an error message.
const MAX_ERROR_BODY_CHARS: usize = 300;

/// Everything one adapter produced for a query.
#[derive(Debug, Clone)]
pub struct SourceBatch {
    pub kind: SourceKind,
    pub results: Vec<SearchResult>,
    /// Natural-language answer supplied by the vendor, if any.
    pub answer: Option<String>,
    /// Results the vendor highlighted (e.g. a knowledge-graph entry).
    pub featured: Vec<SearchResult>,
    /// Summary of partial failures that did not abort the batch.
    pub failure_summary: Option<String>,
}

impl SourceBatch {
    pub fn empty(kind: SourceKind) -> Self {
        Self {
            kind,
            results: Vec::new(),
            answer: None,
            featured: Vec::new(),
            failure_summary: None,
        }
    }

    /// True when the batch carries neither results nor an answer.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
            && self.featured.is_empty()
            && self.answer.as_deref().is_none_or(|a| a.trim().is_empty())
    }
}

pub(crate) fn build_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
        .map_err(|e| ResearchError::Network(format!("failed to build HTTP client: {e}")))
}

pub(crate) fn transport_error(service: &str, e: reqwest::Error) -> ResearchError {
    if e.is_timeout() {
        ResearchError::Network(format!("{service}: request timed out"))
    } else {
        ResearchError::Network(format!("{service}: {e}"))
    }
}

/// Build an upstream error, preferring the vendor's own error message.
pub(crate) fn upstream_error(service: &str, status: u16, body: &str) -> ResearchError {
    let parsed = serde_json::from_str::<serde_json::Value>(body).ok();
    let message = parsed
        .as_ref()
        .and_then(|v| {
            v.pointer("/error/message")
                .or_else(|| v.get("message"))
                .or_else(|| v.get("error"))
        })
        .and_then(|m| m.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| body.trim().chars().take(MAX_ERROR_BODY_CHARS).collect());

    ResearchError::upstream(service, status, message)
}
