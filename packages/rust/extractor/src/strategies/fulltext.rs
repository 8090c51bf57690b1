//! Last resort: every visible piece of text in the body.

use std::sync::LazyLock;

use regex::Regex;

use super::{ExtractionStrategy, Page, StrategyOutput};
use crate::text::{char_len, html_to_text, strip_chrome, strip_invisible};

static BODY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<body\b[^>]*>(.*?)</body\s*>").expect("valid regex"));

pub struct FullTextStrategy;

impl ExtractionStrategy for FullTextStrategy {
    fn name(&self) -> &'static str {
        "full-text"
    }

    fn extract(&self, page: &Page<'_>) -> Option<StrategyOutput> {
        let html = strip_chrome(&strip_invisible(page.html));
        let body = BODY_RE
            .captures(&html)
            .and_then(|caps| caps.get(1))
            .map_or(html.as_str(), |m| m.as_str());
        let text = html_to_text(body);

        (char_len(&text) > page.min_chars).then(|| StrategyOutput::content(text))
    }
}
