//! Regex extraction from well-known content containers.
//!
//! Works without a DOM. Tries `<article>`, content-classed divs, `<main>`
//! and content-id divs in that order, then falls back to collecting
//! paragraphs, then to the whole body.

use std::sync::LazyLock;

use regex::Regex;

use super::{ExtractionStrategy, Page, StrategyOutput};
use crate::text::{char_len, html_to_text, inline_text, strip_chrome, strip_invisible};

static CONTAINER_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?is)<article\b[^>]*>(.*?)</article\s*>",
        r#"(?is)<div\b[^>]*class\s*=\s*["'][^"']*(?:article|post|content|entry|blog)[^"']*["'][^>]*>(.*?)</div\s*>"#,
        r"(?is)<main\b[^>]*>(.*?)</main\s*>",
        r#"(?is)<div\b[^>]*id\s*=\s*["'](?:article|post|content|main)[^"']*["'][^>]*>(.*?)</div\s*>"#,
    ]
    .into_iter()
    .map(|pattern| Regex::new(pattern).expect("valid regex"))
    .collect()
});
static PARAGRAPH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<p(?:\s[^>]*)?>(.*?)</p\s*>").expect("valid regex"));
static BODY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<body\b[^>]*>(.*?)</body\s*>").expect("valid regex"));

/// Paragraphs at or under this length are dropped when collecting.
const MIN_PARAGRAPH_CHARS: usize = 20;

pub struct PatternStrategy;

impl ExtractionStrategy for PatternStrategy {
    fn name(&self) -> &'static str {
        "pattern"
    }

    fn extract(&self, page: &Page<'_>) -> Option<StrategyOutput> {
        let html = strip_invisible(page.html);

        for re in CONTAINER_RES.iter() {
            if let Some(caps) = re.captures(&html) {
                let text = html_to_text(&caps[1]);
                if char_len(&text) > page.success_chars {
                    return Some(StrategyOutput::content(text));
                }
            }
        }

        let paragraphs: Vec<String> = PARAGRAPH_RE
            .captures_iter(&html)
            .map(|caps| inline_text(&caps[1]))
            .filter(|p| char_len(p) > MIN_PARAGRAPH_CHARS)
            .collect();

        let text = if paragraphs.is_empty() {
            BODY_RE
                .captures(&html)
                .map(|caps| html_to_text(&strip_chrome(&caps[1])))
                .unwrap_or_default()
        } else {
            paragraphs.join("\n\n")
        };

        (char_len(&text) > page.success_chars).then(|| StrategyOutput::content(text))
    }
}
