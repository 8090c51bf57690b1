//! JSON-LD article data (`application/ld+json`).

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use tracing::debug;

use super::{ExtractionStrategy, Page, StrategyOutput};
use crate::text::{char_len, html_to_text, inline_text};

static JSON_LD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?is)<script[^>]*type\s*=\s*["']application/ld\+json["'][^>]*>(.*?)</script\s*>"#,
    )
    .expect("valid regex")
});

const TITLE_KEYS: &[&str] = &["headline", "name", "title"];
const BODY_KEYS: &[&str] = &["articleBody", "description", "text"];

/// Reads the first JSON-LD node with both a title and a long enough body.
pub struct StructuredDataStrategy;

impl ExtractionStrategy for StructuredDataStrategy {
    fn name(&self) -> &'static str {
        "structured-data"
    }

    fn extract(&self, page: &Page<'_>) -> Option<StrategyOutput> {
        for caps in JSON_LD_RE.captures_iter(page.html) {
            let value: Value = match serde_json::from_str(caps[1].trim()) {
                Ok(value) => value,
                Err(e) => {
                    debug!(error = %e, "skipping malformed JSON-LD block");
                    continue;
                }
            };
            if let Some(output) = flatten(&value)
                .into_iter()
                .find_map(|node| from_node(node, page.min_chars))
            {
                return Some(output);
            }
        }
        None
    }
}

/// Every object in the block, descending into arrays and `@graph`.
fn flatten(value: &Value) -> Vec<&Value> {
    match value {
        Value::Array(items) => items.iter().flat_map(flatten).collect(),
        Value::Object(map) => {
            let mut nodes = vec![value];
            if let Some(graph) = map.get("@graph") {
                nodes.extend(flatten(graph));
            }
            nodes
        }
        _ => Vec::new(),
    }
}

fn first_str<'a>(node: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|key| node.get(*key)?.as_str())
        .map(str::trim)
        .find(|s| !s.is_empty())
}

fn from_node(node: &Value, min_chars: usize) -> Option<StrategyOutput> {
    let title = inline_text(first_str(node, TITLE_KEYS)?);
    let body = html_to_text(first_str(node, BODY_KEYS)?);
    if title.is_empty() || char_len(&body) <= min_chars {
        return None;
    }
    Some(StrategyOutput {
        content: body,
        title: Some(title),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategies::tests::page;
    use url::Url;

    fn wrap(json: &str) -> String {
        format!(r#"<html><head><script type="application/ld+json">{json}</script></head><body></body></html>"#)
    }

    #[test]
    fn reads_top_level_array() {
        let body = "Word ".repeat(60);
        let html = wrap(&format!(
            r#"[{{"@type":"Organization","name":"Org"}},{{"@type":"Article","name":"Array Article","description":"{body}"}}]"#
        ));
        let url = Url::parse("https://example.com/").unwrap();
        let out = StructuredDataStrategy.extract(&page(&html, &url)).unwrap();
        assert_eq!(out.title.as_deref(), Some("Array Article"));
        assert!(out.content.starts_with("Word Word"));
    }

    #[test]
    fn malformed_block_is_skipped() {
        let body = "Text ".repeat(60);
        let html = format!(
            "{}{}",
            wrap("{ not json"),
            wrap(&format!(r#"{{"headline":"Second","articleBody":"{body}"}}"#))
        );
        let url = Url::parse("https://example.com/").unwrap();
        let out = StructuredDataStrategy.extract(&page(&html, &url)).unwrap();
        assert_eq!(out.title.as_deref(), Some("Second"));
    }

    #[test]
    fn short_body_is_rejected() {
        let html = wrap(r#"{"headline":"Short","articleBody":"Too little."}"#);
        let url = Url::parse("https://example.com/").unwrap();
        assert!(StructuredDataStrategy.extract(&page(&html, &url)).is_none());
    }

    #[test]
    fn untitled_node_is_rejected() {
        let body = "Text ".repeat(60);
        let html = wrap(&format!(r#"{{"articleBody":"{body}"}}"#));
        let url = Url::parse("https://example.com/").unwrap();
        assert!(StructuredDataStrategy.extract(&page(&html, &url)).is_none());
    }
}
