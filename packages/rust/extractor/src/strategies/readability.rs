//! Readability-style extraction over a parsed DOM.
//!
//! Paragraphs outside page chrome are scored and credit their parent (and
//! half to their grandparent). The best-scoring block, discounted by its
//! link density, is stripped of boilerplate and converted to Markdown.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use super::{ExtractionStrategy, Page, StrategyOutput};
use crate::text::char_len;

/// Paragraphs shorter than this carry no weight.
const MIN_PARAGRAPH_CHARS: usize = 25;

const BOILERPLATE_TAGS: &[&str] = &[
    "script", "style", "nav", "header", "footer", "aside", "form", "noscript", "svg", "iframe",
];

static PARAGRAPH_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("p").expect("valid selector"));
static LINK_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a").expect("valid selector"));
static BOILERPLATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)sidebar|menu|comment|advert|promo|related|share|social|cookie|banner|newsletter|popup|breadcrumb|\bads?\b",
    )
    .expect("valid regex")
});

/// Main-content extraction in the spirit of Mozilla Readability.
pub struct ReadabilityStrategy;

impl ExtractionStrategy for ReadabilityStrategy {
    fn name(&self) -> &'static str {
        "readability"
    }

    fn requires_dom(&self) -> bool {
        true
    }

    fn extract(&self, page: &Page<'_>) -> Option<StrategyOutput> {
        let doc = Html::parse_document(page.html);
        let best = best_candidate(&doc)?;
        debug!(tag = best.value().name(), "readability candidate chosen");

        let html = strip_boilerplate(&best);
        let markdown = match triangulate_markdown::convert_fragment(&html, Some(page.url)) {
            Ok(md) => md,
            Err(e) => {
                debug!(error = %e, "readability conversion failed");
                return None;
            }
        };

        (char_len(&markdown) > page.success_chars).then(|| StrategyOutput::content(markdown))
    }
}

fn best_candidate(doc: &Html) -> Option<ElementRef<'_>> {
    let mut scores = HashMap::new();

    for p in doc.select(&PARAGRAPH_SEL) {
        if in_boilerplate(&p) {
            continue;
        }
        let text = p.text().collect::<String>();
        let len = char_len(text.trim());
        if len < MIN_PARAGRAPH_CHARS {
            continue;
        }

        let score = 1.0 + text.matches(',').count() as f64 + (len as f64 / 100.0).min(3.0);
        let mut ancestors = p.ancestors().filter_map(ElementRef::wrap);
        if let Some(parent) = ancestors.next() {
            scores.entry(parent.id()).or_insert((parent, 0.0)).1 += score;
        }
        if let Some(grandparent) = ancestors.next() {
            scores.entry(grandparent.id()).or_insert((grandparent, 0.0)).1 += score / 2.0;
        }
    }

    scores
        .into_values()
        .map(|(el, score)| (el, score * (1.0 - link_density(&el))))
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(el, _)| el)
}

fn is_boilerplate(el: &ElementRef<'_>) -> bool {
    let value = el.value();
    let name = value.name();
    if BOILERPLATE_TAGS.contains(&name) {
        return true;
    }
    // Page-level containers often carry theme classes like "has-sidebar".
    if matches!(name, "html" | "body" | "main" | "article") {
        return false;
    }
    [value.attr("class"), value.attr("id")]
        .into_iter()
        .flatten()
        .any(|attr| BOILERPLATE_RE.is_match(attr))
}

fn in_boilerplate(el: &ElementRef<'_>) -> bool {
    std::iter::once(*el)
        .chain(el.ancestors().filter_map(ElementRef::wrap))
        .any(|e| is_boilerplate(&e))
}

fn link_density(el: &ElementRef<'_>) -> f64 {
    let total = char_len(&el.text().collect::<String>());
    if total == 0 {
        return 1.0;
    }
    let linked: usize = el
        .select(&LINK_SEL)
        .map(|a| char_len(&a.text().collect::<String>()))
        .sum();
    linked as f64 / total as f64
}

/// Inner HTML of `el` with boilerplate descendants cut out.
fn strip_boilerplate(el: &ElementRef<'_>) -> String {
    let mut html = el.inner_html();
    for child in el.descendants().skip(1).filter_map(ElementRef::wrap) {
        if is_boilerplate(&child) {
            html = html.replacen(&child.html(), "", 1);
        }
    }
    html
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategies::tests::page;
    use url::Url;

    #[test]
    fn picks_densest_block_over_link_lists() {
        let html = r#"<html><body>
            <div id="links"><p><a href="/1">A long list of related links, one, two, three</a></p></div>
            <div id="story">
              <p>The harbour reopened on Monday after three weeks of repairs, officials said.</p>
              <p>Fishing crews, who had been docking further up the coast, returned the same afternoon.</p>
            </div>
        </body></html>"#;
        let doc = Html::parse_document(html);
        let best = best_candidate(&doc).expect("candidate");
        assert_eq!(best.value().attr("id"), Some("story"));
    }

    #[test]
    fn boilerplate_detection() {
        let html = r#"<div class="has-sidebar"><p class="x">a</p></div><body class="has-sidebar"></body>"#;
        let doc = Html::parse_document(html);
        let div = doc
            .select(&Selector::parse("div").unwrap())
            .next()
            .unwrap();
        assert!(is_boilerplate(&div));
        let body = doc.select(&Selector::parse("body").unwrap()).next().unwrap();
        assert!(!is_boilerplate(&body));
    }

    #[test]
    fn strips_nested_chrome_before_converting() {
        let html = r#"<article>
            <p>Paragraph one carries enough text to count for the scorer, with commas, too.</p>
            <div class="share-buttons"><p>Share this on every network you can think of today</p></div>
            <p>Paragraph two also carries enough text to count for the scorer, and more.</p>
        </article>"#;
        let doc = Html::parse_document(html);
        let article = doc.select(&Selector::parse("article").unwrap()).next().unwrap();
        let cleaned = strip_boilerplate(&article);
        assert!(cleaned.contains("Paragraph one"));
        assert!(!cleaned.contains("Share this"));
    }

    #[test]
    fn short_content_is_rejected() {
        let url = Url::parse("https://example.com/").unwrap();
        let html = "<html><body><div><p>Only a single paragraph of modest length here.</p></div></body></html>";
        assert!(ReadabilityStrategy.extract(&page(html, &url)).is_none());
    }
}
