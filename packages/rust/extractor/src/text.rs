//! Regex-level text helpers shared by the extraction strategies.
//!
//! Nothing here needs a DOM, so these keep working when DOM parsing is
//! switched off.

use std::sync::LazyLock;

use regex::Regex;

use triangulate_markdown::decode_entities;

/// Truncate `text` to at most `max_chars` characters without cutting a
/// sentence in half.
///
/// Cuts after the last sentence end (`.`, `!` or `?` followed by whitespace
/// or the end of the window) that lies past the halfway point; failing that,
/// at the last paragraph break past halfway; failing that, hard-truncates and
/// appends `...`. The result is never longer than `max_chars + 3`.
pub fn truncate_preserving_sentences(text: &str, max_chars: usize) -> String {
    static SENTENCE_END_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"[.!?](?:\s|$)").expect("valid regex"));

    let Some((cut, _)) = text.char_indices().nth(max_chars) else {
        return text.to_string();
    };
    let window = &text[..cut];
    let half = text
        .char_indices()
        .nth(max_chars / 2)
        .map_or(cut, |(i, _)| i);

    let sentence_end = SENTENCE_END_RE
        .find_iter(window)
        .last()
        .map(|m| m.start())
        .filter(|&pos| pos > half);
    if let Some(pos) = sentence_end {
        return window[..=pos].to_string();
    }

    match window.rfind("\n\n") {
        Some(pos) if pos > half => window[..pos].to_string(),
        _ => format!("{window}..."),
    }
}

/// Page title: `<title>`, then `og:title`, then the first `<h1>`.
pub fn extract_title(html: &str) -> Option<String> {
    static TITLE_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("valid regex"));
    static OG_TITLE_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(
            r#"(?is)<meta\s[^>]*(?:property|name)\s*=\s*["']og:title["'][^>]*content\s*=\s*["']([^"']*)["']"#,
        )
        .expect("valid regex")
    });
    static OG_TITLE_REVERSED_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(
            r#"(?is)<meta\s[^>]*content\s*=\s*["']([^"']*)["'][^>]*(?:property|name)\s*=\s*["']og:title["']"#,
        )
        .expect("valid regex")
    });
    static H1_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?is)<h1[^>]*>(.*?)</h1>").expect("valid regex"));

    [&*TITLE_RE, &*OG_TITLE_RE, &*OG_TITLE_REVERSED_RE, &*H1_RE]
        .into_iter()
        .filter_map(|re| re.captures(html))
        .map(|caps| inline_text(&caps[1]))
        .find(|title| !title.is_empty())
}

/// Remove elements whose content is never visible text.
pub(crate) fn strip_invisible(html: &str) -> String {
    static INVISIBLE_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(
            r"(?is)<!--.*?-->|<(?:script|style|noscript|svg|iframe|template)\b[^>]*>.*?</(?:script|style|noscript|svg|iframe|template)\s*>",
        )
        .expect("valid regex")
    });

    INVISIBLE_RE.replace_all(html, " ").into_owned()
}

/// Remove page chrome: navigation, header, footer, aside and form blocks.
pub(crate) fn strip_chrome(html: &str) -> String {
    static CHROME_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(
            r"(?is)<(?:nav|header|footer|aside|form)\b[^>]*>.*?</(?:nav|header|footer|aside|form)\s*>",
        )
        .expect("valid regex")
    });

    CHROME_RE.replace_all(html, " ").into_owned()
}

/// Convert an HTML fragment to plain text with paragraph breaks.
pub(crate) fn html_to_text(html: &str) -> String {
    static BLOCK_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(
            r"(?i)</?(?:p|div|br|li|ul|ol|h[1-6]|tr|table|section|article|main|blockquote|pre|dd|dt|figcaption)(?:\s[^>]*)?/?>",
        )
        .expect("valid regex")
    });
    static TAG_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"<[^>]*>").expect("valid regex"));

    let html = strip_invisible(html);
    let text = BLOCK_TAG_RE.replace_all(&html, "\n");
    let text = TAG_RE.replace_all(&text, " ");
    let text = decode_entities(&text);

    text.lines()
        .map(inline_text)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Collapse a fragment to a single line of text.
pub(crate) fn inline_text(fragment: &str) -> String {
    static TAG_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"<[^>]*>").expect("valid regex"));

    let text = TAG_RE.replace_all(fragment, " ");
    decode_entities(&text)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub(crate) fn char_len(s: &str) -> usize {
    s.chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_untouched() {
        assert_eq!(truncate_preserving_sentences("Hello.", 100), "Hello.");
        let exact = "a".repeat(50);
        assert_eq!(truncate_preserving_sentences(&exact, 50), exact);
    }

    #[test]
    fn truncates_at_last_sentence_past_halfway() {
        let text = "First sentence here. Second sentence is longer. Third one never fits in the window at all";
        let out = truncate_preserving_sentences(text, 60);
        assert_eq!(out, "First sentence here. Second sentence is longer.");
    }

    #[test]
    fn sentence_before_halfway_falls_back_to_paragraph() {
        let text = format!("Tiny. {}\n\n{}", "x".repeat(40), "y".repeat(60));
        let out = truncate_preserving_sentences(&text, 80);
        assert_eq!(out, format!("Tiny. {}", "x".repeat(40)));
    }

    #[test]
    fn no_boundary_hard_truncates_with_ellipsis() {
        let text = "z".repeat(500);
        let out = truncate_preserving_sentences(&text, 100);
        assert_eq!(out.chars().count(), 103);
        assert!(out.ends_with("..."));
    }

    #[test]
    fn truncation_law_holds_across_caps() {
        let text = "Alpha beta gamma. Delta epsilon! Zeta eta theta? Iota kappa lambda mu nu xi. "
            .repeat(40);
        for cap in [10, 37, 100, 250, 999] {
            let out = truncate_preserving_sentences(&text, cap);
            assert!(out.chars().count() <= cap + 3, "cap {cap} overran");
            if !out.ends_with("...") {
                assert!(out.ends_with(['.', '!', '?']), "cap {cap} cut mid-sentence: {out:?}");
            }
        }
    }

    #[test]
    fn truncation_counts_characters_not_bytes() {
        let text = "é".repeat(30);
        let out = truncate_preserving_sentences(&text, 10);
        assert_eq!(out, format!("{}...", "é".repeat(10)));
    }

    #[test]
    fn title_prefers_title_tag_then_og_then_h1() {
        assert_eq!(
            extract_title("<title> A &amp; B </title><h1>H</h1>").as_deref(),
            Some("A & B")
        );
        assert_eq!(
            extract_title(r#"<meta property="og:title" content="OG Title"><h1>H</h1>"#).as_deref(),
            Some("OG Title")
        );
        assert_eq!(
            extract_title(r#"<meta content="Reversed" property="og:title">"#).as_deref(),
            Some("Reversed")
        );
        assert_eq!(
            extract_title("<title> </title><h1>Heading <em>One</em></h1>").as_deref(),
            Some("Heading One")
        );
        assert_eq!(extract_title("<p>nothing</p>"), None);
    }

    #[test]
    fn html_to_text_keeps_paragraphs() {
        let html = "<p>One &mdash; two</p><script>ignored()</script><div>Three <b>four</b></div>";
        assert_eq!(html_to_text(html), "One \u{2014} two\n\nThree four");
    }

    #[test]
    fn chrome_blocks_removed() {
        let html = "<nav>menu</nav><p>body</p><footer>foot</footer>";
        assert_eq!(html_to_text(&strip_chrome(html)), "body");
    }
}
