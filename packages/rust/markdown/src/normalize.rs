//! Answer normalization: an ordered cascade of pure text rules.
//!
//! Model output regularly mixes Markdown with HTML tags, entities and broken
//! list or heading syntax. [`normalize_answer`] runs every rule in [`rules`]
//! in order over each prose segment, leaving fenced code blocks untouched.
//! The cascade repeats until a pass changes nothing, so running it on its
//! own output returns the same string.

use std::sync::LazyLock;

use regex::{Captures, Regex};

use triangulate_shared::SourceKind;

/// One named text transform in the normalization cascade.
#[derive(Debug, Clone, Copy)]
pub struct Rule {
    pub name: &'static str,
    pub apply: fn(&str) -> String,
}

static RULES: [Rule; 13] = [
    Rule { name: "control-characters", apply: remove_control_chars },
    Rule { name: "entities", apply: decode_entities },
    Rule { name: "headings", apply: convert_headings },
    Rule { name: "paragraphs", apply: convert_paragraphs },
    Rule { name: "lists", apply: convert_lists },
    Rule { name: "tables", apply: convert_tables },
    Rule { name: "inline-formatting", apply: convert_inline },
    Rule { name: "strip-tags", apply: strip_tags },
    Rule { name: "whitespace", apply: normalize_whitespace },
    Rule { name: "bullets", apply: repair_list_items },
    Rule { name: "sources-used", apply: label_sources_used },
    Rule { name: "heading-repair", apply: repair_headings },
    Rule { name: "blank-lines", apply: collapse_blank_lines },
];

/// Removing a tag can join two fragments into a new entity, so the cascade
/// repeats. Every changing pass removes markup, which bounds the loop.
const MAX_PASSES: usize = 8;

/// The cascade in application order.
pub fn rules() -> &'static [Rule] {
    &RULES
}

/// Normalize a generated answer into pure Markdown.
pub fn normalize_answer(text: &str) -> String {
    let text = text.replace("\r\n", "\n").replace('\r', "\n");

    let mut parts: Vec<String> = Vec::new();
    for segment in split_fenced(&text) {
        match segment {
            Segment::Code(code) => parts.push(code),
            Segment::Prose(prose) => {
                let out = normalize_prose(prose);
                if !out.is_empty() {
                    parts.push(out);
                }
            }
        }
    }

    parts.join("\n\n")
}

fn normalize_prose(prose: String) -> String {
    let mut current = prose;
    for _ in 0..MAX_PASSES {
        let next = RULES
            .iter()
            .fold(current.clone(), |acc, rule| (rule.apply)(&acc));
        if next == current {
            break;
        }
        current = next;
    }
    current
}

enum Segment {
    Prose(String),
    Code(String),
}

/// Split on ``` fence lines. An unterminated fence runs to the end.
fn split_fenced(text: &str) -> Vec<Segment> {
    let mut segments: Vec<(bool, Vec<&str>)> = Vec::new();
    let mut in_code = false;

    for line in text.split('\n') {
        let is_fence = line.trim_start().starts_with("```");
        if in_code {
            if let Some((_, lines)) = segments.last_mut() {
                lines.push(line);
            }
            in_code = !is_fence;
            continue;
        }
        if is_fence {
            in_code = true;
            segments.push((true, vec![line]));
            continue;
        }
        match segments.last_mut() {
            Some((false, lines)) => lines.push(line),
            _ => segments.push((false, vec![line])),
        }
    }

    segments
        .into_iter()
        .map(|(code, lines)| {
            let joined = lines.join("\n");
            if code {
                Segment::Code(joined)
            } else {
                Segment::Prose(joined)
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Rule 1: control characters
// ---------------------------------------------------------------------------

fn remove_control_chars(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect()
}

// ---------------------------------------------------------------------------
// Rule 2: entities
// ---------------------------------------------------------------------------

/// Decode HTML entities until none remain. Unknown named entities become a space.
pub fn decode_entities(text: &str) -> String {
    static ENTITY_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"&(#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|[a-zA-Z][a-zA-Z0-9]{1,31});")
            .expect("valid regex")
    });

    // Every replacement is shorter than the entity it replaces, so this ends.
    let mut current = text.to_string();
    loop {
        let next = ENTITY_RE
            .replace_all(&current, |caps: &Captures| decode_entity(&caps[1]))
            .into_owned();
        if next == current {
            return next;
        }
        current = next;
    }
}

fn decode_entity(name: &str) -> String {
    if let Some(num) = name.strip_prefix('#') {
        let code = match num.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok(),
            None => num.parse().ok(),
        };
        return match code.and_then(char::from_u32) {
            Some(c) if c == '\n' || !c.is_control() => c.to_string(),
            _ => " ".to_string(),
        };
    }

    let decoded = match name {
        "amp" => "&",
        "lt" => "<",
        "gt" => ">",
        "quot" => "\"",
        "apos" => "'",
        "nbsp" | "ensp" | "emsp" | "thinsp" => " ",
        "mdash" => "\u{2014}",
        "ndash" => "\u{2013}",
        "hellip" => "\u{2026}",
        "lsquo" => "\u{2018}",
        "rsquo" => "\u{2019}",
        "ldquo" => "\u{201c}",
        "rdquo" => "\u{201d}",
        "laquo" => "\u{ab}",
        "raquo" => "\u{bb}",
        "bull" => "\u{2022}",
        "middot" => "\u{b7}",
        "copy" => "\u{a9}",
        "reg" => "\u{ae}",
        "trade" => "\u{2122}",
        "deg" => "\u{b0}",
        "times" => "\u{d7}",
        "euro" => "\u{20ac}",
        "pound" => "\u{a3}",
        _ => " ",
    };
    decoded.to_string()
}

// ---------------------------------------------------------------------------
// Rules 3-7: tag conversions
// ---------------------------------------------------------------------------

fn convert_headings(text: &str) -> String {
    static HEADING_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?is)<h([1-6])(?:\s[^>]*)?>(.*?)</h[1-6]\s*>").expect("valid regex")
    });

    HEADING_RE
        .replace_all(text, |caps: &Captures| {
            let level: usize = caps[1].parse().unwrap_or(2);
            let inner = collapse_inline(&caps[2]);
            if inner.is_empty() {
                "\n\n".to_string()
            } else {
                format!("\n\n{} {inner}\n\n", "#".repeat(level))
            }
        })
        .into_owned()
}

fn convert_paragraphs(text: &str) -> String {
    static PARAGRAPH_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?i)</?p(?:\s[^>]*)?>").expect("valid regex"));
    static BREAK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?i)<br\s*/?>").expect("valid regex"));

    let text = PARAGRAPH_RE.replace_all(text, "\n\n");
    BREAK_RE.replace_all(&text, "\n").into_owned()
}

fn convert_lists(text: &str) -> String {
    static ITEM_OPEN_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?i)<li(?:\s[^>]*)?>").expect("valid regex"));
    static ITEM_CLOSE_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?i)</li\s*>").expect("valid regex"));
    static LIST_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?i)</?(?:ul|ol)(?:\s[^>]*)?>").expect("valid regex"));

    let text = ITEM_OPEN_RE.replace_all(text, "\n* ");
    let text = ITEM_CLOSE_RE.replace_all(&text, "");
    LIST_RE.replace_all(&text, "\n\n").into_owned()
}

fn convert_tables(text: &str) -> String {
    static TABLE_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?is)<table(?:\s[^>]*)?>.*?</table\s*>").expect("valid regex")
    });

    TABLE_RE
        .replace_all(text, |caps: &Captures| {
            match crate::table_html_to_markdown(&caps[0]) {
                Some(md) => format!("\n\n{md}\n\n"),
                None => "\n\n".to_string(),
            }
        })
        .into_owned()
}

fn convert_inline(text: &str) -> String {
    static BOLD_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?is)<(?:strong|b)(?:\s[^>]*)?>(.*?)</(?:strong|b)\s*>").expect("valid regex")
    });
    static ITALIC_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?is)<(?:em|i)(?:\s[^>]*)?>(.*?)</(?:em|i)\s*>").expect("valid regex")
    });
    static CODE_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?is)<code(?:\s[^>]*)?>(.*?)</code\s*>").expect("valid regex")
    });
    static LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r#"(?is)<a\s[^>]*?href\s*=\s*["']([^"']*)["'][^>]*>(.*?)</a\s*>"#)
            .expect("valid regex")
    });

    let wrap = |marker: &'static str| {
        move |caps: &Captures| {
            let inner = caps[1].trim();
            if inner.is_empty() {
                String::new()
            } else {
                format!("{marker}{inner}{marker}")
            }
        }
    };

    let text = BOLD_RE.replace_all(text, wrap("**"));
    let text = ITALIC_RE.replace_all(&text, wrap("*"));
    let text = CODE_RE.replace_all(&text, wrap("`"));
    LINK_RE
        .replace_all(&text, |caps: &Captures| {
            let href = caps[1].trim();
            let label = collapse_inline(&caps[2]);
            let linkable = href.starts_with("http://") || href.starts_with("https://");
            match (linkable, label.is_empty()) {
                (true, true) => format!("<{href}>"),
                (true, false) => format!("[{label}]({href})"),
                (false, _) => label,
            }
        })
        .into_owned()
}

/// Remove comments and any remaining tags, repeating until none are left.
fn strip_tags(text: &str) -> String {
    static COMMENT_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").expect("valid regex"));
    static TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"</?[a-zA-Z][a-zA-Z0-9-]*(?:\s[^<>]*)?/?>").expect("valid regex")
    });

    let mut current = COMMENT_RE.replace_all(text, " ").into_owned();
    loop {
        let next = TAG_RE.replace_all(&current, " ").into_owned();
        if next == current {
            return next;
        }
        current = next;
    }
}

fn collapse_inline(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ---------------------------------------------------------------------------
// Rules 8-12: Markdown repair
// ---------------------------------------------------------------------------

static LIST_MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[*+-]|\d+[.)]|[\u{2022}\u{25e6}\u{25aa}\u{2023}\u{25cf}\u{b7}])(?:\s|$)")
        .expect("valid regex")
});

/// Collapse horizontal whitespace and trim lines. List items keep their indent.
fn normalize_whitespace(text: &str) -> String {
    static HSPACE_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"[ \t\u{a0}]+").expect("valid regex"));

    text.lines()
        .map(|line| {
            let body = line.trim();
            let collapsed = HSPACE_RE.replace_all(body, " ");
            let indent = &line[..line.len() - line.trim_start().len()];
            if !indent.is_empty() && LIST_MARKER_RE.is_match(&collapsed) {
                let width: usize = indent.chars().map(|c| if c == '\t' { 4 } else { 1 }).sum();
                format!("{}{collapsed}", " ".repeat(width))
            } else {
                collapsed.into_owned()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Unicode bullets become `* `; list items with no text are dropped.
fn repair_list_items(text: &str) -> String {
    static BULLET_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"^(\s*)[\u{2022}\u{25e6}\u{25aa}\u{2023}\u{25cf}\u{b7}]\s*(.*)$")
            .expect("valid regex")
    });
    static EMPTY_ITEM_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^\s*(?:[*+-]|\d+[.)])$").expect("valid regex"));

    let mut lines = Vec::new();
    for line in text.lines() {
        if let Some(caps) = BULLET_RE.captures(line) {
            if !caps[2].is_empty() {
                lines.push(format!("{}* {}", &caps[1], &caps[2]));
            }
        } else if !EMPTY_ITEM_RE.is_match(line) {
            lines.push(line.to_string());
        }
    }
    lines.join("\n")
}

/// Rewrite the "SOURCES USED" marker and, below the last marker, the
/// per-source subsection labels into headings.
fn label_sources_used(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let last_marker = lines
        .iter()
        .rposition(|line| sources_used_key(line) == "sources used");

    lines
        .iter()
        .enumerate()
        .map(|(i, line)| {
            let key = sources_used_key(line);
            if key == "sources used" {
                return "## Sources Used".to_string();
            }
            if last_marker.is_none_or(|marker| i < marker) {
                return line.to_string();
            }
            SourceKind::ALL
                .iter()
                .map(SourceKind::sources_used_label)
                .find(|label| label.to_ascii_lowercase() == key)
                .map_or_else(|| line.to_string(), |label| format!("### {label}"))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn sources_used_key(line: &str) -> String {
    line.trim_matches(|c: char| c.is_whitespace() || matches!(c, '#' | '*' | '_' | ':' | '-'))
        .to_ascii_lowercase()
}

/// Drop empty headings, add the missing space after `#`, and keep a blank
/// line on both sides of every heading.
fn repair_headings(text: &str) -> String {
    static EMPTY_HEADING_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^#{1,6}$").expect("valid regex"));
    static MISSING_SPACE_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^(#{1,6})([^#\s\d])").expect("valid regex"));
    static HEADING_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^#{1,6} \S").expect("valid regex"));

    let mut out: Vec<String> = Vec::new();
    let mut prev_heading = false;

    for line in text.lines() {
        if EMPTY_HEADING_RE.is_match(line) {
            continue;
        }
        let line = MISSING_SPACE_RE.replace(line, "$1 $2").into_owned();
        let is_heading = HEADING_RE.is_match(&line);
        let last_blank = out.last().is_none_or(|l| l.is_empty());
        if (is_heading || prev_heading) && !last_blank && !line.is_empty() {
            out.push(String::new());
        }
        prev_heading = is_heading;
        out.push(line);
    }

    out.join("\n")
}

fn collapse_blank_lines(text: &str) -> String {
    static MULTI_BLANK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

    MULTI_BLANK_RE.replace_all(text, "\n\n").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MESSY: &str = "<h2>Overview</h2><p>Rust is <strong>fast</strong> &amp; <em>safe</em>.</p>\
        <ul><li>Zero-cost</li><li></li><li>No GC &mdash; really</li></ul>\
        <table><tr><th>Lang</th><th>GC</th></tr><tr><td>Rust</td><td>No</td></tr></table>\
        <p>See <a href=\"https://www.rust-lang.org\">the site</a>&nbsp;&nbsp;now.</p>\
        <div class=\"x\">Trailing &unknown; text</div>";

    #[test]
    fn converts_html_answer_to_markdown() {
        let out = normalize_answer(MESSY);
        assert!(out.starts_with("## Overview\n\nRust is **fast** & *safe*."));
        assert!(out.contains("* Zero-cost\n* No GC \u{2014} really"));
        assert!(out.contains("| Lang | GC |\n| --- | --- |\n| Rust | No |"));
        assert!(out.contains("See [the site](https://www.rust-lang.org) now."));
        assert!(out.contains("Trailing text"));
        assert!(!out.contains('<'));
        assert!(!out.contains("&nbsp;"));
    }

    #[test]
    fn normalization_is_idempotent() {
        let samples = [
            MESSY,
            "#Heading\nText right after\n##\n\n\n\n* \n•  bullet one\n  - nested",
            "&amp;lt;div&amp;gt;hidden&amp;lt;/div&amp;gt; visible",
            "<di<x>v>odd</div> markup",
            "**SOURCES USED:**\n**AI Search Sources:**\n- [A] (https://a.com)\nweb search sources\n- [B] (https://b.com)",
            "Intro\n\n```rust\nfn main() {  }\n\n\n\n```\n\n<p>after</p>",
            "```\nunterminated <b>code</b>",
            "  1. indented\n\t* tabbed\n# Title\n## Sub\ntext",
        ];
        for sample in samples {
            let once = normalize_answer(sample);
            let twice = normalize_answer(&once);
            assert_eq!(once, twice, "not idempotent for {sample:?}");
        }
    }

    #[test]
    fn clean_markdown_is_unchanged() {
        let clean = "# Title\n\nSummary paragraph with [a link](https://example.com).\n\n## Details\n\n* one\n* two\n  * nested\n\n| a | b |\n| --- | --- |\n| 1 | 2 |";
        assert_eq!(normalize_answer(clean), clean);
    }

    #[test]
    fn fenced_code_is_left_alone() {
        let input = "Text\n\n```html\n<div>&amp;  keep</div>\n```\n\nMore";
        assert_eq!(normalize_answer(input), input);
    }

    #[test]
    fn entities_decode_to_fixpoint() {
        assert_eq!(decode_entities("&amp;amp;lt;"), "<");
        assert_eq!(decode_entities("caf&#233; &#x263A;"), "caf\u{e9} \u{263a}");
        assert_eq!(decode_entities("a&bogus;b"), "a b");
        assert_eq!(decode_entities("R&D and AT&T"), "R&D and AT&T");
    }

    #[test]
    fn tags_stripped_until_none_left() {
        assert_eq!(strip_tags("<di<x>v>odd").trim(), "odd");
        assert_eq!(strip_tags("a < b > c"), "a < b > c");
        assert_eq!(strip_tags("<https://example.com>"), "<https://example.com>");
    }

    #[test]
    fn headings_repaired_and_spaced() {
        assert_eq!(
            repair_headings("Intro\n#Title\nBody\n###\nEnd"),
            "Intro\n\n# Title\n\nBody\nEnd"
        );
        assert_eq!(repair_headings("#1 ranked"), "#1 ranked");
    }

    #[test]
    fn list_items_repaired() {
        assert_eq!(repair_list_items("\u{2022} one\n*\n  \u{25e6} two\n-"), "* one\n  * two");
    }

    #[test]
    fn whitespace_keeps_list_indent_only() {
        assert_eq!(
            normalize_whitespace("   plain   text  \n\t- item\n    deep"),
            "plain text\n    - item\ndeep"
        );
    }

    #[test]
    fn sources_used_labels_become_headings() {
        let input = "SOURCES USED\n**AI Search Sources:**\n### web search sources\nCustom Sources:\nCustom sources are great";
        assert_eq!(
            label_sources_used(input),
            "## Sources Used\n### AI Search Sources\n### Web Search Sources\n### Custom Sources\nCustom sources are great"
        );
    }

    #[test]
    fn source_labels_outside_the_block_stay_prose() {
        let input = "Custom sources\nBody text\nSOURCES USED\ncustom sources:\n- [A] (https://a.com)";
        assert_eq!(
            label_sources_used(input),
            "Custom sources\nBody text\n## Sources Used\n### Custom Sources\n- [A] (https://a.com)"
        );
        assert_eq!(label_sources_used("Web search sources"), "Web search sources");
    }

    #[test]
    fn entities_joined_by_tag_removal_are_decoded() {
        assert_eq!(normalize_answer("AT&<i></i>amp;T"), "AT&T");
        assert_eq!(normalize_answer("<ul><li>AT&</li>amp;T</ul>"), "* AT&T");
        assert_eq!(normalize_answer("x &<b></b>lt;b>y"), "x y");
        for sample in ["AT&<i></i>amp;T", "<ul><li>AT&</li>amp;T</ul>", "x &<b></b>lt;b>y"] {
            let once = normalize_answer(sample);
            assert_eq!(normalize_answer(&once), once, "not idempotent for {sample:?}");
        }
    }

    #[test]
    fn rules_are_named_in_order() {
        let names: Vec<_> = rules().iter().map(|r| r.name).collect();
        assert_eq!(names.first(), Some(&"control-characters"));
        assert_eq!(names.last(), Some(&"blank-lines"));
        assert_eq!(names.len(), 13);
    }

    #[test]
    fn control_characters_removed() {
        assert_eq!(remove_control_chars("a\u{0}b\u{7}c\n\td"), "abc\n\td");
    }
}
