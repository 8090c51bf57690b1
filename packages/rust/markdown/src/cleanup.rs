//! Tidy passes run on `htmd` output for extracted page content.
//!
//! Each pass is a function `&str -> String` applied in sequence.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

/// Run the tidy pipeline on freshly converted Markdown.
pub(crate) fn run_pipeline(md: &str, base_url: Option<&Url>) -> String {
    let mut result = md.to_string();

    result = fix_code_block_languages(&result);
    result = strip_leftover_html(&result);
    result = resolve_links(&result, base_url);
    result = trim_line_ends(&result);
    result = collapse_blank_lines(&result);

    result.trim().to_string()
}

/// `language-js`, `lang-python` and `highlight-rust` fence hints become bare names.
fn fix_code_block_languages(md: &str) -> String {
    static LANG_PREFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?m)^```(?:language-|lang-|highlight-)(\w+)").expect("valid regex")
    });

    LANG_PREFIX_RE.replace_all(md, "```$1").to_string()
}

/// Remove HTML tags `htmd` passed through, leaving fenced code untouched.
fn strip_leftover_html(md: &str) -> String {
    static HTML_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"</?[a-zA-Z][a-zA-Z0-9-]*(?:\s[^<>]*)?/?>").expect("valid regex")
    });

    let mut lines = Vec::new();
    let mut in_code_block = false;

    for line in md.lines() {
        if line.trim_start().starts_with("```") {
            in_code_block = !in_code_block;
            lines.push(line.to_string());
        } else if in_code_block {
            lines.push(line.to_string());
        } else {
            lines.push(HTML_TAG_RE.replace_all(line, "").to_string());
        }
    }

    lines.join("\n")
}

/// Resolve relative URLs in Markdown links against the page URL.
fn resolve_links(md: &str, base_url: Option<&Url>) -> String {
    let Some(base) = base_url else {
        return md.to_string();
    };

    static LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(!?)\[([^\]]*)\]\(([^)\s]+)\)").expect("valid regex")
    });

    LINK_RE
        .replace_all(md, |caps: &regex::Captures| {
            let bang = &caps[1];
            let text = &caps[2];
            let href = &caps[3];

            if href.starts_with('#') || Url::parse(href).is_ok() {
                return caps[0].to_string();
            }

            match base.join(href) {
                Ok(resolved) => format!("{bang}[{text}]({resolved})"),
                Err(_) => caps[0].to_string(),
            }
        })
        .to_string()
}

fn trim_line_ends(md: &str) -> String {
    md.lines().map(str::trim_end).collect::<Vec<_>>().join("\n")
}

/// Collapse runs of blank lines into a single blank line.
fn collapse_blank_lines(md: &str) -> String {
    static MULTI_BLANK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

    MULTI_BLANK_RE.replace_all(md, "\n\n").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_fence_language_prefix_stripped() {
        let input = "```language-javascript\nconsole.log('hi');\n```";
        assert!(fix_code_block_languages(input).starts_with("```javascript"));
        let plain = "```rust\nfn main() {}\n```";
        assert_eq!(fix_code_block_languages(plain), plain);
    }

    #[test]
    fn leftover_tags_removed_outside_code() {
        let input = "Intro <span class=\"x\">text</span>\n\n```html\n<div>Preserved</div>\n```";
        let result = strip_leftover_html(input);
        assert!(result.contains("Intro text"));
        assert!(result.contains("<div>Preserved</div>"));
    }

    #[test]
    fn comparison_operators_survive() {
        assert_eq!(strip_leftover_html("if a < b and c > d"), "if a < b and c > d");
    }

    #[test]
    fn links_resolved_against_base() {
        let base = Url::parse("https://docs.example.com/guide/intro").unwrap();
        assert_eq!(
            resolve_links("[Next](/api/reference)", Some(&base)),
            "[Next](https://docs.example.com/api/reference)"
        );
        assert_eq!(
            resolve_links("![logo](img/logo.png)", Some(&base)),
            "![logo](https://docs.example.com/guide/img/logo.png)"
        );
        assert_eq!(resolve_links("[S](#section-1)", Some(&base)), "[S](#section-1)");
        assert_eq!(
            resolve_links("[L](https://other.com/page)", Some(&base)),
            "[L](https://other.com/page)"
        );
    }

    #[test]
    fn pipeline_collapses_and_trims() {
        let input = "\n\n# Title   \n\n\n\n\nBody <b>text</b>\n\n";
        assert_eq!(run_pipeline(input, None), "# Title\n\nBody text");
    }
}
