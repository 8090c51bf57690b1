//! HTML-to-Markdown conversion and answer normalization.
//!
//! Two entry points:
//! - [`convert_fragment`] turns an extracted HTML block into Markdown using
//!   `htmd`, then runs the tidy passes in `cleanup`.
//! - [`normalize_answer`] runs the ordered rule cascade that turns model
//!   output (which may contain stray HTML and entities) into pure Markdown.

mod cleanup;
mod normalize;

use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};
use tracing::{debug, instrument};
use url::Url;

use triangulate_shared::{ResearchError, Result};

pub use normalize::{Rule, decode_entities, normalize_answer, rules};

static TABLE_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("table").expect("valid selector"));
static TR_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("tr").expect("valid selector"));
static CELL_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("th, td").expect("valid selector"));

// ---------------------------------------------------------------------------
// Converter
// ---------------------------------------------------------------------------

/// Convert an HTML fragment (already isolated from page chrome) to Markdown.
///
/// Relative links are resolved against `base_url` when one is given.
#[instrument(skip_all, fields(len = html.len()))]
pub fn convert_fragment(html: &str, base_url: Option<&Url>) -> Result<String> {
    let (content_html, tables) = extract_tables(html);

    let converter = htmd::HtmlToMarkdown::builder()
        .skip_tags(vec![
            "script", "style", "nav", "iframe", "noscript", "svg", "form", "button",
        ])
        .build();

    let mut raw_markdown = converter
        .convert(&content_html)
        .map_err(|e| ResearchError::Conversion(format!("htmd conversion failed: {e}")))?;

    for (i, table) in tables.iter().enumerate() {
        raw_markdown = raw_markdown.replacen(&table_placeholder(i), table, 1);
    }

    let cleaned = cleanup::run_pipeline(&raw_markdown, base_url);
    debug!(
        raw_len = raw_markdown.len(),
        final_len = cleaned.len(),
        tables = tables.len(),
        "fragment converted"
    );

    Ok(cleaned)
}

// ---------------------------------------------------------------------------
// Tables
// ---------------------------------------------------------------------------

fn table_placeholder(i: usize) -> String {
    format!("TRIANGULATETABLE{i}X")
}

/// Swap every `<table>` for a placeholder paragraph and return the rendered
/// Markdown tables alongside.
///
/// `htmd` 0.1 doesn't support table conversion, so we handle it manually.
fn extract_tables(html: &str) -> (String, Vec<String>) {
    let doc = Html::parse_fragment(html);

    if doc.select(&TABLE_SEL).next().is_none() {
        return (html.to_string(), Vec::new());
    }

    // Re-serialize so table markup matches scraper's own output byte for byte.
    let mut result = doc.root_element().inner_html();
    let mut tables = Vec::new();
    for table_el in doc.select(&TABLE_SEL) {
        let outer = table_el.html();
        if !result.contains(&outer) {
            continue;
        }
        let placeholder = format!("<p>{}</p>", table_placeholder(tables.len()));
        result = result.replacen(&outer, &placeholder, 1);
        tables.push(html_table_to_markdown(&table_el));
    }

    (result, tables)
}

/// Render the first `<table>` found in an HTML snippet as a Markdown table.
///
/// Returns `None` when the snippet holds no table with cells.
pub fn table_html_to_markdown(table_html: &str) -> Option<String> {
    let doc = Html::parse_fragment(table_html);
    let table = doc.select(&TABLE_SEL).next()?;
    let md = html_table_to_markdown(&table);
    (!md.is_empty()).then_some(md)
}

/// Convert a single HTML table element to a Markdown table string.
fn html_table_to_markdown(table: &ElementRef) -> String {
    let mut rows: Vec<Vec<String>> = Vec::new();
    for tr in table.select(&TR_SEL) {
        let cells: Vec<String> = tr
            .select(&CELL_SEL)
            .map(|cell| {
                cell.text()
                    .collect::<String>()
                    .split_whitespace()
                    .collect::<Vec<_>>()
                    .join(" ")
                    .replace('|', "\\|")
            })
            .collect();
        if !cells.is_empty() {
            rows.push(cells);
        }
    }

    let col_count = rows.iter().map(Vec::len).max().unwrap_or(0);
    if col_count == 0 {
        return String::new();
    }
    for row in &mut rows {
        row.resize(col_count, String::new());
    }

    // The first row is the header whether or not it used <th>.
    let render_row = |row: &[String]| format!("| {} |", row.join(" | "));
    let mut lines = vec![
        render_row(&rows[0]),
        format!("| {} |", vec!["---"; col_count].join(" | ")),
    ];
    lines.extend(rows[1..].iter().map(|row| render_row(row)));

    lines.join("\n")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
