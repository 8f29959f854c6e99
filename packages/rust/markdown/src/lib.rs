//! Markdown helpers for doctree plugins.
//!
//! - [`html_to_markdown`] turns downloaded HTML pages (wiki exports) into
//!   Markdown using `htmd`, followed by a short cleanup pipeline.
//! - [`frontmatter`] extracts page titles and renders the YAML front matter
//!   expected by Hugo-style static site generators.

mod cleanup;
pub mod frontmatter;

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, instrument};
use url::Url;

use doctree_shared::{DoctreeError, Result};

pub use frontmatter::{FrontMatter, extract_title, render_page};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Result of converting an HTML page to Markdown.
#[derive(Debug, Clone)]
pub struct ConvertResult {
    /// The final Markdown content.
    pub markdown: String,
    /// Title used for the leading H1, if any.
    pub title: Option<String>,
}

/// Options for the HTML-to-Markdown conversion.
#[derive(Debug, Clone, Default)]
pub struct ConvertOptions {
    /// Base URL for resolving root-relative and relative links.
    pub base_url: Option<Url>,
    /// Title to emit as the leading H1 when the body has none.
    pub title: Option<String>,
}

// ---------------------------------------------------------------------------
// Converter
// ---------------------------------------------------------------------------

/// Convert an HTML document or fragment to Markdown.
///
/// Tables are swapped for placeholders before `htmd` runs, since `htmd`
/// drops them, and spliced back in as pipe tables afterwards.
#[instrument(skip(html, opts), fields(len = html.len()))]
pub fn html_to_markdown(html: &str, opts: &ConvertOptions) -> Result<ConvertResult> {
    let content_html = body_html(html);
    let (content_html, tables) = extract_tables(&content_html);

    let converter = htmd::HtmlToMarkdown::builder()
        .skip_tags(vec!["script", "style", "nav", "iframe", "noscript", "svg"])
        .build();

    let mut raw = converter
        .convert(&content_html)
        .map_err(|e| DoctreeError::Conversion(format!("htmd conversion failed: {e}")))?;
    for (index, table) in tables.iter().enumerate() {
        raw = raw.replacen(&table_placeholder(index), table, 1);
    }

    let mut markdown = cleanup::run_pipeline(&raw, opts.base_url.as_ref());

    if let Some(title) = &opts.title {
        if !has_h1(&markdown) {
            markdown = format!("# {title}\n\n{markdown}");
        }
    }

    debug!(final_len = markdown.len(), "html converted to markdown");

    Ok(ConvertResult {
        markdown,
        title: opts.title.clone(),
    })
}

fn selector(css: &'static str) -> Selector {
    Selector::parse(css).expect("static selector")
}

/// Inner HTML of `<body>` for full documents; fragments pass through.
fn body_html(html: &str) -> String {
    if !html.contains("<body") {
        return html.to_string();
    }
    let doc = Html::parse_document(html);
    doc.select(&selector("body"))
        .next()
        .map(|body| body.inner_html())
        .unwrap_or_else(|| html.to_string())
}

fn has_h1(md: &str) -> bool {
    static H1_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?m)^# \S").expect("valid regex"));
    H1_RE.is_match(md)
}

// ---------------------------------------------------------------------------
// Tables
// ---------------------------------------------------------------------------

fn table_placeholder(index: usize) -> String {
    format!("DOCTREETABLE{index}X")
}

/// Swap every top-level `<table>` for a placeholder paragraph and return the
/// rendered pipe tables in placeholder order.
///
/// The fragment is re-serialized first so that each table's serialized form
/// is guaranteed to occur verbatim in the text being rewritten.
fn extract_tables(html: &str) -> (String, Vec<String>) {
    let fragment = Html::parse_fragment(html);
    let table_sel = selector("table");

    if fragment.select(&table_sel).next().is_none() {
        return (html.to_string(), Vec::new());
    }

    let mut rewritten = fragment.root_element().inner_html();
    let mut tables = Vec::new();
    for table in fragment.select(&table_sel) {
        // Nested tables are flattened into their parent's cells.
        if table
            .ancestors()
            .filter_map(ElementRef::wrap)
            .any(|el| el.value().name() == "table")
        {
            continue;
        }
        let placeholder = format!("<p>{}</p>", table_placeholder(tables.len()));
        rewritten = rewritten.replacen(&table.html(), &placeholder, 1);
        tables.push(pipe_table(&table));
    }
    (rewritten, tables)
}

fn pipe_table(table: &ElementRef) -> String {
    let row_sel = selector("tr");
    let cell_sel = selector("th, td");

    let mut rows: Vec<Vec<String>> = table
        .select(&row_sel)
        .map(|row| {
            row.select(&cell_sel)
                .map(|cell| {
                    cell.text()
                        .collect::<String>()
                        .split_whitespace()
                        .collect::<Vec<_>>()
                        .join(" ")
                        .replace('|', "\\|")
                })
                .collect::<Vec<_>>()
        })
        .filter(|cells: &Vec<String>| !cells.is_empty())
        .collect();

    let width = rows.iter().map(Vec::len).max().unwrap_or(0);
    if width == 0 {
        return String::new();
    }
    for row in &mut rows {
        row.resize(width, String::new());
    }

    let line = |cells: &[String]| format!("| {} |", cells.join(" | "));
    let mut out = vec![line(&rows[0]), line(&vec!["---".to_string(); width])];
    out.extend(rows[1..].iter().map(|row| line(row)));
    out.join("\n")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_fragment_with_title() {
        let html = "<p>Some <strong>bold</strong> text.</p>";
        let opts = ConvertOptions {
            base_url: None,
            title: Some("Runbook".into()),
        };
        let result = html_to_markdown(html, &opts).unwrap();
        assert!(result.markdown.starts_with("# Runbook\n\n"));
        assert!(result.markdown.contains("**bold**"));
        assert!(result.markdown.ends_with('\n'));
    }

    #[test]
    fn keeps_existing_h1() {
        let html = "<html><body><h1>Existing</h1><p>Body</p></body></html>";
        let opts = ConvertOptions {
            base_url: None,
            title: Some("Ignored".into()),
        };
        let result = html_to_markdown(html, &opts).unwrap();
        assert!(result.markdown.contains("# Existing"));
        assert!(!result.markdown.contains("# Ignored"));
    }

    #[test]
    fn renders_tables() {
        let html = r#"<h2>Owners</h2>
            <table class="confluenceTable">
                <tr><th>Team</th><th>Pager</th></tr>
                <tr><td>Storage</td><td>yes</td></tr>
                <tr><td>Edge</td></tr>
            </table>"#;
        let result = html_to_markdown(html, &ConvertOptions::default()).unwrap();
        assert!(result.markdown.contains("| Team | Pager |"));
        assert!(result.markdown.contains("| --- | --- |"));
        assert!(result.markdown.contains("| Storage | yes |"));
        assert!(result.markdown.contains("| Edge |  |"));
    }

    #[test]
    fn resolves_relative_links_against_base() {
        let html = r#"<p>See <a href="/wiki/spaces/OPS/pages/42">the runbook</a>.</p>"#;
        let opts = ConvertOptions {
            base_url: Some(Url::parse("https://wiki.example.com/").unwrap()),
            title: None,
        };
        let result = html_to_markdown(html, &opts).unwrap();
        assert!(
            result
                .markdown
                .contains("[the runbook](https://wiki.example.com/wiki/spaces/OPS/pages/42)")
        );
    }
}
