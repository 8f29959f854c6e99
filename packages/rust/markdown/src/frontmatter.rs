//! Page titles and YAML front matter for Hugo-style content trees.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use scraper::Html;
use serde::Serialize;

use doctree_shared::{DoctreeError, Result};

static ATX_H1_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^ {0,3}# +(.*?)(?: +#+)? *$").expect("valid regex"));
static SETEXT_H1_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^ {0,3}=+ *$").expect("valid regex"));

/// Front matter written at the top of every converted page.
#[derive(Debug, Clone, Serialize)]
pub struct FrontMatter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub date: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<i64>,
}

/// Pull the page title out of a Markdown body.
///
/// The first level-one heading (ATX `# Title` or a setext `===` underline)
/// becomes the title and is removed from the returned body. Without one the
/// file stem `base` is used. With `filename_as_title`, every page except
/// `_index` keeps its body untouched and is titled by its file stem. Inline
/// HTML in the heading is reduced to its text.
pub fn extract_title(base: &str, content: &str, filename_as_title: bool) -> (String, String) {
    if filename_as_title && base != "_index" {
        return (base.to_string(), content.to_string());
    }

    let mut lines: Vec<&str> = content.lines().collect();
    let mut title = base.to_string();

    for idx in 0..lines.len() {
        if let Some(caps) = ATX_H1_RE.captures(lines[idx]) {
            let heading = caps[1].trim();
            if !heading.is_empty() {
                title = heading.to_string();
            }
            lines.remove(idx);
            break;
        }
        if idx > 0 && SETEXT_H1_RE.is_match(lines[idx]) && !lines[idx - 1].trim().is_empty() {
            title = lines[idx - 1].trim().to_string();
            lines.drain(idx - 1..=idx);
            break;
        }
    }

    let mut body = lines.join("\n");
    if content.ends_with('\n') && !body.is_empty() {
        body.push('\n');
    }
    (html_text(&title), body)
}

/// Text content of an HTML snippet, whitespace-normalized.
fn html_text(snippet: &str) -> String {
    if !snippet.contains('<') && !snippet.contains('&') {
        return snippet.to_string();
    }
    let fragment = Html::parse_fragment(snippet);
    fragment
        .root_element()
        .text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Render a page as `---\n<yaml>---\n<body>`.
pub fn render_page(front: &FrontMatter, body: &str) -> Result<String> {
    let yaml = serde_yaml::to_string(front)
        .map_err(|e| DoctreeError::Conversion(format!("front matter serialization failed: {e}")))?;
    Ok(format!("---\n{yaml}---\n{body}"))
}
