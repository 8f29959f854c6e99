//! Cleanup passes applied to `htmd` output.
//!
//! Each pass is a `&str -> String` function; [`run_pipeline`] applies them
//! in order.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use url::Url;

/// Run every cleanup pass on raw Markdown text.
pub(crate) fn run_pipeline(md: &str, base_url: Option<&Url>) -> String {
    let md = strip_wrapper_tags(md);
    let md = resolve_links(&md, base_url);
    let md = trim_line_ends(&md);
    let md = collapse_blank_lines(&md);
    ensure_trailing_newline(&md)
}

/// Drop layout-only tags that `htmd` passes through, keeping their text.
/// Fenced code blocks are left alone.
fn strip_wrapper_tags(md: &str) -> String {
    static WRAPPER_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"</?(?:div|span|section|colgroup|col|ac:[a-z-]+|ri:[a-z-]+)(?:\s[^>]*)?/?>")
            .expect("valid regex")
    });

    let mut in_fence = false;
    md.lines()
        .map(|line| {
            if line.trim_start().starts_with("```") {
                in_fence = !in_fence;
                return line.to_string();
            }
            if in_fence {
                line.to_string()
            } else {
                WRAPPER_RE.replace_all(line, "").into_owned()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Make relative link targets absolute. Images, anchors and absolute URLs are untouched.
fn resolve_links(md: &str, base_url: Option<&Url>) -> String {
    static LINK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(!?)\[([^\]]*)\]\(([^)\s]+)\)").expect("valid regex"));

    let Some(base) = base_url else {
        return md.to_string();
    };

    LINK_RE
        .replace_all(md, |caps: &Captures| {
            let href = &caps[3];
            let keep = !caps[1].is_empty()
                || href.starts_with('#')
                || href.starts_with("mailto:")
                || Url::parse(href).is_ok();
            if keep {
                return caps[0].to_string();
            }
            match base.join(href) {
                Ok(resolved) => format!("[{}]({resolved})", &caps[2]),
                Err(_) => caps[0].to_string(),
            }
        })
        .into_owned()
}

fn trim_line_ends(md: &str) -> String {
    md.lines().map(str::trim_end).collect::<Vec<_>>().join("\n")
}

/// At most one blank line between blocks.
fn collapse_blank_lines(md: &str) -> String {
    static BLANKS_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));
    BLANKS_RE.replace_all(md, "\n\n").into_owned()
}

fn ensure_trailing_newline(md: &str) -> String {
    format!("{}\n", md.trim_matches('\n'))
}
