use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use reqwest::blocking::{Client, Response};
use serde::Deserialize;
use tracing::{info, instrument};
use url::Url;

use doctree_markdown::{ConvertOptions, html_to_markdown};
use doctree_shared::{ConfluenceConfig, DoctreeError, PluginKind, Result};

use crate::{Release, StageContext, Transformer, WorkSlot};

const USER_AGENT: &str = concat!("doctree/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT_SECS: u64 = 60;
const CHILD_PAGE_LIMIT: &str = "200";

/// Output format for downloaded pages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageFormat {
    #[default]
    Html,
    Markdown,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConfluenceParams {
    #[serde(deserialize_with = "crate::string_or_number")]
    pub page_id: String,
    #[serde(default)]
    pub format: PageFormat,
}

#[derive(Debug, Deserialize)]
struct Page {
    title: String,
    body: PageBody,
}

#[derive(Debug, Deserialize)]
struct PageBody {
    export_view: Storage,
}

#[derive(Debug, Deserialize)]
struct Storage {
    value: String,
}

#[derive(Debug, Deserialize)]
struct ChildPages {
    #[serde(default)]
    results: Vec<ChildPage>,
}

#[derive(Debug, Deserialize)]
struct ChildPage {
    id: String,
    title: String,
}

/// Connection details read from the environment.
#[derive(Debug)]
struct Credentials {
    base: Url,
    username: String,
    api_key: String,
}

impl Credentials {
    fn from_env(names: &ConfluenceConfig) -> Result<Self> {
        let var = |name: &str| {
            std::env::var(name).map_err(|_| {
                DoctreeError::config(format!(
                    "missing environment variable {name} with Confluence configuration"
                ))
            })
        };
        let raw_url = var(&names.url_env)?;
        let mut base = Url::parse(&raw_url)
            .map_err(|e| DoctreeError::config(format!("invalid Confluence URL {raw_url}: {e}")))?;
        if !base.path().ends_with('/') {
            base.set_path(&format!("{}/", base.path()));
        }
        Ok(Self {
            base,
            username: var(&names.username_env)?,
            api_key: var(&names.api_key_env)?,
        })
    }
}

/// Downloads a Confluence page and its direct child pages. The root page
/// lands in the output directory, each child in a slugified subdirectory.
#[derive(Debug)]
pub struct ConfluenceSource {
    params: ConfluenceParams,
    env: ConfluenceConfig,
    slot: WorkSlot,
}

impl ConfluenceSource {
    pub fn new(params: ConfluenceParams, ctx: &StageContext<'_>, slot: WorkSlot) -> Self {
        Self {
            params,
            env: ctx.config.confluence.clone(),
            slot,
        }
    }
}

impl Transformer for ConfluenceSource {
    fn kind(&self) -> PluginKind {
        PluginKind::Confluence
    }

    #[instrument(skip_all, fields(page = %self.params.page_id))]
    fn run(&mut self) -> Result<PathBuf> {
        let creds = Credentials::from_env(&self.env)?;
        let api = Api::new(creds)?;
        let out = self.slot.acquire()?;

        info!("downloading main page");
        let page = api.page(&self.params.page_id)?;
        write_page(&page, &out, self.params.format, &api.creds.base)?;

        for child in api.children(&self.params.page_id)? {
            info!(title = %child.title, "downloading child page");
            let slug = match slugify(&child.title) {
                slug if slug.is_empty() => child.id.clone(),
                slug => slug,
            };
            let dir = out.join(slug);
            fs::create_dir_all(&dir).map_err(|e| DoctreeError::io(&dir, e))?;
            let page = api.page(&child.id)?;
            write_page(&page, &dir, self.params.format, &api.creds.base)?;
        }
        info!("confluence download complete");
        Ok(out)
    }

    fn release(&mut self) {
        self.slot.release();
    }
}

struct Api {
    client: Client,
    creds: Credentials,
}

impl Api {
    fn new(creds: Credentials) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| DoctreeError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, creds })
    }

    fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<Response> {
        let url = self
            .creds
            .base
            .join(path)
            .map_err(|e| DoctreeError::config(format!("invalid Confluence path {path}: {e}")))?;
        self.client
            .get(url.clone())
            .basic_auth(&self.creds.username, Some(&self.creds.api_key))
            .query(query)
            .send()
            .and_then(Response::error_for_status)
            .map_err(|e| DoctreeError::Network(format!("{url}: {e}")))
    }

    fn page(&self, id: &str) -> Result<Page> {
        self.get(&format!("rest/api/content/{id}"), &[("expand", "body.export_view")])?
            .json()
            .map_err(|e| DoctreeError::Network(format!("page {id}: {e}")))
    }

    fn children(&self, id: &str) -> Result<Vec<ChildPage>> {
        let pages: ChildPages = self
            .get(&format!("rest/api/content/{id}/child/page"), &[("limit", CHILD_PAGE_LIMIT)])?
            .json()
            .map_err(|e| DoctreeError::Network(format!("children of page {id}: {e}")))?;
        Ok(pages.results)
    }
}

fn write_page(page: &Page, dir: &Path, format: PageFormat, base: &Url) -> Result<()> {
    let body = strip_child_toc(&page.body.export_view.value);
    let (name, content) = match format {
        PageFormat::Html => ("index.html", html_document(&page.title, &body)),
        PageFormat::Markdown => {
            let opts = ConvertOptions {
                base_url: Some(base.clone()),
                title: Some(page.title.clone()),
            };
            ("index.md", html_to_markdown(&body, &opts)?.markdown)
        }
    };
    let path = dir.join(name);
    fs::write(&path, content).map_err(|e| DoctreeError::io(&path, e))
}

fn html_document(title: &str, body: &str) -> String {
    let title = title.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;");
    format!(
        "<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"><title>{title}</title></head>\n<body>\n<h1>{title}</h1>\n{body}\n</body>\n</html>\n"
    )
}

/// Directory name for a page title: ASCII lowercase words joined by `-`.
pub(crate) fn slugify(title: &str) -> String {
    let kept: String = title
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-' || c.is_whitespace())
        .collect();
    kept.split(|c: char| c == '-' || c.is_whitespace())
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join("-")
        .trim_matches(|c: char| c == '-' || c == '_')
        .to_string()
}

/// Drop the child-pages macro list; child pages are downloaded separately.
fn strip_child_toc(html: &str) -> String {
    static CHILD_TOC_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r#"(?s)<ul[^>]*class="[^"]*childpages-macro[^"]*"[^>]*>.*?</ul>"#)
            .expect("valid regex")
    });
    CHILD_TOC_RE.replace_all(html, "").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugs() {
        assert_eq!(slugify("Release Notes 2.0"), "release-notes-20");
        assert_eq!(slugify("  On-call -- Runbook  "), "on-call-runbook");
        assert_eq!(slugify("Café au lait"), "caf-au-lait");
        assert_eq!(slugify("???"), "");
    }

    #[test]
    fn params() {
        let params: ConfluenceParams = serde_yaml::from_str("page_id: '12345'").unwrap();
        assert_eq!(params.format, PageFormat::Html);
        let params: ConfluenceParams = serde_yaml::from_str("page_id: 98765").unwrap();
        assert_eq!(params.page_id, "98765");
        let params: ConfluenceParams = serde_yaml::from_str("page_id: '1'\nformat: markdown").unwrap();
        assert_eq!(params.format, PageFormat::Markdown);
    }

    #[test]
    fn parses_page_payload() {
        let page: Page = serde_json::from_str(
            r#"{"id": "1", "title": "Ops", "body": {"export_view": {"value": "<p>x</p>", "representation": "export_view"}}}"#,
        )
        .unwrap();
        assert_eq!(page.title, "Ops");
        assert_eq!(page.body.export_view.value, "<p>x</p>");
    }

    #[test]
    fn child_toc_removed() {
        let html = r#"<p>Intro</p><ul class="childpages-macro"><li><a href="/x">Child</a></li></ul><ul><li>kept</li></ul>"#;
        assert_eq!(strip_child_toc(html), "<p>Intro</p><ul><li>kept</li></ul>");
    }

    #[test]
    fn writes_markdown_page() {
        let dir = tempfile::tempdir().unwrap();
        let page = Page {
            title: "Runbook".into(),
            body: PageBody {
                export_view: Storage {
                    value: "<p>Restart the <em>service</em>.</p>".into(),
                },
            },
        };
        let base = Url::parse("https://wiki.example.com/").unwrap();
        write_page(&page, dir.path(), PageFormat::Markdown, &base).unwrap();
        let md = fs::read_to_string(dir.path().join("index.md")).unwrap();
        assert!(md.starts_with("# Runbook\n"));
        assert!(md.contains("*service*") || md.contains("_service_"));

        write_page(&page, dir.path(), PageFormat::Html, &base).unwrap();
        let html = fs::read_to_string(dir.path().join("index.html")).unwrap();
        assert!(html.contains("<h1>Runbook</h1>"));
    }
}
