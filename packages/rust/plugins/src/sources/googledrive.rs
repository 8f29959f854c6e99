use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::DateTime;
use reqwest::blocking::{Client, Response};
use serde::Deserialize;
use tracing::{info, instrument, warn};

use doctree_shared::{DoctreeError, GoogleDriveConfig, PluginKind, Result};

use crate::fsutil::set_mtime;
use crate::{Release, StageContext, Transformer, WorkSlot};

const USER_AGENT: &str = concat!("doctree/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT_SECS: u64 = 60;
const GOOGLE_DOC_MIME: &str = "application/vnd.google-apps.document";

/// Export format for Google Docs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriveFormat {
    #[default]
    Docx,
    Epub,
    Rtf,
    Html,
}

impl DriveFormat {
    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Docx => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
            Self::Epub => "application/epub+zip",
            Self::Rtf => "application/rtf",
            Self::Html => "text/html",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Docx => "docx",
            Self::Epub => "epub",
            Self::Rtf => "rtf",
            Self::Html => "html",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DriveParams {
    #[serde(deserialize_with = "crate::string_or_number")]
    pub folder_id: String,
    #[serde(default)]
    pub format: DriveFormat,
    /// Section title; defaults to the folder's name.
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Token {
    access_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    name: String,
    modified_time: Option<String>,
}

/// Exports every Google Doc in a Drive folder, plus an `_index.md` page
/// carrying the folder title.
#[derive(Debug)]
pub struct GoogleDriveSource {
    params: DriveParams,
    api_base: String,
    token_path: PathBuf,
    slot: WorkSlot,
}

impl GoogleDriveSource {
    pub fn new(params: DriveParams, ctx: &StageContext<'_>, slot: WorkSlot) -> Self {
        let GoogleDriveConfig { token_file, api_base } = &ctx.config.googledrive;
        Self {
            params,
            api_base: api_base.trim_end_matches('/').to_string(),
            token_path: ctx.config.config_dir.join(token_file),
            slot,
        }
    }

    fn get(&self, client: &Client, token: &str, url: &str, query: &[(&str, &str)]) -> Result<Response> {
        client
            .get(url)
            .bearer_auth(token)
            .query(query)
            .send()
            .and_then(Response::error_for_status)
            .map_err(|e| DoctreeError::Network(format!("{url}: {e}")))
    }

    fn folder_name(&self, client: &Client, token: &str) -> Result<String> {
        #[derive(Deserialize)]
        struct Folder {
            name: String,
        }
        let url = format!("{}/drive/v3/files/{}", self.api_base, self.params.folder_id);
        let folder: Folder = self
            .get(client, token, &url, &[("fields", "name")])?
            .json()
            .map_err(|e| DoctreeError::Network(format!("{url}: {e}")))?;
        Ok(folder.name)
    }

    fn export(&self, client: &Client, token: &str, file: &DriveFile, out: &Path) -> Result<Option<SystemTime>> {
        let url = format!("{}/drive/v3/files/{}/export", self.api_base, file.id);
        let bytes = self
            .get(client, token, &url, &[("mimeType", self.params.format.mime_type())])?
            .bytes()
            .map_err(|e| DoctreeError::Network(format!("{url}: {e}")))?;

        let path = out.join(export_filename(&file.name, self.params.format));
        fs::write(&path, &bytes).map_err(|e| DoctreeError::io(&path, e))?;

        let modified = file.modified_time.as_deref().and_then(parse_timestamp);
        if let Some(time) = modified {
            set_mtime(&path, time)?;
        }
        Ok(modified)
    }
}

impl Transformer for GoogleDriveSource {
    fn kind(&self) -> PluginKind {
        PluginKind::GoogleDrive
    }

    #[instrument(skip_all, fields(folder = %self.params.folder_id))]
    fn run(&mut self) -> Result<PathBuf> {
        let token = read_token(&self.token_path)?;
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| DoctreeError::Network(format!("failed to build HTTP client: {e}")))?;
        let out = self.slot.acquire()?;

        let title = match &self.params.title {
            Some(title) => title.clone(),
            None => self.folder_name(&client, &token)?,
        };

        let list_url = format!("{}/drive/v3/files", self.api_base);
        let query = format!("'{}' in parents and mimeType = '{GOOGLE_DOC_MIME}'", self.params.folder_id);
        let mut page_token: Option<String> = None;
        let mut index_time = UNIX_EPOCH;
        loop {
            let mut params = vec![
                ("q", query.as_str()),
                ("fields", "nextPageToken, files(id, name, modifiedTime)"),
            ];
            if let Some(page) = &page_token {
                params.push(("pageToken", page.as_str()));
            }
            let listing: FileList = self
                .get(&client, &token, &list_url, &params)?
                .json()
                .map_err(|e| DoctreeError::Network(format!("{list_url}: {e}")))?;

            for file in &listing.files {
                info!(name = %file.name, "exporting document");
                match self.export(&client, &token, file, &out) {
                    Ok(Some(time)) => index_time = index_time.max(time),
                    Ok(None) => {}
                    Err(e) => warn!(name = %file.name, id = %file.id, error = %e, "failed to export document"),
                }
            }

            match listing.next_page_token {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }

        let index = out.join("_index.md");
        fs::write(&index, format!("# {title}\n")).map_err(|e| DoctreeError::io(&index, e))?;
        set_mtime(&index, index_time)?;
        info!("all documents retrieved");
        Ok(out)
    }

    fn release(&mut self) {
        self.slot.release();
    }
}

fn read_token(path: &Path) -> Result<String> {
    let raw = fs::read_to_string(path).map_err(|_| {
        DoctreeError::config(format!("no Google Drive credentials found at {}", path.display()))
    })?;
    let token: Token = serde_json::from_str(&raw)
        .map_err(|e| DoctreeError::config(format!("invalid Google Drive token {}: {e}", path.display())))?;
    Ok(token.access_token)
}

/// Local file name for an exported document.
fn export_filename(name: &str, format: DriveFormat) -> String {
    format!("{name}.{}", format.extension()).replace('/', "-")
}

fn parse_timestamp(raw: &str) -> Option<SystemTime> {
    DateTime::parse_from_rfc3339(raw).ok().map(SystemTime::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_default_to_docx() {
        let params: DriveParams = serde_yaml::from_str("folder_id: abc123").unwrap();
        assert_eq!(params.format, DriveFormat::Docx);
        assert!(params.title.is_none());

        let params: DriveParams = serde_yaml::from_str("folder_id: abc\nformat: html").unwrap();
        assert_eq!(params.format.mime_type(), "text/html");
        assert!(serde_yaml::from_str::<DriveParams>("folder_id: abc\nformat: pdf").is_err());
    }

    #[test]
    fn file_names_are_flattened() {
        assert_eq!(export_filename("Q3/Q4 plan", DriveFormat::Docx), "Q3-Q4 plan.docx");
    }

    #[test]
    fn parses_listing_page() {
        let listing: FileList = serde_json::from_str(
            r#"{"nextPageToken": "p2", "files": [
                {"id": "1", "name": "Intro", "modifiedTime": "2020-05-01T10:00:00.000Z"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(listing.next_page_token.as_deref(), Some("p2"));
        assert_eq!(listing.files[0].name, "Intro");
        let time = parse_timestamp(listing.files[0].modified_time.as_deref().unwrap()).unwrap();
        assert_eq!(time.duration_since(UNIX_EPOCH).unwrap().as_secs(), 1_588_327_200);

        let last: FileList = serde_json::from_str("{}").unwrap();
        assert!(last.files.is_empty() && last.next_page_token.is_none());
    }

    #[test]
    fn missing_token_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_token(&dir.path().join("token.json")).unwrap_err();
        assert!(err.is_config());

        std::fs::write(dir.path().join("token.json"), r#"{"access_token": "ya29"}"#).unwrap();
        assert_eq!(read_token(&dir.path().join("token.json")).unwrap(), "ya29");
    }
}
