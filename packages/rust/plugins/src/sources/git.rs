use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, UNIX_EPOCH};

use serde::Deserialize;
use tracing::{info, instrument, warn};
use url::Url;
use walkdir::WalkDir;

use doctree_shared::{DoctreeError, PluginKind, Result};

use crate::fsutil::{set_mtime, walk_error};
use crate::{Release, Transformer, WorkSlot, tools};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GitParams {
    #[serde(default = "default_hostname")]
    pub hostname: String,
    /// `owner/name` path of the repository on `hostname`.
    pub repo: String,
    #[serde(default = "default_branch")]
    pub branch: String,
}

fn default_hostname() -> String {
    "github.com".into()
}

fn default_branch() -> String {
    "master".into()
}

impl GitParams {
    pub fn clone_url(&self) -> String {
        format!("https://{}/{}", self.hostname, self.repo)
    }
}

/// Parse `https://host/owner/repo[@branch]` into clone parameters.
pub fn parse_repo_url(raw: &str) -> Result<GitParams> {
    let (location, branch) = match raw.rsplit_once('@') {
        Some((location, branch)) if !branch.contains('/') => (location, branch.to_string()),
        _ => (raw, default_branch()),
    };
    let url = Url::parse(location).map_err(|e| DoctreeError::config(format!("invalid repository URL {raw}: {e}")))?;
    let hostname = url
        .host_str()
        .ok_or_else(|| DoctreeError::config(format!("repository URL {raw} has no host")))?
        .to_string();
    let repo = url.path().trim_matches('/').to_string();
    if repo.is_empty() {
        return Err(DoctreeError::config(format!("repository URL {raw} has no path")));
    }
    Ok(GitParams {
        hostname,
        repo,
        branch,
    })
}

/// Clones a branch of a remote repository. Every file's mtime is set to the
/// branch head's commit time.
#[derive(Debug)]
pub struct GitSource {
    kind: PluginKind,
    params: GitParams,
    slot: WorkSlot,
}

impl GitSource {
    /// `kind` is either `git` or `github`; both clone over https.
    pub fn new(kind: PluginKind, params: GitParams, slot: WorkSlot) -> Self {
        Self { kind, params, slot }
    }
}

impl Transformer for GitSource {
    fn kind(&self) -> PluginKind {
        self.kind
    }

    #[instrument(skip_all, fields(repo = %self.params.repo, branch = %self.params.branch))]
    fn run(&mut self) -> Result<PathBuf> {
        let out = self.slot.acquire()?;
        let url = self.params.clone_url();
        info!(%url, "cloning repository");
        tools::run(
            Command::new("git")
                .args(["clone", url.as_str(), "-b", self.params.branch.as_str(), "."])
                .current_dir(&out),
            "git clone",
        )?;

        let stamp = tools::output(
            Command::new("git").args(["log", "-1", "--format=%ct"]).current_dir(&out),
            "git log",
        )?;
        match stamp.trim().parse::<u64>() {
            Ok(secs) => stamp_tree(&out, UNIX_EPOCH + Duration::from_secs(secs))?,
            Err(_) => warn!(output = stamp.trim(), "could not read commit time, keeping checkout mtimes"),
        }
        Ok(out)
    }

    fn release(&mut self) {
        self.slot.release();
    }
}

/// Set the mtime of every working-tree file under `root`.
fn stamp_tree(root: &Path, time: std::time::SystemTime) -> Result<()> {
    let walker = WalkDir::new(root)
        .into_iter()
        .filter_entry(|entry| entry.file_name() != ".git");
    for entry in walker {
        let entry = entry.map_err(|e| walk_error(root, e))?;
        if entry.file_type().is_file() {
            set_mtime(entry.path(), time)?;
        }
    }
    Ok(())
}
