use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::LazyLock;
use std::time::{SystemTime, UNIX_EPOCH};

use regex::{Captures, Regex};
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};
use url::Url;

use doctree_shared::{DoctreeError, PluginKind, Result};

use crate::fsutil::{copy_tree, dotted_extension, files_under, mtime, set_mtime};
use crate::{Release, Transformer, WorkSlot, tools};

static HTML_THEME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?m)^html_theme\s*=\s*['"][^'"]+['"]"#).expect("valid regex"));
static HEADERLINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<a\s[^>]*class="headerlink"[^>]*>.*?</a>"#).expect("valid regex")
});
static HREF_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"href="([^"]*)""#).expect("valid regex"));

#[derive(Debug, Clone, Deserialize)]
pub struct SphinxParams {
    /// Directory holding the Sphinx `Makefile`.
    #[serde(default = "default_dir")]
    pub dir: String,
    /// Install the project's Python dependencies (Pipfile or poetry.lock) first.
    #[serde(default)]
    pub install_deps: bool,
    /// Unused; Sphinx takes the project title from `conf.py`.
    #[serde(default)]
    pub title: Option<String>,
}

fn default_dir() -> String {
    "docs".into()
}

/// Python environment the build runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PythonEnv {
    System,
    Pipenv,
    Poetry,
}

impl PythonEnv {
    fn detect(project: &Path, install_deps: bool) -> Self {
        if !install_deps {
            Self::System
        } else if project.join("Pipfile").exists() {
            Self::Pipenv
        } else if project.join("poetry.lock").exists() {
            Self::Poetry
        } else {
            Self::System
        }
    }

    /// Command running `program` inside the environment.
    fn command(self, project: &Path, program: &str) -> Command {
        let mut cmd = match self {
            Self::System => Command::new(program),
            Self::Pipenv => {
                let mut cmd = Command::new("pipenv");
                cmd.args(["run", program]);
                cmd
            }
            Self::Poetry => {
                let mut cmd = Command::new("poetry");
                cmd.args(["run", program]);
                cmd
            }
        };
        if self == Self::Pipenv {
            cmd.env("PIPENV_PIPFILE", project.join("Pipfile"))
                .env("PIPENV_IGNORE_VIRTUALENVS", "1");
        }
        cmd
    }
}

/// Runs `make html` for a Sphinx project with the minimal `basic` theme
/// and reshapes the HTML for a Hugo content tree.
#[derive(Debug)]
pub struct SphinxBuilder {
    params: SphinxParams,
    input: PathBuf,
    env: PythonEnv,
    slot: WorkSlot,
}

impl SphinxBuilder {
    pub fn new(params: SphinxParams, input: PathBuf, slot: WorkSlot) -> Self {
        Self {
            params,
            input,
            env: PythonEnv::System,
            slot,
        }
    }

    fn install_deps(&self, project: &Path) -> Result<()> {
        let mut cmd = match self.env {
            PythonEnv::System => return Ok(()),
            PythonEnv::Pipenv => {
                let mut cmd = Command::new("pipenv");
                cmd.args(["sync", "--dev"])
                    .env("PIPENV_PIPFILE", project.join("Pipfile"))
                    .env("PIPENV_IGNORE_VIRTUALENVS", "1");
                cmd
            }
            PythonEnv::Poetry => {
                let mut cmd = Command::new("poetry");
                cmd.arg("install");
                cmd
            }
        };
        info!(env = ?self.env, "installing documentation dependencies");
        tools::run(cmd.current_dir(project), "dependency install")
    }

    fn remove_python_env(&self, project: &Path) {
        match self.env {
            PythonEnv::System => {}
            PythonEnv::Pipenv => {
                let result = Command::new("pipenv")
                    .arg("--rm")
                    .current_dir(project)
                    .env("PIPENV_PIPFILE", project.join("Pipfile"))
                    .env("PIPENV_IGNORE_VIRTUALENVS", "1")
                    .status();
                if let Err(e) = result {
                    warn!(error = %e, "failed to remove pipenv environment");
                }
            }
            PythonEnv::Poetry => {
                let path = tools::output(
                    Command::new("poetry").args(["env", "info", "--path"]).current_dir(project),
                    "poetry env info",
                );
                match path {
                    Ok(path) if !path.trim().is_empty() => {
                        if let Err(e) = fs::remove_dir_all(path.trim()) {
                            warn!(error = %e, "failed to remove poetry environment");
                        }
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "failed to locate poetry environment"),
                }
            }
        }
    }
}

impl Transformer for SphinxBuilder {
    fn kind(&self) -> PluginKind {
        PluginKind::Sphinx
    }

    #[instrument(skip_all, fields(dir = %self.params.dir))]
    fn run(&mut self) -> Result<PathBuf> {
        let project = self.slot.acquire()?;
        copy_tree(&self.input, &project, self.slot.is_devel())?;
        self.env = PythonEnv::detect(&project, self.params.install_deps);
        self.install_deps(&project)?;

        let mod_time = latest_source_mtime(&project)?;
        let docs = project.join(&self.params.dir);
        let makefile_path = docs.join("Makefile");
        let makefile = fs::read_to_string(&makefile_path).map_err(|e| DoctreeError::io(&makefile_path, e))?;

        let sourcedir = makefile_var(&makefile, "SOURCEDIR")
            .ok_or_else(|| DoctreeError::stage("could not extract SOURCEDIR from Makefile"))?;
        let conf_py = docs.join(sourcedir).join("conf.py");
        if !conf_py.exists() {
            return Err(DoctreeError::stage(format!("could not find {}", conf_py.display())));
        }
        let conf = fs::read_to_string(&conf_py).map_err(|e| DoctreeError::io(&conf_py, e))?;
        fs::write(&conf_py, force_basic_theme(&conf)).map_err(|e| DoctreeError::io(&conf_py, e))?;

        let builddir = makefile_var(&makefile, "BUILDDIR")
            .ok_or_else(|| DoctreeError::stage("could not extract BUILDDIR from Makefile"))?;
        let build = docs.join(builddir);
        if build.exists() {
            debug!(path = %build.display(), "removing stale build output");
            fs::remove_dir_all(&build).map_err(|e| DoctreeError::io(&build, e))?;
        }

        info!("running sphinx build");
        tools::run(
            self.env.command(&project, "make").arg("html").current_dir(&docs),
            "sphinx build",
        )?;

        let html_dir = build.join("html");
        clean_html_tree(&html_dir, mod_time)?;
        Ok(html_dir)
    }

    fn release(&mut self) {
        if let Some(project) = self.slot.path().map(Path::to_path_buf) {
            self.remove_python_env(&project);
        }
        self.env = PythonEnv::System;
        self.slot.release();
    }
}

/// Value of a `NAME = value` assignment in a Makefile.
fn makefile_var<'a>(makefile: &'a str, name: &str) -> Option<&'a str> {
    let re = Regex::new(&format!(r"{}\s*=\s*(\S+)", regex::escape(name))).ok()?;
    re.captures(makefile)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

fn force_basic_theme(conf: &str) -> String {
    HTML_THEME_RE.replace_all(conf, r#"html_theme = "basic""#).into_owned()
}

/// Newest `.rst` mtime in the project.
fn latest_source_mtime(project: &Path) -> Result<SystemTime> {
    let mut latest = UNIX_EPOCH;
    for file in files_under(project)? {
        if dotted_extension(&file) == ".rst" {
            latest = latest.max(mtime(&file)?);
        }
    }
    Ok(latest)
}

// ---------------------------------------------------------------------------
// HTML cleanup
// ---------------------------------------------------------------------------

/// Reshape Sphinx HTML for a Hugo content tree: drop permalink anchors,
/// turn `page.html` links into `page/`, and move `name.html` into
/// `name/index.html` when a `name/` directory exists. Pages that do not end
/// up as `index.html` get their relative links prefixed with `../`, since
/// Hugo serves them one level deeper.
fn clean_html_tree(html_dir: &Path, mod_time: SystemTime) -> Result<()> {
    info!("cleaning up sphinx html");
    for file in files_under(html_dir)? {
        if dotted_extension(&file) != ".html" {
            continue;
        }
        let html = fs::read_to_string(&file).map_err(|e| DoctreeError::io(&file, e))?;

        let sibling_dir = file.with_extension("");
        let target = if sibling_dir.is_dir() {
            fs::remove_file(&file).map_err(|e| DoctreeError::io(&file, e))?;
            sibling_dir.join("index.html")
        } else {
            file
        };
        let is_index = target.file_name().is_some_and(|name| name == "index.html");

        fs::write(&target, rewrite_page(&html, !is_index)).map_err(|e| DoctreeError::io(&target, e))?;
        set_mtime(&target, mod_time)?;
    }
    Ok(())
}

fn rewrite_page(html: &str, nested: bool) -> String {
    let html = HEADERLINK_RE.replace_all(html, "");
    HREF_RE
        .replace_all(&html, |caps: &Captures| format!(r#"href="{}""#, rewrite_href(&caps[1], nested)))
        .into_owned()
}

fn rewrite_href(href: &str, nested: bool) -> String {
    if href.starts_with("//") || Url::parse(href).is_ok() {
        return href.to_string();
    }
    let split = href.find(['?', '#']).unwrap_or(href.len());
    let (path, rest) = href.split_at(split);
    let mut path = match path.strip_suffix(".html") {
        Some(stem) => format!("{stem}/"),
        None => path.to_string(),
    };
    if nested && !path.is_empty() && !path.starts_with('/') {
        path = format!("../{path}");
    }
    format!("{path}{rest}")
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAKEFILE: &str = "SPHINXOPTS    ?=\nSPHINXBUILD   ?= sphinx-build\nSOURCEDIR     = source\nBUILDDIR      = _build\n";

    #[test]
    fn reads_makefile_vars() {
        assert_eq!(makefile_var(MAKEFILE, "SOURCEDIR"), Some("source"));
        assert_eq!(makefile_var(MAKEFILE, "BUILDDIR"), Some("_build"));
        assert_eq!(makefile_var(MAKEFILE, "MISSING"), None);
    }

    #[test]
    fn theme_forced_to_basic() {
        let conf = "project = 'x'\nhtml_theme = 'alabaster'\n# html_theme = 'other'\n";
        assert_eq!(
            force_basic_theme(conf),
            "project = 'x'\nhtml_theme = \"basic\"\n# html_theme = 'other'\n"
        );
    }

    #[test]
    fn hrefs_rewritten_for_hugo() {
        assert_eq!(rewrite_href("install.html#linux", false), "install/#linux");
        assert_eq!(rewrite_href("install.html", true), "../install/");
        assert_eq!(rewrite_href("#top", true), "#top");
        assert_eq!(rewrite_href("/abs/page.html", true), "/abs/page/");
        assert_eq!(rewrite_href("https://x.org/a.html", true), "https://x.org/a.html");
        assert_eq!(rewrite_href("_static/style.css", true), "../_static/style.css");
    }

    #[test]
    fn headerlinks_removed() {
        let html = r##"<h1>Intro<a class="headerlink" href="#intro" title="Permalink">¶</a></h1>"##;
        assert_eq!(rewrite_page(html, false), "<h1>Intro</h1>");
    }

    #[test]
    fn page_with_matching_directory_becomes_index() {
        let root = tempfile::tempdir().unwrap();
        let html = root.path().join("html");
        fs::create_dir_all(html.join("guide")).unwrap();
        fs::write(html.join("guide.html"), r#"<a href="guide/setup.html">Setup</a>"#).unwrap();
        fs::write(html.join("guide/setup.html"), r#"<a href="../index.html">Home</a>"#).unwrap();
        let stamp = UNIX_EPOCH + std::time::Duration::from_secs(1_000_000);

        clean_html_tree(&html, stamp).unwrap();

        assert!(!html.join("guide.html").exists());
        let index = fs::read_to_string(html.join("guide/index.html")).unwrap();
        assert_eq!(index, r#"<a href="guide/setup/">Setup</a>"#);
        let setup = fs::read_to_string(html.join("guide/setup.html")).unwrap();
        assert_eq!(setup, r#"<a href="../../index/">Home</a>"#);
        assert_eq!(mtime(&html.join("guide/index.html")).unwrap(), stamp);
    }

    #[test]
    fn install_deps_detection() {
        let root = tempfile::tempdir().unwrap();
        assert_eq!(PythonEnv::detect(root.path(), true), PythonEnv::System);
        fs::write(root.path().join("poetry.lock"), "").unwrap();
        assert_eq!(PythonEnv::detect(root.path(), true), PythonEnv::Poetry);
        assert_eq!(PythonEnv::detect(root.path(), false), PythonEnv::System);
        fs::write(root.path().join("Pipfile"), "").unwrap();
        assert_eq!(PythonEnv::detect(root.path(), true), PythonEnv::Pipenv);
    }

    #[test]
    fn params_default_dir() {
        let params: SphinxParams = serde_yaml::from_str("install_deps: true").unwrap();
        assert_eq!(params.dir, "docs");
        assert!(params.install_deps);
    }
}
