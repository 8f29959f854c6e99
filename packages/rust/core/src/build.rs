//! Staged builds: assemble a copy of a source tree in a scratch location and
//! publish the result to a target directory or a git repository.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use chrono::Utc;
use tracing::{error, info, instrument};

use doctree_plugins::fsutil::{copy_tree, is_empty_dir};
use doctree_plugins::sources::{GitParams, GitSource, parse_repo_url};
use doctree_plugins::{Transformer, WorkDirPolicy, WorkSlot, ensure_tools, required_tools, tools};
use doctree_shared::{DoctreeError, EngineConfig, PluginKind, Result, scoped_identity};

use crate::janitor::Janitor;
use crate::walker::{AssembleOptions, AssembleReport, ProgressReporter, assemble};

const SCRATCH_PREFIX: &str = "doctree-build-";

const STARTER_DECLARATION: &str = "pipeline:\n- empty: {}\n- noop: {}\n";

/// Where a build reads its tree from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocation {
    Local(PathBuf),
    /// `https://host/account/repo[@branch]`, cloned before building.
    Remote(GitParams),
}

impl SourceLocation {
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.starts_with("https://") {
            parse_repo_url(raw).map(Self::Remote)
        } else {
            Ok(Self::Local(PathBuf::from(raw)))
        }
    }
}

#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub source: SourceLocation,
    pub target: PathBuf,
    /// Keep the scratch tree when the build fails.
    pub preserve: bool,
    /// Remove declarations and their `.gitignore` files from the output.
    pub strip: bool,
}

#[derive(Debug)]
pub struct BuildReport {
    pub target: PathBuf,
    pub assembly: AssembleReport,
    /// Scratch tree left on disk (development mode).
    pub scratch: Option<PathBuf>,
}

/// Result of [`export`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportOutcome {
    Unchanged,
    Pushed,
}

// ---------------------------------------------------------------------------
// Build
// ---------------------------------------------------------------------------

/// Copy the source tree to a scratch location, assemble it there and copy
/// the result to `opts.target`.
///
/// The target is checked before anything else happens: it must be empty or
/// missing (any state in development mode) and its parent must exist.
#[instrument(skip_all, fields(target = %opts.target.display()))]
pub fn build(
    opts: &BuildOptions,
    config: &EngineConfig,
    janitor: &mut Janitor,
    progress: &dyn ProgressReporter,
) -> Result<BuildReport> {
    check_target(&opts.target, config.devel)?;
    let source = fetch_source(&opts.source, config, janitor)?;

    let scratch = tempfile::Builder::new()
        .prefix(SCRATCH_PREFIX)
        .tempdir()
        .map_err(|e| DoctreeError::io(std::env::temp_dir(), e))?;
    let tree = scratch.path().join("tree");
    info!(source = %source.display(), scratch = %tree.display(), "staging build");

    match stage(&source, &tree, opts, config, janitor, progress) {
        Ok(assembly) => {
            let scratch = config.devel.then(|| scratch.keep());
            if let Some(kept) = &scratch {
                info!(path = %kept.display(), "keeping scratch tree");
            }
            Ok(BuildReport {
                target: opts.target.clone(),
                assembly,
                scratch,
            })
        }
        Err(e) => {
            if opts.preserve || config.devel {
                let kept = scratch.keep();
                error!(error = %e, path = %kept.display(), "build failed, preserving scratch tree");
            } else {
                error!(error = %e, "build failed");
            }
            Err(e)
        }
    }
}

fn stage(
    source: &Path,
    tree: &Path,
    opts: &BuildOptions,
    config: &EngineConfig,
    janitor: &mut Janitor,
    progress: &dyn ProgressReporter,
) -> Result<AssembleReport> {
    copy_tree(source, tree, false)?;
    let assembly = assemble(
        tree,
        config,
        AssembleOptions {
            remove_artifacts: opts.strip,
        },
        janitor,
        progress,
    )?;
    copy_tree(tree, &opts.target, config.devel)?;
    info!(target = %opts.target.display(), "build copied to target");
    Ok(assembly)
}

/// Fail unless `target` can receive a build.
pub fn check_target(target: &Path, devel: bool) -> Result<()> {
    if target.exists() {
        if !target.is_dir() {
            return Err(DoctreeError::precondition(format!(
                "target path {} is not a directory",
                target.display()
            )));
        }
        if !devel && !is_empty_dir(target)? {
            return Err(DoctreeError::precondition(format!(
                "target path {} exists and is non-empty",
                target.display()
            )));
        }
        return Ok(());
    }
    let parent = match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    if !parent.is_dir() {
        return Err(DoctreeError::precondition(format!(
            "no such parent directory for target path {}",
            target.display()
        )));
    }
    Ok(())
}

/// Local directory holding the source tree, cloning remote sources.
fn fetch_source(location: &SourceLocation, config: &EngineConfig, janitor: &mut Janitor) -> Result<PathBuf> {
    match location {
        SourceLocation::Local(path) => {
            if path.is_dir() {
                Ok(path.clone())
            } else {
                Err(DoctreeError::io(
                    path,
                    io::Error::new(io::ErrorKind::NotFound, "source directory does not exist"),
                ))
            }
        }
        SourceLocation::Remote(params) => clone_repo(params, config, janitor),
    }
}

fn clone_repo(params: &GitParams, config: &EngineConfig, janitor: &mut Janitor) -> Result<PathBuf> {
    if config.check_dependencies {
        ensure_tools(required_tools(PluginKind::Git))?;
    }
    let identity = scoped_identity("checkout", &[params.clone_url().as_str(), params.branch.as_str()]);
    let slot = WorkSlot::new(WorkDirPolicy::from_config(config), identity);
    let mut git: Box<dyn Transformer> = Box::new(GitSource::new(PluginKind::Git, params.clone(), slot));
    let checkout = git.run();
    if !config.devel {
        janitor.hold(git);
    }
    checkout
}

// ---------------------------------------------------------------------------
// Export
// ---------------------------------------------------------------------------

/// Build `source` with declarations stripped and push the result to the
/// repository at `dest` (`https://host/account/repo[@branch]`). Nothing is
/// committed when the build matches the repository's current content.
#[instrument(skip_all, fields(dest = dest))]
pub fn export(
    source: SourceLocation,
    dest: &str,
    config: &EngineConfig,
    janitor: &mut Janitor,
    progress: &dyn ProgressReporter,
) -> Result<ExportOutcome> {
    if !dest.starts_with("https://") {
        return Err(DoctreeError::config(
            "the destination repo must be of the form https://hostname/account/project[@branch]",
        ));
    }
    let checkout = clone_repo(&parse_repo_url(dest)?, config, janitor)?;

    let workspace = tempfile::Builder::new()
        .prefix(SCRATCH_PREFIX)
        .tempdir()
        .map_err(|e| DoctreeError::io(std::env::temp_dir(), e))?;
    let site = workspace.path().join("site");
    let opts = BuildOptions {
        source,
        target: site.clone(),
        preserve: false,
        strip: true,
    };
    build(&opts, config, janitor, progress)?;

    // Graft the destination's history onto the build and let git diff it.
    let git_dir = site.join(".git");
    if git_dir.exists() {
        fs::remove_dir_all(&git_dir).map_err(|e| DoctreeError::io(&git_dir, e))?;
    }
    copy_tree(&checkout.join(".git"), &git_dir, false)?;

    let status = tools::output(
        Command::new("git").args(["status", "--porcelain"]).current_dir(&site),
        "git status",
    )?;
    if status.trim().is_empty() {
        info!("no changes detected");
        return Ok(ExportOutcome::Unchanged);
    }

    let message = format!("doctree docs build {}", Utc::now().format("%Y-%m-%d %H:%M:%S UTC"));
    tools::run(Command::new("git").args(["add", "."]).current_dir(&site), "git add")?;
    tools::run(
        Command::new("git").args(["commit", "-m", message.as_str()]).current_dir(&site),
        "git commit",
    )?;
    tools::run(Command::new("git").arg("push").current_dir(&site), "git push")?;
    info!(%message, "pushed documentation build");
    Ok(ExportOutcome::Pushed)
}

// ---------------------------------------------------------------------------
// Init
// ---------------------------------------------------------------------------

/// Write a starter declaration and a `.gitignore` that keeps only it.
pub fn init(dir: &Path, config: &EngineConfig) -> Result<PathBuf> {
    let declaration = dir.join(&config.declaration_file);
    if declaration.exists() {
        return Err(DoctreeError::precondition(format!(
            "{} already has a {} file",
            dir.display(),
            config.declaration_file
        )));
    }
    fs::write(&declaration, STARTER_DECLARATION).map_err(|e| DoctreeError::io(&declaration, e))?;

    let gitignore = dir.join(".gitignore");
    let ignore = format!("*\n**/*\n!{}\n!.gitignore\n", config.declaration_file);
    fs::write(&gitignore, ignore).map_err(|e| DoctreeError::io(&gitignore, e))?;

    info!(dir = %dir.display(), "initialized declaration");
    Ok(declaration)
}
