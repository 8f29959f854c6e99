//! Tree walker: finds every declaration under a root and runs each one's
//! pipeline in place.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{info, instrument, warn};
use walkdir::WalkDir;

use doctree_shared::{DoctreeError, EngineConfig, Result};

use crate::janitor::Janitor;
use crate::runner::{Pipeline, RunOutcome};

// ---------------------------------------------------------------------------
// Progress reporting
// ---------------------------------------------------------------------------

/// Progress callback for assembly.
pub trait ProgressReporter {
    /// Called before a declaration's pipeline runs. `current` is 1-based.
    fn pipeline_started(&self, dir: &Path, current: usize, total: usize);
    /// Called after a pipeline ran (successfully or with a captured failure).
    fn pipeline_finished(&self, dir: &Path, outcome: &RunOutcome);
    /// Called when assembly completes.
    fn done(&self, report: &AssembleReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn pipeline_started(&self, _dir: &Path, _current: usize, _total: usize) {}
    fn pipeline_finished(&self, _dir: &Path, _outcome: &RunOutcome) {}
    fn done(&self, _report: &AssembleReport) {}
}

// ---------------------------------------------------------------------------
// Assembly
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
pub struct AssembleOptions {
    /// Delete each declaration file and its sibling `.gitignore` after the
    /// pipeline ran.
    pub remove_artifacts: bool,
}

/// Summary of one assembly.
#[derive(Debug, Default)]
pub struct AssembleReport {
    /// Directories whose pipeline ran.
    pub pipelines: Vec<PathBuf>,
    /// Directories that received an error page instead of content.
    pub failed: Vec<PathBuf>,
    /// Directories whose declaration is disabled.
    pub disabled: Vec<PathBuf>,
}

/// Every file named `file_name` under `root`, in sorted path order.
/// `.git` directories are not searched.
pub fn find_declarations(root: &Path, file_name: &str) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        return Err(DoctreeError::io(
            root,
            io::Error::new(io::ErrorKind::NotFound, "not a directory"),
        ));
    }
    let mut found = Vec::new();
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.file_name() != ".git");
    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
            DoctreeError::io(path, e.into())
        })?;
        if entry.file_type().is_file() && entry.file_name() == file_name {
            found.push(entry.into_path());
        }
    }
    found.sort();
    Ok(found)
}

/// Run every declaration under `root` in place, merging each pipeline's
/// output into the declaration's directory.
///
/// Declarations are collected before anything runs, so directories created
/// by a merge are never themselves visited: a declaration that a source
/// brings along into a subdirectory is copied but not run. Stage failures
/// become error pages; configuration and filesystem errors abort the walk.
#[instrument(skip_all, fields(root = %root.display()))]
pub fn assemble(
    root: &Path,
    config: &EngineConfig,
    opts: AssembleOptions,
    janitor: &mut Janitor,
    progress: &dyn ProgressReporter,
) -> Result<AssembleReport> {
    let declarations = find_declarations(root, &config.declaration_file)?;
    info!(count = declarations.len(), "found declarations");

    let mut report = AssembleReport::default();
    let total = declarations.len();
    for (i, declaration) in declarations.iter().enumerate() {
        let pipeline = Pipeline::load(declaration, config)?;
        let dir = pipeline.target_dir().to_path_buf();
        progress.pipeline_started(&dir, i + 1, total);

        if pipeline.spec().enabled {
            let outcome = pipeline.run(true, janitor)?;
            if outcome.is_failure() {
                warn!(dir = %dir.display(), "pipeline failed, error page merged");
                report.failed.push(dir.clone());
            }
            progress.pipeline_finished(&dir, &outcome);
            report.pipelines.push(dir.clone());
        } else {
            info!(dir = %dir.display(), "declaration disabled");
            progress.pipeline_finished(&dir, &RunOutcome::default());
            report.disabled.push(dir.clone());
        }

        if opts.remove_artifacts {
            remove_artifacts(declaration)?;
        }
    }

    progress.done(&report);
    Ok(report)
}

/// Delete a declaration and the `.gitignore` next to it.
fn remove_artifacts(declaration: &Path) -> Result<()> {
    fs::remove_file(declaration).map_err(|e| DoctreeError::io(declaration, e))?;
    if let Some(dir) = declaration.parent() {
        let ignore = dir.join(".gitignore");
        if ignore.is_file() {
            fs::remove_file(&ignore).map_err(|e| DoctreeError::io(&ignore, e))?;
        }
    }
    Ok(())
}
