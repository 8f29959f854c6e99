//! Working directories for stage output.
//!
//! In production every allocation is a fresh temporary directory that is
//! deleted on release. In development mode a stage writes to
//! `<cache_root>/<stage identity>`, which is wiped at the start of each run
//! and kept afterwards for inspection.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, warn};

use doctree_shared::{DoctreeError, EngineConfig, Result};

use crate::Release;

const TEMP_PREFIX: &str = "doctree-";

/// How work directories are allocated.
#[derive(Debug, Clone)]
pub struct WorkDirPolicy {
    devel: bool,
    cache_root: PathBuf,
}

impl WorkDirPolicy {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            devel: config.devel,
            cache_root: config.cache_root.clone(),
        }
    }

    pub fn is_devel(&self) -> bool {
        self.devel
    }

    /// Allocate a directory for `identity` according to the policy.
    pub fn allocate(&self, identity: &str) -> Result<WorkDir> {
        if self.devel {
            let path = self.cache_root.join(identity);
            if path.exists() {
                fs::remove_dir_all(&path).map_err(|e| DoctreeError::io(&path, e))?;
            }
            fs::create_dir_all(&path).map_err(|e| DoctreeError::io(&path, e))?;
            debug!(path = %path.display(), "using cached work dir");
            Ok(WorkDir::Cached(path))
        } else {
            let dir = tempfile::Builder::new()
                .prefix(TEMP_PREFIX)
                .tempdir()
                .map_err(|e| DoctreeError::io(std::env::temp_dir(), e))?;
            debug!(path = %dir.path().display(), "allocated temporary work dir");
            Ok(WorkDir::Scoped(dir))
        }
    }
}

/// An allocated work directory.
#[derive(Debug)]
pub enum WorkDir {
    /// Deleted on release (or drop).
    Scoped(TempDir),
    /// Development cache, never deleted by the engine.
    Cached(PathBuf),
}

impl WorkDir {
    pub fn path(&self) -> &Path {
        match self {
            Self::Scoped(dir) => dir.path(),
            Self::Cached(path) => path,
        }
    }
}

/// A lazily allocated work directory owned by one stage.
#[derive(Debug)]
pub struct WorkSlot {
    policy: WorkDirPolicy,
    identity: String,
    dir: Option<WorkDir>,
}

impl WorkSlot {
    pub fn new(policy: WorkDirPolicy, identity: impl Into<String>) -> Self {
        Self {
            policy,
            identity: identity.into(),
            dir: None,
        }
    }

    /// Path of the slot's directory, allocating it on first use.
    pub fn acquire(&mut self) -> Result<PathBuf> {
        if let Some(dir) = &self.dir {
            return Ok(dir.path().to_path_buf());
        }
        let dir = self.policy.allocate(&self.identity)?;
        let path = dir.path().to_path_buf();
        self.dir = Some(dir);
        Ok(path)
    }

    /// Path of the directory, if allocated.
    pub fn path(&self) -> Option<&Path> {
        self.dir.as_ref().map(WorkDir::path)
    }

    pub fn is_devel(&self) -> bool {
        self.policy.is_devel()
    }
}

impl Release for WorkSlot {
    fn release(&mut self) {
        match self.dir.take() {
            Some(WorkDir::Scoped(dir)) => {
                let path = dir.path().to_path_buf();
                match dir.close() {
                    Ok(()) => debug!(path = %path.display(), "removed work dir"),
                    Err(e) => warn!(path = %path.display(), error = %e, "failed to remove work dir"),
                }
            }
            Some(cached @ WorkDir::Cached(_)) => self.dir = Some(cached),
            None => {}
        }
    }
}
