use std::path::PathBuf;

use serde::Deserialize;
use tracing::{info, instrument};

use doctree_shared::{PluginKind, Result};

use crate::fsutil::copy_tree;
use crate::{Release, StageContext, Transformer, WorkSlot};

#[derive(Debug, Clone, Deserialize)]
pub struct LocalParams {
    /// Directory to copy, relative to the declaration.
    #[serde(default = "default_path")]
    pub path: String,
}

fn default_path() -> String {
    ".".into()
}

/// Copies a directory from the local filesystem.
#[derive(Debug)]
pub struct LocalSource {
    path: PathBuf,
    slot: WorkSlot,
}

impl LocalSource {
    pub fn new(params: LocalParams, ctx: &StageContext<'_>, slot: WorkSlot) -> Self {
        Self {
            path: ctx.resolve(&params.path),
            slot,
        }
    }
}

impl Transformer for LocalSource {
    fn kind(&self) -> PluginKind {
        PluginKind::Local
    }

    #[instrument(skip_all, fields(path = %self.path.display()))]
    fn run(&mut self) -> Result<PathBuf> {
        let out = self.slot.acquire()?;
        copy_tree(&self.path, &out, self.slot.is_devel())?;
        info!("copied local directory");
        Ok(out)
    }

    fn release(&mut self) {
        self.slot.release();
    }
}
