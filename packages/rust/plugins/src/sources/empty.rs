use std::path::PathBuf;

use tracing::info;

use doctree_shared::{PluginKind, Result};

use crate::{Release, Transformer, WorkSlot};

/// Produces an empty directory.
#[derive(Debug)]
pub struct EmptySource {
    slot: WorkSlot,
}

impl EmptySource {
    pub fn new(slot: WorkSlot) -> Self {
        Self { slot }
    }
}

impl Transformer for EmptySource {
    fn kind(&self) -> PluginKind {
        PluginKind::Empty
    }

    fn run(&mut self) -> Result<PathBuf> {
        let out = self.slot.acquire()?;
        info!(out = %out.display(), "created empty source");
        Ok(out)
    }

    fn release(&mut self) {
        self.slot.release();
    }
}
