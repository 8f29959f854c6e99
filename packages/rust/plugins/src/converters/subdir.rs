use std::path::PathBuf;

use serde::Deserialize;
use tracing::{info, instrument};

use doctree_shared::{PluginKind, Result};

use crate::fsutil::copy_tree;
use crate::{Release, Transformer, WorkSlot};

#[derive(Debug, Clone, Deserialize)]
pub struct SubdirParams {
    /// Path inside the previous stage's output.
    #[serde(default = "default_path")]
    pub path: String,
}

fn default_path() -> String {
    ".".into()
}

/// Narrows the previous output to one of its subdirectories.
#[derive(Debug)]
pub struct SubdirConverter {
    source: PathBuf,
    slot: WorkSlot,
}

impl SubdirConverter {
    pub fn new(params: SubdirParams, input: PathBuf, slot: WorkSlot) -> Self {
        Self {
            source: input.join(params.path),
            slot,
        }
    }
}

impl Transformer for SubdirConverter {
    fn kind(&self) -> PluginKind {
        PluginKind::Subdir
    }

    #[instrument(skip_all, fields(source = %self.source.display()))]
    fn run(&mut self) -> Result<PathBuf> {
        let out = self.slot.acquire()?;
        copy_tree(&self.source, &out, self.slot.is_devel())?;
        info!("extracted subdirectory");
        Ok(out)
    }

    fn release(&mut self) {
        self.slot.release();
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::WorkDirPolicy;
    use crate::testutil::engine_config;

    #[test]
    fn copies_only_the_subdirectory() {
        let root = tempfile::tempdir().unwrap();
        let input = root.path().join("input");
        fs::create_dir_all(input.join("docs/guide")).unwrap();
        fs::write(input.join("README.md"), "top").unwrap();
        fs::write(input.join("docs/guide/a.md"), "a").unwrap();
        let config = engine_config(root.path(), false);
        let params: SubdirParams = serde_yaml::from_str("path: docs").unwrap();
        let slot = WorkSlot::new(WorkDirPolicy::from_config(&config), "subdir--x");

        let mut stage = SubdirConverter::new(params, input, slot);
        let out = stage.run().unwrap();
        assert!(out.join("guide/a.md").exists());
        assert!(!out.join("README.md").exists());
    }

    #[test]
    fn missing_subdirectory_fails() {
        let root = tempfile::tempdir().unwrap();
        let config = engine_config(root.path(), false);
        let params = SubdirParams { path: "nope".into() };
        let slot = WorkSlot::new(WorkDirPolicy::from_config(&config), "subdir--y");

        let mut stage = SubdirConverter::new(params, root.path().to_path_buf(), slot);
        assert!(stage.run().is_err());
    }
}
