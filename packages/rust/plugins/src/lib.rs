//! Pipeline plugins for doctree.
//!
//! Every stage of a declaration is backed by a [`Transformer`]: it produces
//! one output directory per run and owns whatever scratch directories it
//! allocated until [`Transformer::release`] is called. Plugins are looked up
//! through the closed [`registry`].
//!
//! - [`sources`]: acquire content (empty, local, git, googledrive, confluence)
//! - [`converters`]: rewrite a directory (noop, subdir, pandoc, hugoify)
//! - [`builders`]: run documentation builds (sphinx, plantuml)

pub mod builders;
pub mod converters;
pub mod fsutil;
pub mod registry;
pub mod sources;
pub mod tools;
pub mod workdir;

use std::path::{Path, PathBuf};

use doctree_shared::{DoctreeError, EngineConfig, PluginKind, Result};

pub use registry::{instantiate, required_tools, validate_params};
pub use tools::{Tool, ensure_tools};
pub use workdir::{WorkDir, WorkDirPolicy, WorkSlot};

// ---------------------------------------------------------------------------
// Plugin contract
// ---------------------------------------------------------------------------

/// One pipeline stage.
pub trait Transformer {
    fn kind(&self) -> PluginKind;

    /// Produce this stage's output directory.
    fn run(&mut self) -> Result<PathBuf>;

    /// Free every scratch directory this stage allocated. Must be safe to
    /// call more than once, and after a failed `run`.
    fn release(&mut self);
}

/// Anything that owns disposable resources. Implemented by transformers and
/// by bare work slots so both can be handed to the same cleanup registry.
pub trait Release {
    fn release(&mut self);
}

impl Release for Box<dyn Transformer> {
    fn release(&mut self) {
        Transformer::release(self.as_mut());
    }
}

/// What a plugin sees of the pipeline it runs in.
#[derive(Debug, Clone, Copy)]
pub struct StageContext<'a> {
    /// Output directory of the previous stage. `None` for the first stage.
    pub input: Option<&'a Path>,
    /// Directory holding the declaration file; relative paths resolve here.
    pub base_dir: &'a Path,
    pub config: &'a EngineConfig,
}

impl StageContext<'_> {
    /// Previous stage output, required by every non-source plugin.
    pub(crate) fn require_input(&self, kind: PluginKind) -> Result<PathBuf> {
        self.input
            .map(Path::to_path_buf)
            .ok_or_else(|| DoctreeError::config(format!("{kind} needs the output of a previous stage")))
    }

    /// Resolve a declaration-relative path.
    pub(crate) fn resolve(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }
}

/// Accept `page_id: 12345` as well as `page_id: '12345'`.
pub(crate) fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(serde::Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Int(i64),
        Uint(u64),
    }
    Ok(match <Id as serde::Deserialize>::deserialize(deserializer)? {
        Id::Text(text) => text,
        Id::Int(n) => n.to_string(),
        Id::Uint(n) => n.to_string(),
    })
}
