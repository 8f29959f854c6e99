//! Plugin vocabulary shared by the loader, the registry and the runner.

use std::path::Path;

use sha2::{Digest, Sha256};

// ---------------------------------------------------------------------------
// PluginKind
// ---------------------------------------------------------------------------

/// What a plugin does in a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginRole {
    /// Acquires content; never consumes a previous stage's output.
    Source,
    /// Transforms one directory into another.
    Converter,
    /// Runs a documentation or diagram build over its input.
    Builder,
}

/// Every stage kind a declaration may name. The set is closed: adding a
/// plugin means adding a variant here and an arm in the plugin registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PluginKind {
    Sphinx,
    PlantUml,
    Pandoc,
    Hugoify,
    Subdir,
    Noop,
    Local,
    Git,
    GitHub,
    GoogleDrive,
    Confluence,
    Empty,
}

impl PluginKind {
    /// All kinds, in registry order.
    pub const ALL: [PluginKind; 12] = [
        Self::Sphinx,
        Self::PlantUml,
        Self::Pandoc,
        Self::Hugoify,
        Self::Subdir,
        Self::Noop,
        Self::Local,
        Self::Git,
        Self::GitHub,
        Self::GoogleDrive,
        Self::Confluence,
        Self::Empty,
    ];

    /// Key used for this kind in `doctree.yml`.
    pub fn key(self) -> &'static str {
        match self {
            Self::Sphinx => "sphinx",
            Self::PlantUml => "plantuml",
            Self::Pandoc => "pandoc",
            Self::Hugoify => "hugoify",
            Self::Subdir => "subdir",
            Self::Noop => "noop",
            Self::Local => "local",
            Self::Git => "git",
            Self::GitHub => "github",
            Self::GoogleDrive => "googledrive",
            Self::Confluence => "confluence",
            Self::Empty => "empty",
        }
    }

    /// Look a declaration key up in the registry vocabulary.
    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.key() == key)
    }

    pub fn role(self) -> PluginRole {
        match self {
            Self::Sphinx | Self::PlantUml => PluginRole::Builder,
            Self::Pandoc | Self::Hugoify | Self::Subdir | Self::Noop => PluginRole::Converter,
            Self::Local | Self::Git | Self::GitHub | Self::GoogleDrive | Self::Confluence
            | Self::Empty => PluginRole::Source,
        }
    }
}

impl std::fmt::Display for PluginKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

// ---------------------------------------------------------------------------
// Stage identity
// ---------------------------------------------------------------------------

/// Stable identity of a stage, used to name its development-mode cache
/// directory. The same kind, parameters and input always map to the same
/// identity across runs.
pub fn stage_identity(kind: PluginKind, params: &serde_yaml::Value, input: Option<&Path>) -> String {
    let params = serde_yaml::to_string(params).unwrap_or_default();
    let input = input.map(|path| path.to_string_lossy().into_owned()).unwrap_or_default();
    scoped_identity(kind.key(), &[params.as_str(), input.as_str()])
}

/// `<prefix>--<16 hex digits>` digest of `parts`.
pub fn scoped_identity(prefix: &str, parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prefix.as_bytes());
    for part in parts {
        hasher.update([0u8]);
        hasher.update(part.as_bytes());
    }
    let digest = format!("{:x}", hasher.finalize());
    format!("{prefix}--{}", &digest[..16])
}
