use std::path::{Path, PathBuf};
use std::process::Command;

use serde::Deserialize;
use tracing::{debug, info, instrument};

use doctree_shared::{DoctreeError, PluginKind, Result};

use crate::fsutil::{copy_file, dotted_extension, files_under, mtime, set_mtime};
use crate::{Release, Transformer, WorkSlot, tools};

#[derive(Debug, Clone, Deserialize)]
pub struct PandocParams {
    /// Pandoc input format (`html`, `docx`, `rst`, ...).
    pub format: String,
    /// Extensions converted with pandoc; other files are copied as-is.
    #[serde(default)]
    pub file_extensions: Option<Vec<String>>,
}

impl PandocParams {
    /// Configured extensions, dotted and lowercased. `html` covers `.htm`
    /// too; other formats default to `.<format>`.
    pub fn extensions(&self) -> Vec<String> {
        match &self.file_extensions {
            Some(exts) => exts
                .iter()
                .map(|ext| format!(".{}", ext.trim_start_matches('.').to_lowercase()))
                .collect(),
            None if self.format == "html" => vec![".html".into(), ".htm".into()],
            None => vec![format!(".{}", self.format.to_lowercase())],
        }
    }
}

/// Converts matching files to CommonMark with pandoc, mirroring the tree.
#[derive(Debug)]
pub struct PandocConverter {
    format: String,
    extensions: Vec<String>,
    input: PathBuf,
    slot: WorkSlot,
}

impl PandocConverter {
    pub fn new(params: PandocParams, input: PathBuf, slot: WorkSlot) -> Self {
        Self {
            extensions: params.extensions(),
            format: params.format,
            input,
            slot,
        }
    }

    fn convert(&self, src: &Path, dest: &Path) -> Result<()> {
        tools::run(
            Command::new("pandoc")
                .args(["-s", "-f", self.format.as_str(), "-t", "commonmark"])
                .arg(src)
                .arg("-o")
                .arg(dest),
            "pandoc conversion to Markdown",
        )?;
        set_mtime(dest, mtime(src)?)
    }
}

impl Transformer for PandocConverter {
    fn kind(&self) -> PluginKind {
        PluginKind::Pandoc
    }

    #[instrument(skip_all, fields(format = %self.format))]
    fn run(&mut self) -> Result<PathBuf> {
        let out = self.slot.acquire()?;
        info!("converting files to Markdown with pandoc");
        for file in files_under(&self.input)? {
            let rel = file.strip_prefix(&self.input).unwrap_or(&file);
            let target = out.join(rel);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).map_err(|e| DoctreeError::io(parent, e))?;
            }
            if self.extensions.contains(&dotted_extension(&file)) {
                debug!(file = %rel.display(), "converting");
                self.convert(&file, &target.with_extension("md"))?;
            } else {
                copy_file(&file, &target)?;
            }
        }
        Ok(out)
    }

    fn release(&mut self) {
        self.slot.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(yaml: &str) -> PandocParams {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn html_covers_both_extensions() {
        assert_eq!(params("format: html").extensions(), vec![".html", ".htm"]);
    }

    #[test]
    fn other_formats_use_their_name() {
        assert_eq!(params("format: docx").extensions(), vec![".docx"]);
    }

    #[test]
    fn explicit_extensions_are_normalized() {
        let p = params("format: markdown\nfile_extensions: [txt, .MD]");
        assert_eq!(p.extensions(), vec![".txt", ".md"]);
    }

    #[test]
    fn format_is_required() {
        assert!(serde_yaml::from_str::<PandocParams>("file_extensions: [x]").is_err());
    }
}
