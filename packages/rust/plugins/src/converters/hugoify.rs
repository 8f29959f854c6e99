use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{info, instrument, warn};

use doctree_markdown::{FrontMatter, extract_title, render_page};
use doctree_shared::{DoctreeError, PluginKind, Result};

use crate::fsutil::{copy_file, files_under, mtime, set_mtime};
use crate::{Release, Transformer, WorkSlot};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HugoifyParams {
    /// Weight given to section index pages.
    pub weight: i64,
    /// Write a section `_index.md` if the tree has none.
    pub add_index: bool,
    pub index_title: Option<String>,
    /// Title pages by file name instead of their first heading.
    pub filename_as_title: bool,
}

/// Rewrites a Markdown tree for Hugo: `index.md` becomes `_index.md` and
/// every page gets front matter with a title and date.
#[derive(Debug)]
pub struct HugoifyConverter {
    params: HugoifyParams,
    input: PathBuf,
    slot: WorkSlot,
}

impl HugoifyConverter {
    pub fn new(params: HugoifyParams, input: PathBuf, slot: WorkSlot) -> Self {
        Self { params, input, slot }
    }

    /// Convert one page; returns its modification time.
    fn convert_page(&self, src: &Path, dest_dir: &Path) -> Result<SystemTime> {
        let stem = src
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let is_index = stem == "index";
        let dest = dest_dir.join(if is_index { "_index.md".to_string() } else { format!("{stem}.md") });

        let content = fs::read_to_string(src).map_err(|e| DoctreeError::io(src, e))?;
        let modified = mtime(src)?;
        let (title, body) = extract_title(&stem, &content, self.params.filename_as_title);
        let front = FrontMatter {
            title: Some(title),
            date: DateTime::<Utc>::from(modified),
            weight: is_index.then_some(self.params.weight),
        };
        fs::write(&dest, render_page(&front, &body)?).map_err(|e| DoctreeError::io(&dest, e))?;
        set_mtime(&dest, modified)?;
        Ok(modified)
    }

    fn write_section_index(&self, out: &Path, date: SystemTime) -> Result<()> {
        let path = out.join("_index.md");
        if path.exists() {
            warn!("asked to add a section index, but _index.md already exists");
            return Ok(());
        }
        let front = FrontMatter {
            title: self.params.index_title.clone(),
            date: DateTime::<Utc>::from(date),
            weight: Some(self.params.weight),
        };
        fs::write(&path, render_page(&front, "")?).map_err(|e| DoctreeError::io(&path, e))?;
        set_mtime(&path, date)
    }
}

impl Transformer for HugoifyConverter {
    fn kind(&self) -> PluginKind {
        PluginKind::Hugoify
    }

    #[instrument(skip_all, fields(input = %self.input.display()))]
    fn run(&mut self) -> Result<PathBuf> {
        let out = self.slot.acquire()?;
        let mut latest = UNIX_EPOCH;
        for file in files_under(&self.input)? {
            let rel = file.strip_prefix(&self.input).unwrap_or(&file);
            let target = out.join(rel);
            let dest_dir = target.parent().unwrap_or(out.as_path());
            fs::create_dir_all(dest_dir).map_err(|e| DoctreeError::io(dest_dir, e))?;
            if file.extension().is_some_and(|ext| ext == "md") {
                latest = latest.max(self.convert_page(&file, dest_dir)?);
            } else {
                copy_file(&file, &target)?;
            }
        }
        if self.params.add_index {
            self.write_section_index(&out, latest)?;
        }
        info!("hugoified tree");
        Ok(out)
    }

    fn release(&mut self) {
        self.slot.release();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::WorkDirPolicy;
    use crate::testutil::engine_config;

    fn stage(root: &Path, input: &Path, yaml: &str) -> HugoifyConverter {
        let params: HugoifyParams = serde_yaml::from_str(yaml).unwrap();
        let slot = WorkSlot::new(WorkDirPolicy::from_config(&engine_config(root, false)), "hugoify--x");
        HugoifyConverter::new(params, input.to_path_buf(), slot)
    }

    #[test]
    fn rewrites_pages_with_front_matter() {
        let root = tempfile::tempdir().unwrap();
        let input = root.path().join("in");
        fs::create_dir_all(input.join("guide")).unwrap();
        fs::write(input.join("index.md"), "# Handbook\nWelcome\n").unwrap();
        fs::write(input.join("guide/setup.md"), "Setup\n=====\nSteps\n").unwrap();
        fs::write(input.join("guide/diagram.png"), [0u8, 1, 2]).unwrap();
        let stamp = UNIX_EPOCH + Duration::from_secs(1_600_000_000);
        set_mtime(&input.join("guide/setup.md"), stamp).unwrap();

        let mut hugo = stage(root.path(), &input, "weight: 5");
        let out = hugo.run().unwrap();

        let index = fs::read_to_string(out.join("_index.md")).unwrap();
        assert!(index.starts_with("---\ntitle: Handbook\n"));
        assert!(index.contains("weight: 5"));
        assert!(index.ends_with("---\nWelcome\n"));
        assert!(!out.join("index.md").exists());

        let setup = fs::read_to_string(out.join("guide/setup.md")).unwrap();
        assert!(setup.contains("title: Setup"));
        assert!(setup.contains("2020-09-13T12:26:40Z"));
        assert!(!setup.contains("weight"));
        assert_eq!(mtime(&out.join("guide/setup.md")).unwrap(), stamp);

        assert_eq!(fs::read(out.join("guide/diagram.png")).unwrap(), vec![0u8, 1, 2]);
    }

    #[test]
    fn adds_section_index_when_missing() {
        let root = tempfile::tempdir().unwrap();
        let input = root.path().join("in");
        fs::create_dir_all(&input).unwrap();
        fs::write(input.join("page.md"), "# Page\n").unwrap();

        let mut hugo = stage(root.path(), &input, "add_index: true\nindex_title: Reference\nweight: 3");
        let out = hugo.run().unwrap();
        let index = fs::read_to_string(out.join("_index.md")).unwrap();
        assert!(index.contains("title: Reference"));
        assert!(index.contains("weight: 3"));
    }

    #[test]
    fn existing_index_is_not_replaced() {
        let root = tempfile::tempdir().unwrap();
        let input = root.path().join("in");
        fs::create_dir_all(&input).unwrap();
        fs::write(input.join("_index.md"), "# Original\n").unwrap();

        let mut hugo = stage(root.path(), &input, "add_index: true\nindex_title: Replacement");
        let out = hugo.run().unwrap();
        let index = fs::read_to_string(out.join("_index.md")).unwrap();
        assert!(index.contains("title: Original"));
        assert!(!index.contains("Replacement"));
    }

    #[test]
    fn params_default_when_empty() {
        let params: HugoifyParams = serde_yaml::from_str("{}").unwrap();
        assert_eq!(params.weight, 0);
        assert!(!params.add_index && !params.filename_as_title);
    }
}
