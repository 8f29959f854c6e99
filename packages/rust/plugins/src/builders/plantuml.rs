use std::fs;
use std::path::PathBuf;
use std::process::Command;

use serde::Deserialize;
use tracing::{info, instrument};

use doctree_shared::{DoctreeError, PluginKind, Result};

use crate::fsutil::{copy_tree, dotted_extension, files_under};
use crate::{Release, Transformer, WorkSlot, tools};

const DIAGRAM_EXTENSIONS: [&str; 2] = [".plantuml", ".puml"];

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PlantUmlParams {
    /// Extra arguments passed to every `plantuml` invocation (`-tsvg`, ...).
    pub cmdline_args: Vec<String>,
    /// Keep diagram sources next to the rendered images.
    pub keep_puml: bool,
}

/// Renders every PlantUML diagram in the tree next to its source.
#[derive(Debug)]
pub struct PlantUmlBuilder {
    params: PlantUmlParams,
    input: PathBuf,
    slot: WorkSlot,
}

impl PlantUmlBuilder {
    pub fn new(params: PlantUmlParams, input: PathBuf, slot: WorkSlot) -> Self {
        Self { params, input, slot }
    }
}

impl Transformer for PlantUmlBuilder {
    fn kind(&self) -> PluginKind {
        PluginKind::PlantUml
    }

    #[instrument(skip_all, fields(input = %self.input.display()))]
    fn run(&mut self) -> Result<PathBuf> {
        let out = self.slot.acquire()?;
        copy_tree(&self.input, &out, self.slot.is_devel())?;

        for diagram in diagrams(&out)? {
            info!(path = %diagram.display(), "rendering diagram");
            let dir = diagram.parent().unwrap_or(out.as_path());
            tools::run(
                Command::new("plantuml")
                    .args(&self.params.cmdline_args)
                    .arg("-o")
                    .arg(dir)
                    .arg(&diagram),
                "plantuml",
            )?;
            if !self.params.keep_puml {
                fs::remove_file(&diagram).map_err(|e| DoctreeError::io(&diagram, e))?;
            }
        }
        info!("plantuml scan complete");
        Ok(out)
    }

    fn release(&mut self) {
        self.slot.release();
    }
}

fn diagrams(root: &std::path::Path) -> Result<Vec<PathBuf>> {
    Ok(files_under(root)?
        .into_iter()
        .filter(|path| DIAGRAM_EXTENSIONS.contains(&dotted_extension(path).as_str()))
        .collect())
}
