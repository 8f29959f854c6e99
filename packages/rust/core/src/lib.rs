//! Pipeline engine for doctree.
//!
//! Loads per-directory declarations, runs their stages in order, turns stage
//! failures into error pages, and drives whole-tree assembly and staged
//! builds.

pub mod build;
pub mod capture;
pub mod declaration;
pub mod janitor;
pub mod runner;
pub mod walker;

pub use build::{BuildOptions, BuildReport, ExportOutcome, SourceLocation, build, export, init};
pub use capture::ErrorReport;
pub use declaration::{PipelineSpec, Stage, load_spec, parse_spec};
pub use janitor::Janitor;
pub use runner::{Pipeline, RunOutcome};
pub use walker::{
    AssembleOptions, AssembleReport, ProgressReporter, SilentProgress, assemble, find_declarations,
};

#[cfg(test)]
pub(crate) mod testutil {
    use std::fs;
    use std::path::Path;

    use doctree_shared::{AppConfig, EngineConfig};
    use walkdir::WalkDir;

    /// Engine config whose caches live under `root`.
    pub fn engine_config(root: &Path, devel: bool) -> EngineConfig {
        let mut app = AppConfig::default();
        app.engine.cache_dir = Some(root.join("cache").to_string_lossy().into_owned());
        app.engine.check_dependencies = false;
        EngineConfig::from_app(&app, &root.join("config")).with_devel(devel)
    }

    pub fn write_file(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    /// Every file under `root` as `(relative path, contents)`, sorted.
    pub fn tree_listing(root: &Path) -> Vec<(String, String)> {
        if !root.exists() {
            return Vec::new();
        }
        WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .map(Result::unwrap)
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| {
                let rel = entry.path().strip_prefix(root).unwrap();
                let rel = rel.components().map(|c| c.as_os_str().to_string_lossy()).collect::<Vec<_>>().join("/");
                (rel, fs::read_to_string(entry.path()).unwrap())
            })
            .collect()
    }
}
