//! Pipeline runner: executes one declaration's stages in order, threading
//! each stage's output directory into the next, and merges the result into
//! the declaration's directory.

use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use tracing::{error, info, instrument};

use doctree_plugins::fsutil::copy_tree;
use doctree_plugins::{StageContext, Transformer, instantiate};
use doctree_shared::{DoctreeError, EngineConfig, Result};

use crate::capture::{self, ErrorReport};
use crate::declaration::{PipelineSpec, load_spec};
use crate::janitor::Janitor;

/// What a run produced.
#[derive(Debug, Default)]
pub struct RunOutcome {
    /// Last stage output, or the error page directory on failure. `None`
    /// when the pipeline had nothing to run.
    pub terminal: Option<PathBuf>,
    /// Whether `terminal` was copied into the declaration directory.
    pub merged: bool,
    pub failure: Option<ErrorReport>,
}

/// A loaded declaration, ready to run.
#[derive(Debug)]
pub struct Pipeline<'a> {
    declaration: PathBuf,
    target_dir: PathBuf,
    spec: PipelineSpec,
    config: &'a EngineConfig,
}

impl<'a> Pipeline<'a> {
    /// Load and validate the declaration at `path`, and check that the
    /// configured error template renders. Configuration errors surface
    /// here; nothing runs.
    pub fn load(path: &Path, config: &'a EngineConfig) -> Result<Self> {
        let spec = load_spec(path, config)?;
        if spec.enabled {
            capture::check_template(config)?;
        }
        Ok(Self::from_spec(path, spec, config))
    }

    pub fn from_spec(path: &Path, spec: PipelineSpec, config: &'a EngineConfig) -> Self {
        let target_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            declaration: path.to_path_buf(),
            target_dir,
            spec,
            config,
        }
    }

    pub fn spec(&self) -> &PipelineSpec {
        &self.spec
    }

    /// Directory holding the declaration; the merge target.
    pub fn target_dir(&self) -> &Path {
        &self.target_dir
    }

    /// Run every stage. A stage failure stops the pipeline and substitutes
    /// an error page for its output; only configuration and filesystem
    /// errors are returned as `Err`. With `merge`, the terminal directory
    /// is copied into the declaration directory, overwriting files.
    #[instrument(skip_all, fields(declaration = %self.declaration.display()))]
    pub fn run(&self, merge: bool, janitor: &mut Janitor) -> Result<RunOutcome> {
        let Some(first) = self.spec.stages.first() else {
            info!(enabled = self.spec.enabled, "nothing to run");
            return Ok(RunOutcome::default());
        };

        let mut carry: Option<PathBuf> = None;
        let mut failure = None;

        for (index, stage) in self.spec.stages.iter().enumerate() {
            let ctx = StageContext {
                input: carry.as_deref(),
                base_dir: &self.target_dir,
                config: self.config,
            };
            let mut plugin = instantiate(stage.kind, &stage.params, &ctx)?;
            info!(index, kind = %stage.kind, "running stage");
            let result = run_guarded(plugin.as_mut());
            if !self.config.devel {
                janitor.hold(plugin);
            }

            match result {
                Ok(output) => carry = Some(output),
                Err(stacktrace) => {
                    error!(index, kind = %stage.kind, "stage failed:\n{stacktrace}");
                    let report = ErrorReport {
                        failing_index: index,
                        failing_kind: stage.kind,
                        failing_params: stage.params.clone(),
                        first_kind: first.kind,
                        first_params: first.params.clone(),
                        stacktrace,
                    };
                    carry = Some(capture::capture_failure(&report, &self.target_dir, self.config, janitor)?);
                    failure = Some(report);
                    break;
                }
            }
        }

        let mut merged = false;
        if merge {
            if let Some(terminal) = &carry {
                copy_tree(terminal, &self.target_dir, true)?;
                merged = true;
                info!(target = %self.target_dir.display(), "merged pipeline output");
            }
        }

        Ok(RunOutcome {
            terminal: carry,
            merged,
            failure,
        })
    }
}

/// Run a stage, turning both errors and panics into a failure trace.
fn run_guarded(plugin: &mut dyn Transformer) -> std::result::Result<PathBuf, String> {
    capture::prepare_panic_capture();
    match panic::catch_unwind(AssertUnwindSafe(|| plugin.run())) {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(err)) => Err(capture::error_trace(&err)),
        Err(payload) => Err(capture::panic_trace(payload.as_ref())),
    }
}

impl RunOutcome {
    pub fn is_failure(&self) -> bool {
        self.failure.is_some()
    }

    /// Error for callers that treat a captured stage failure as fatal.
    pub fn into_result(self) -> Result<Self> {
        match &self.failure {
            Some(report) => Err(DoctreeError::stage(format!(
                "stage {} ({}) failed",
                report.failing_index, report.failing_kind
            ))),
            None => Ok(self),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::testutil::{engine_config, tree_listing, write_file};
    use doctree_shared::PluginKind;

    fn declare(dir: &Path, yaml: &str) -> PathBuf {
        fs::create_dir_all(dir).unwrap();
        let path = dir.join("doctree.yml");
        fs::write(&path, yaml).unwrap();
        path
    }

    #[test]
    fn disabled_declaration_does_nothing() {
        let root = tempfile::tempdir().unwrap();
        let config = engine_config(root.path(), false);
        let decl = declare(&root.path().join("site"), "enabled: false\npipeline:\n- empty: {}\n");
        let before = tree_listing(&root.path().join("site"));
        let mut janitor = Janitor::new();

        let outcome = Pipeline::load(&decl, &config).unwrap().run(true, &mut janitor).unwrap();

        assert!(outcome.terminal.is_none());
        assert!(!outcome.merged);
        assert!(janitor.is_empty());
        assert_eq!(tree_listing(&root.path().join("site")), before);
    }

    #[test]
    fn empty_then_noop_produces_no_files() {
        let root = tempfile::tempdir().unwrap();
        let config = engine_config(root.path(), false);
        let site = root.path().join("site");
        let decl = declare(&site, "pipeline:\n- empty: {}\n- noop: {}\n");
        let mut janitor = Janitor::new();

        let outcome = Pipeline::load(&decl, &config).unwrap().run(false, &mut janitor).unwrap();

        let terminal = outcome.terminal.unwrap();
        assert!(tree_listing(&terminal).is_empty());
        assert!(outcome.failure.is_none());
        assert_eq!(tree_listing(&site), vec![("doctree.yml".to_string(), "pipeline:\n- empty: {}\n- noop: {}\n".to_string())]);
    }

    #[test]
    fn successful_merge_matches_last_stage_output() {
        let root = tempfile::tempdir().unwrap();
        let config = engine_config(root.path(), false);
        let upstream = root.path().join("upstream");
        write_file(&upstream.join("docs/guide/a.md"), "# A\n");
        write_file(&upstream.join("docs/b.md"), "# B\n");
        write_file(&upstream.join("README.md"), "not docs");
        let site = root.path().join("site");
        let decl = declare(
            &site,
            &format!("pipeline:\n- local:\n    path: {}\n- subdir:\n    path: docs\n", upstream.display()),
        );
        let mut janitor = Janitor::new();

        let outcome = Pipeline::load(&decl, &config).unwrap().run(true, &mut janitor).unwrap();
        assert!(outcome.merged);

        let terminal = outcome.terminal.unwrap();
        let mut merged = tree_listing(&site);
        merged.retain(|(path, _)| path != "doctree.yml");
        assert_eq!(merged, tree_listing(&terminal));
        assert_eq!(
            merged.iter().map(|(p, _)| p.as_str()).collect::<Vec<_>>(),
            vec!["b.md", "guide/a.md"]
        );

        assert_eq!(janitor.len(), 2);
        janitor.release_all();
        assert!(!terminal.exists());
        assert!(site.join("guide/a.md").exists());
    }

    #[test]
    fn each_stage_consumes_the_previous_output() {
        let root = tempfile::tempdir().unwrap();
        let config = engine_config(root.path(), false);
        write_file(&root.path().join("site/content/a/b/page.md"), "x");
        let decl = declare(
            &root.path().join("site"),
            "pipeline:\n- local:\n    path: content\n- subdir:\n    path: a\n- subdir:\n    path: b\n",
        );
        let mut janitor = Janitor::new();
        let outcome = Pipeline::load(&decl, &config).unwrap().run(false, &mut janitor).unwrap();
        assert_eq!(tree_listing(&outcome.terminal.unwrap()), vec![("page.md".into(), "x".into())]);

        // Swapping the subdir stages changes what each one sees.
        let decl = declare(
            &root.path().join("site"),
            "pipeline:\n- local:\n    path: content\n- subdir:\n    path: b\n- subdir:\n    path: a\n",
        );
        let outcome = Pipeline::load(&decl, &config).unwrap().run(false, &mut janitor).unwrap();
        let report = outcome.failure.expect("b does not exist at the top level");
        assert_eq!(report.failing_index, 1);
    }

    #[test]
    fn failing_stage_becomes_one_error_page() {
        let root = tempfile::tempdir().unwrap();
        let config = engine_config(root.path(), false);
        let site = root.path().join("site");
        let decl = declare(&site, "pipeline:\n- empty: {}\n- subdir:\n    path: missing\n- noop: {}\n");
        let mut janitor = Janitor::new();

        let outcome = Pipeline::load(&decl, &config).unwrap().run(true, &mut janitor).unwrap();

        let report = outcome.failure.as_ref().unwrap();
        assert_eq!(report.failing_kind, PluginKind::Subdir);
        assert_eq!(report.first_kind, PluginKind::Empty);
        assert!(!report.stacktrace.is_empty());
        assert!(outcome.merged);

        let listing = tree_listing(&site);
        let pages: Vec<_> = listing.iter().filter(|(p, _)| p != "doctree.yml").collect();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].0, "_index.md");
        assert!(pages[0].1.contains("subdir:\n  path: missing"));
        assert!(pages[0].1.contains("The `subdir` stage failed"));
    }

    #[test]
    fn failing_first_stage_is_captured_too() {
        let root = tempfile::tempdir().unwrap();
        let config = engine_config(root.path(), false);
        let decl = declare(&root.path().join("site"), "pipeline:\n- local:\n    path: nowhere\n");
        let mut janitor = Janitor::new();

        let outcome = Pipeline::load(&decl, &config).unwrap().run(false, &mut janitor).unwrap();
        assert!(outcome.is_failure());
        assert!(outcome.into_result().is_err());
    }

    #[test]
    fn unknown_stage_never_runs() {
        let root = tempfile::tempdir().unwrap();
        let config = engine_config(root.path(), false);
        let site = root.path().join("site");
        let decl = declare(&site, "pipeline:\n- empty: {}\n- frobnicate: {}\n");

        let err = Pipeline::load(&decl, &config).unwrap_err();
        assert!(matches!(err, DoctreeError::UnknownStage { index: 1, .. }));
        assert_eq!(tree_listing(&site).len(), 1);
    }

    #[test]
    fn bad_error_template_fails_at_load() {
        let root = tempfile::tempdir().unwrap();
        let mut config = engine_config(root.path(), false);
        config.error_template = root.path().join("nonexistent/error.md").to_string_lossy().into_owned();
        let site = root.path().join("site");
        let decl = declare(&site, "pipeline:\n- empty: {}\n- subdir:\n    path: missing\n");

        let err = Pipeline::load(&decl, &config).unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("error template"));
        assert_eq!(tree_listing(&site).len(), 1);
    }

    #[test]
    fn devel_mode_keeps_stage_caches() {
        let root = tempfile::tempdir().unwrap();
        let config = engine_config(root.path(), true);
        write_file(&root.path().join("site/content/a.md"), "a");
        let decl = declare(&root.path().join("site"), "pipeline:\n- local:\n    path: content\n");
        let mut janitor = Janitor::new();

        let first = Pipeline::load(&decl, &config).unwrap().run(true, &mut janitor).unwrap();
        assert!(janitor.is_empty());
        let cache = first.terminal.unwrap();
        assert!(cache.starts_with(root.path().join("cache")));

        let second = Pipeline::load(&decl, &config).unwrap().run(true, &mut janitor).unwrap();
        assert_eq!(second.terminal.unwrap(), cache);
        assert!(cache.join("a.md").exists());
    }

    #[test]
    fn panicking_stage_is_captured() {
        struct Panicky;
        impl Transformer for Panicky {
            fn kind(&self) -> PluginKind {
                PluginKind::Noop
            }
            fn run(&mut self) -> Result<PathBuf> {
                explode_in_converter()
            }
            fn release(&mut self) {}
        }

        #[inline(never)]
        fn explode_in_converter() -> ! {
            panic!("converter exploded")
        }

        let trace = run_guarded(&mut Panicky).unwrap_err();
        assert!(trace.starts_with("stage panicked: converter exploded"));
        // With RUST_BACKTRACE set, frames come from the panic site.
        if let Some((_, frames)) = trace.split_once("Stack backtrace:") {
            assert!(frames.contains("explode_in_converter"));
            assert!(!frames.contains("panic_trace"));
        }
    }
}
