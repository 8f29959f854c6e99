//! Error capture: turns a failed stage into a rendered diagnostic page that
//! is merged in place of the pipeline's normal output.

use std::any::Any;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::borrow::Cow;
use std::cell::RefCell;
use std::error::Error;
use std::fmt::Write as _;
use std::fs;
use std::panic;
use std::path::Path;
use std::sync::Once;

use serde::Serialize;
use serde_yaml::{Mapping, Value};
use tera::{Context, Tera};
use tracing::{info, instrument};

use doctree_plugins::{WorkDirPolicy, WorkSlot};
use doctree_shared::{DoctreeError, EngineConfig, PluginKind, Result, scoped_identity};

use crate::janitor::Janitor;

/// Templates shipped with the engine, addressed by relative name.
const BUNDLED_TEMPLATES: [(&str, &str); 2] = [
    ("error_templates/hugo.md", include_str!("../error_templates/hugo.md")),
    ("error_templates/plain.md", include_str!("../error_templates/plain.md")),
];

/// Provenance of a stage failure.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub failing_index: usize,
    pub failing_kind: PluginKind,
    pub failing_params: Value,
    /// The pipeline's source stage.
    pub first_kind: PluginKind,
    pub first_params: Value,
    pub stacktrace: String,
}

#[derive(Serialize)]
struct TemplateContext<'a> {
    dirname: &'a str,
    plugin_info: String,
    source_info: String,
    stacktrace: &'a str,
    failing_kind: &'a str,
    first_kind: &'a str,
}

/// Render the diagnostic page for `report` into a fresh directory and
/// return that directory. Outside development mode the directory is handed
/// to the janitor.
#[instrument(skip_all, fields(dir = %target_dir.display(), kind = %report.failing_kind))]
pub fn capture_failure(
    report: &ErrorReport,
    target_dir: &Path,
    config: &EngineConfig,
    janitor: &mut Janitor,
) -> Result<std::path::PathBuf> {
    let template = template_source(&config.error_template)?;
    let dirname = dir_name(target_dir);
    let page = render_report(report, &dirname, &template)?;

    let identity = scoped_identity("error", &[&*target_dir.to_string_lossy()]);
    let mut slot = WorkSlot::new(WorkDirPolicy::from_config(config), identity);
    let dir = slot.acquire()?;
    let path = dir.join(&config.error_result_filename);
    let written = fs::write(&path, page).map_err(|e| DoctreeError::io(&path, e));
    if !config.devel {
        janitor.hold(slot);
    }
    written?;

    info!(page = %path.display(), "wrote error page");
    Ok(dir)
}

/// Fail with a configuration error unless the configured error template
/// can be found and rendered.
pub fn check_template(config: &EngineConfig) -> Result<()> {
    let name = &config.error_template;
    let template = template_source(name)
        .map_err(|e| DoctreeError::config(format!("error template {name}: {e}")))?;
    let sample = ErrorReport {
        failing_index: 0,
        failing_kind: PluginKind::Empty,
        failing_params: Value::Mapping(Mapping::new()),
        first_kind: PluginKind::Empty,
        first_params: Value::Mapping(Mapping::new()),
        stacktrace: String::new(),
    };
    render_report(&sample, "docs", &template)
        .map(drop)
        .map_err(|e| DoctreeError::config(format!("error template {name}: {e}")))
}

/// Last component of `dir`, resolving `.` and `..` against the filesystem.
fn dir_name(dir: &Path) -> String {
    fs::canonicalize(dir)
        .ok()
        .as_deref()
        .and_then(Path::file_name)
        .or_else(|| dir.file_name())
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Template text for a configured name: absolute paths are read from disk,
/// anything else must name a bundled template.
pub fn template_source(name: &str) -> Result<Cow<'static, str>> {
    let path = Path::new(name);
    if path.is_absolute() {
        return fs::read_to_string(path)
            .map(Cow::Owned)
            .map_err(|e| DoctreeError::io(path, e));
    }
    let wanted = name.trim_start_matches("./");
    BUNDLED_TEMPLATES
        .iter()
        .find(|(bundled, _)| {
            *bundled == wanted || bundled.strip_prefix("error_templates/") == Some(wanted)
        })
        .map(|(_, source)| Cow::Borrowed(*source))
        .ok_or_else(|| DoctreeError::Template(format!("no bundled error template named {name}")))
}

/// Render `template` with the report's fields.
pub fn render_report(report: &ErrorReport, dirname: &str, template: &str) -> Result<String> {
    let context = TemplateContext {
        dirname,
        plugin_info: stage_dump(report.failing_kind, &report.failing_params)?,
        source_info: stage_dump(report.first_kind, &report.first_params)?,
        stacktrace: &report.stacktrace,
        failing_kind: report.failing_kind.key(),
        first_kind: report.first_kind.key(),
    };
    let context = Context::from_serialize(&context).map_err(|e| DoctreeError::Template(chain(&e)))?;
    Tera::one_off(template, &context, false).map_err(|e| DoctreeError::Template(chain(&e)))
}

/// `{kind: params}` as YAML, the way the stage was declared.
fn stage_dump(kind: PluginKind, params: &Value) -> Result<String> {
    let mut stage = Mapping::new();
    stage.insert(Value::from(kind.key()), params.clone());
    serde_yaml::to_string(&stage).map_err(|e| DoctreeError::Template(format!("stage dump failed: {e}")))
}

// ---------------------------------------------------------------------------
// Failure traces
// ---------------------------------------------------------------------------

thread_local! {
    static PANIC_BACKTRACE: RefCell<Option<Backtrace>> = const { RefCell::new(None) };
}

/// Install (once) a panic hook that records the backtrace at the panic site
/// for [`panic_trace`], then defers to the previous hook. Forgets any
/// backtrace left over from an earlier panic on this thread.
pub(crate) fn prepare_panic_capture() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            let backtrace = Backtrace::capture();
            if backtrace.status() == BacktraceStatus::Captured {
                PANIC_BACKTRACE.with(|slot| *slot.borrow_mut() = Some(backtrace));
            }
            previous(info);
        }));
    });
    PANIC_BACKTRACE.with(|slot| slot.borrow_mut().take());
}

/// Trace text for a stage that returned an error: its display and cause chain.
pub fn error_trace(err: &DoctreeError) -> String {
    chain(err)
}

/// Trace text for a stage that panicked, with the backtrace recorded at the
/// panic site when `RUST_BACKTRACE` is set.
pub fn panic_trace(payload: &(dyn Any + Send)) -> String {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());
    let mut trace = format!("stage panicked: {message}");
    if let Some(backtrace) = PANIC_BACKTRACE.with(|slot| slot.borrow_mut().take()) {
        let _ = write!(trace, "\n\nStack backtrace:\n{backtrace}");
    }
    trace
}

/// An error's display followed by its `source()` chain.
fn chain(err: &dyn Error) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    if source.is_some() {
        text.push_str("\n\nCaused by:");
    }
    let mut depth = 0;
    while let Some(cause) = source {
        let _ = write!(text, "\n    {depth}: {cause}");
        depth += 1;
        source = cause.source();
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::engine_config;

    fn report() -> ErrorReport {
        ErrorReport {
            failing_index: 1,
            failing_kind: PluginKind::Subdir,
            failing_params: serde_yaml::from_str("path: docs").unwrap(),
            first_kind: PluginKind::Git,
            first_params: serde_yaml::from_str("repo: acme/handbook").unwrap(),
            stacktrace: "I/O error at \"/tmp/x/docs\": not found".into(),
        }
    }

    #[test]
    fn bundled_templates_resolve_by_relative_name() {
        assert!(template_source("error_templates/hugo.md").unwrap().contains("{{ stacktrace }}"));
        assert!(template_source("plain.md").unwrap().contains("{{ dirname }}"));
        let err = template_source("error_templates/missing.md").unwrap_err();
        assert!(matches!(err, DoctreeError::Template(_)));
    }

    #[test]
    fn absolute_template_read_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.md");
        fs::write(&path, "{{ failing_kind }} in {{ dirname }}").unwrap();
        let source = template_source(path.to_str().unwrap()).unwrap();
        assert_eq!(render_report(&report(), "handbook", &source).unwrap(), "subdir in handbook");
    }

    #[test]
    fn renders_hugo_page() {
        let template = template_source("error_templates/hugo.md").unwrap();
        let page = render_report(&report(), "handbook", &template).unwrap();
        assert!(page.starts_with("---\ntitle: \"handbook\"\n"));
        assert!(page.contains("subdir:\n  path: docs\n"));
        assert!(page.contains("git:\n  repo: acme/handbook\n"));
        assert!(page.contains("I/O error at \"/tmp/x/docs\""));
    }

    #[test]
    fn broken_template_is_template_error() {
        let err = render_report(&report(), "x", "{% if %}").unwrap_err();
        assert!(matches!(err, DoctreeError::Template(_)));
    }

    #[test]
    fn captures_into_fresh_directory() {
        let root = tempfile::tempdir().unwrap();
        let config = engine_config(root.path(), false);
        let target = root.path().join("handbook");
        let mut janitor = Janitor::new();

        let dir = capture_failure(&report(), &target, &config, &mut janitor).unwrap();
        let entries: Vec<_> = fs::read_dir(&dir).unwrap().collect();
        assert_eq!(entries.len(), 1);
        let page = fs::read_to_string(dir.join("_index.md")).unwrap();
        assert!(page.contains("title: \"handbook\""));
        assert_eq!(janitor.len(), 1);

        janitor.release_all();
        assert!(!dir.exists());
    }

    #[test]
    fn missing_or_broken_template_is_config_error() {
        let root = tempfile::tempdir().unwrap();
        let mut config = engine_config(root.path(), false);
        check_template(&config).unwrap();

        config.error_template = root.path().join("missing.md").to_string_lossy().into_owned();
        assert!(check_template(&config).unwrap_err().is_config());

        let broken = root.path().join("broken.md");
        fs::write(&broken, "{{ no_such_variable }}").unwrap();
        config.error_template = broken.to_string_lossy().into_owned();
        assert!(check_template(&config).unwrap_err().is_config());
    }

    #[test]
    fn dir_name_resolves_relative_components() {
        let root = tempfile::tempdir().unwrap();
        let site = root.path().join("handbook");
        fs::create_dir_all(site.join("sub")).unwrap();
        assert_eq!(dir_name(&site.join("sub/..")), "handbook");
        assert_eq!(dir_name(&site.join(".")), "handbook");

        let cwd = std::env::current_dir().unwrap();
        let expected = cwd.file_name().unwrap().to_string_lossy().into_owned();
        assert_eq!(dir_name(Path::new(".")), expected);
        assert!(!expected.is_empty());
    }

    #[test]
    fn traces_include_causes() {
        let err = DoctreeError::io("/x", std::io::Error::other("disk on fire"));
        let trace = error_trace(&err);
        assert!(trace.starts_with("I/O error at"));
        assert!(trace.contains("Caused by:\n    0: disk on fire"));

        assert!(!trace.contains("Stack backtrace"));

        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert!(panic_trace(payload.as_ref()).starts_with("stage panicked: boom"));
    }
}
