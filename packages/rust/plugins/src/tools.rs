//! External executables: availability checks and invocation.

use std::cmp::Ordering;
use std::process::Command;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, instrument};

use doctree_shared::{DoctreeError, Result};

static VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+(?:\.\d+)+").expect("valid regex"));

/// An executable a plugin shells out to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tool {
    pub name: &'static str,
    /// Lowest accepted `--version`, if any.
    pub min_version: Option<&'static str>,
}

impl Tool {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            min_version: None,
        }
    }

    pub const fn at_least(name: &'static str, version: &'static str) -> Self {
        Self {
            name,
            min_version: Some(version),
        }
    }
}

/// Fail with a dependency error unless every tool is installed and recent enough.
pub fn ensure_tools(tools: &[Tool]) -> Result<()> {
    tools.iter().try_for_each(check_tool)
}

#[instrument(skip_all, fields(tool = tool.name))]
fn check_tool(tool: &Tool) -> Result<()> {
    let output = Command::new(tool.name)
        .arg("--version")
        .output()
        .map_err(|_| DoctreeError::dependency(format!("could not find executable for {}", tool.name)))?;

    let Some(required) = tool.min_version else {
        debug!("tool available");
        return Ok(());
    };

    if !output.status.success() {
        return Err(DoctreeError::dependency(format!(
            "error confirming {} version: {}",
            tool.name,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let installed = find_version(&stdout).ok_or_else(|| {
        DoctreeError::dependency(format!("could not read {} version from {:?}", tool.name, stdout.trim()))
    })?;

    if compare_versions(installed, required) == Ordering::Less {
        return Err(DoctreeError::dependency(format!(
            "installed {} is version {installed}, but at least {required} is required",
            tool.name
        )));
    }
    debug!(version = installed, "tool version accepted");
    Ok(())
}

/// First dotted version number in a `--version` banner.
pub(crate) fn find_version(text: &str) -> Option<&str> {
    VERSION_RE.find(text).map(|m| m.as_str())
}

/// Numeric comparison of dotted versions; missing components count as zero.
pub(crate) fn compare_versions(a: &str, b: &str) -> Ordering {
    let parse = |v: &str| -> Vec<u64> { v.split('.').map(|part| part.parse().unwrap_or(0)).collect() };
    let (a, b) = (parse(a), parse(b));
    let len = a.len().max(b.len());
    (0..len)
        .map(|i| a.get(i).copied().unwrap_or(0).cmp(&b.get(i).copied().unwrap_or(0)))
        .find(|ord| ord.is_ne())
        .unwrap_or(Ordering::Equal)
}

/// Run a command to completion; a launch failure or non-zero exit is a stage error.
pub fn run(cmd: &mut Command, what: &str) -> Result<()> {
    debug!(command = ?cmd, "running");
    let status = cmd
        .status()
        .map_err(|e| DoctreeError::stage(format!("failed to launch {what}: {e}")))?;
    if !status.success() {
        return Err(DoctreeError::stage(format!("{what} failed with {status}")));
    }
    Ok(())
}

/// Run a command and return its standard output.
pub fn output(cmd: &mut Command, what: &str) -> Result<String> {
    debug!(command = ?cmd, "running");
    let out = cmd
        .output()
        .map_err(|e| DoctreeError::stage(format!("failed to launch {what}: {e}")))?;
    if !out.status.success() {
        return Err(DoctreeError::stage(format!(
            "{what} failed with {}: {}",
            out.status,
            String::from_utf8_lossy(&out.stderr).trim()
        )));
    }
    Ok(String::from_utf8_lossy(&out.stdout).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_version_from_banner() {
        assert_eq!(find_version("git version 2.39.2\n"), Some("2.39.2"));
        assert_eq!(find_version("pandoc 3.1.3\nFeatures: +server"), Some("3.1.3"));
        assert_eq!(find_version("no digits"), None);
    }

    #[test]
    fn compares_numerically() {
        assert_eq!(compare_versions("2.10.0", "2.3.0"), Ordering::Greater);
        assert_eq!(compare_versions("2.3", "2.3.0"), Ordering::Equal);
        assert_eq!(compare_versions("2.2.9", "2.3.0"), Ordering::Less);
    }

    #[test]
    fn missing_executable_is_dependency_error() {
        let err = ensure_tools(&[Tool::new("doctree-no-such-tool-xyz")]).unwrap_err();
        assert!(matches!(err, DoctreeError::Dependency { .. }));
        assert!(err.is_config());
    }

    #[test]
    fn failing_command_is_stage_error() {
        let err = run(Command::new("doctree-no-such-tool-xyz").arg("x"), "render").unwrap_err();
        assert!(matches!(err, DoctreeError::Stage { .. }));
    }
}
