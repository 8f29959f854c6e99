//! Error types for doctree.
//!
//! Library crates use [`DoctreeError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all doctree operations.
#[derive(Debug, thiserror::Error)]
pub enum DoctreeError {
    /// Configuration loading or declaration validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// A pipeline stage names no registered plugin.
    #[error("pipeline stage {index}: no recognized plugin among keys [{}]", .keys.join(", "))]
    UnknownStage { index: usize, keys: Vec<String> },

    /// A pipeline stage names more than one registered plugin.
    #[error("pipeline stage {index}: ambiguous plugin keys [{}]", .kinds.join(", "))]
    AmbiguousStage { index: usize, kinds: Vec<String> },

    /// Stage parameters do not fit the plugin's parameter schema.
    #[error("pipeline stage {index} ({kind}): invalid parameters: {message}")]
    InvalidParams {
        index: usize,
        kind: String,
        message: String,
    },

    /// A required external executable is missing or too old.
    #[error("missing dependency: {message}")]
    Dependency { message: String },

    /// A plugin failed while producing its output.
    #[error("stage error: {message}")]
    Stage { message: String },

    /// HTTP error talking to a remote source.
    #[error("network error: {0}")]
    Network(String),

    /// Error template could not be resolved or rendered.
    #[error("template error: {0}")]
    Template(String),

    /// HTML-to-Markdown conversion error.
    #[error("conversion error: {0}")]
    Conversion(String),

    /// A filesystem precondition does not hold (e.g. target already populated).
    #[error("precondition failed: {message}")]
    Precondition { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, DoctreeError>;

impl DoctreeError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a stage execution error from any displayable message.
    pub fn stage(msg: impl Into<String>) -> Self {
        Self::Stage {
            message: msg.into(),
        }
    }

    /// Create a precondition error from any displayable message.
    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::Precondition {
            message: msg.into(),
        }
    }

    /// Create a dependency error from any displayable message.
    pub fn dependency(msg: impl Into<String>) -> Self {
        Self::Dependency {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error belongs to the configuration class: raised while
    /// loading a declaration, never converted into an error page.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::Config { .. }
                | Self::UnknownStage { .. }
                | Self::AmbiguousStage { .. }
                | Self::InvalidParams { .. }
                | Self::Dependency { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = DoctreeError::config("missing pipeline");
        assert_eq!(err.to_string(), "config error: missing pipeline");

        let err = DoctreeError::UnknownStage {
            index: 1,
            keys: vec!["bogus".into(), "other".into()],
        };
        assert_eq!(
            err.to_string(),
            "pipeline stage 1: no recognized plugin among keys [bogus, other]"
        );
    }

    #[test]
    fn config_classification() {
        assert!(DoctreeError::dependency("pandoc").is_config());
        assert!(
            DoctreeError::AmbiguousStage {
                index: 0,
                kinds: vec!["git".into(), "local".into()],
            }
            .is_config()
        );
        assert!(!DoctreeError::stage("exit code 1").is_config());
        assert!(!DoctreeError::precondition("target not empty").is_config());
    }
}
