//! Pipeline declaration loading.
//!
//! A declaration (`doctree.yml`) looks like:
//!
//! ```yaml
//! enabled: true        # optional, defaults to true
//! pipeline:
//!   - git:
//!       repo: acme/handbook
//!   - subdir:
//!       path: docs
//!   - hugoify: {}
//! ```
//!
//! Each stage names exactly one registered plugin kind; its value holds
//! that plugin's parameters.

use std::fs;
use std::path::Path;

use serde_yaml::{Mapping, Value};
use tracing::{debug, instrument};

use doctree_plugins::{Tool, ensure_tools, required_tools, validate_params};
use doctree_shared::{DoctreeError, EngineConfig, PluginKind, PluginRole, Result};

/// One declared stage.
#[derive(Debug, Clone, PartialEq)]
pub struct Stage {
    pub kind: PluginKind,
    /// Parameters, always a mapping.
    pub params: Value,
}

/// Ordered stages of one declaration. Disabled declarations carry no stages.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSpec {
    pub enabled: bool,
    pub stages: Vec<Stage>,
}

impl PipelineSpec {
    /// Distinct external tools needed by the stages, in stage order.
    pub fn required_tools(&self) -> Vec<Tool> {
        let mut tools: Vec<Tool> = Vec::new();
        for tool in self.stages.iter().flat_map(|stage| required_tools(stage.kind)) {
            if !tools.contains(tool) {
                tools.push(*tool);
            }
        }
        tools
    }
}

/// Read and validate a declaration file. With `check_dependencies` set,
/// every tool the stages need must be installed.
#[instrument(skip_all, fields(path = %path.display()))]
pub fn load_spec(path: &Path, config: &EngineConfig) -> Result<PipelineSpec> {
    let text = fs::read_to_string(path).map_err(|e| DoctreeError::io(path, e))?;
    let spec = parse_spec(&text)?;
    if config.check_dependencies {
        ensure_tools(&spec.required_tools())?;
    }
    debug!(stages = spec.stages.len(), enabled = spec.enabled, "declaration loaded");
    Ok(spec)
}

/// Parse declaration text. Never touches the filesystem.
pub fn parse_spec(text: &str) -> Result<PipelineSpec> {
    let doc: Value = serde_yaml::from_str(text)
        .map_err(|e| DoctreeError::config(format!("malformed declaration: {e}")))?;
    let Value::Mapping(doc) = doc else {
        return Err(DoctreeError::config("declaration must be a mapping"));
    };

    let enabled = match doc.get("enabled") {
        None => true,
        Some(Value::Bool(enabled)) => *enabled,
        Some(_) => return Err(DoctreeError::config("`enabled` must be true or false")),
    };
    if !enabled {
        return Ok(PipelineSpec {
            enabled,
            stages: Vec::new(),
        });
    }

    let entries = match doc.get("pipeline") {
        Some(Value::Sequence(entries)) => entries,
        Some(_) => return Err(DoctreeError::config("`pipeline` must be a sequence of stages")),
        None => return Err(DoctreeError::config("declaration has no `pipeline`")),
    };

    let stages = entries
        .iter()
        .enumerate()
        .map(|(index, entry)| parse_stage(index, entry))
        .collect::<Result<Vec<_>>>()?;

    if let Some(first) = stages.first() {
        if first.kind.role() != PluginRole::Source {
            return Err(DoctreeError::config(format!(
                "pipeline stage 0: {} is not a source plugin",
                first.kind
            )));
        }
    }

    Ok(PipelineSpec { enabled, stages })
}

fn parse_stage(index: usize, entry: &Value) -> Result<Stage> {
    let Value::Mapping(entry) = entry else {
        return Err(DoctreeError::config(format!("pipeline stage {index}: expected a mapping")));
    };

    let matches: Vec<(PluginKind, &Value)> = entry
        .iter()
        .filter_map(|(key, value)| key.as_str().and_then(PluginKind::from_key).map(|kind| (kind, value)))
        .collect();

    let (kind, params) = match matches.as_slice() {
        [] => {
            return Err(DoctreeError::UnknownStage {
                index,
                keys: entry.keys().map(key_name).collect(),
            });
        }
        [(kind, params)] => (*kind, *params),
        many => {
            return Err(DoctreeError::AmbiguousStage {
                index,
                kinds: many.iter().map(|(kind, _)| kind.key().to_string()).collect(),
            });
        }
    };

    let params = match params {
        Value::Null => Value::Mapping(Mapping::new()),
        other => other.clone(),
    };
    validate_params(kind, &params).map_err(|message| DoctreeError::InvalidParams {
        index,
        kind: kind.key().to_string(),
        message,
    })?;

    Ok(Stage { kind, params })
}

fn key_name(key: &Value) -> String {
    match key {
        Value::String(name) => name.clone(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim().to_string())
            .unwrap_or_default(),
    }
}
