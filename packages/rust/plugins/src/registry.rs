//! The closed plugin registry: maps a [`PluginKind`] to its parameter
//! schema, its external tools, and its implementation.

use serde::de::DeserializeOwned;
use serde_yaml::Value;

use doctree_shared::{DoctreeError, PluginKind, Result, stage_identity};

use crate::builders::{PlantUmlBuilder, PlantUmlParams, SphinxBuilder, SphinxParams};
use crate::converters::{
    HugoifyConverter, HugoifyParams, NoopConverter, PandocConverter, PandocParams, SubdirConverter,
    SubdirParams,
};
use crate::sources::{
    ConfluenceParams, ConfluenceSource, DriveParams, EmptySource, GitParams, GitSource,
    GoogleDriveSource, LocalParams, LocalSource,
};
use crate::tools::Tool;
use crate::{StageContext, Transformer, WorkDirPolicy, WorkSlot};

const GIT: Tool = Tool::at_least("git", "2.3.0");
const PANDOC: Tool = Tool::new("pandoc");
const PLANTUML: Tool = Tool::new("plantuml");
const SPHINX_BUILD: Tool = Tool::new("sphinx-build");
const MAKE: Tool = Tool::new("make");

/// Executables a plugin shells out to.
pub fn required_tools(kind: PluginKind) -> &'static [Tool] {
    match kind {
        PluginKind::Git | PluginKind::GitHub => &[GIT],
        PluginKind::Pandoc => &[PANDOC],
        PluginKind::PlantUml => &[PLANTUML],
        PluginKind::Sphinx => &[SPHINX_BUILD, MAKE],
        PluginKind::Subdir
        | PluginKind::Noop
        | PluginKind::Hugoify
        | PluginKind::Local
        | PluginKind::GoogleDrive
        | PluginKind::Confluence
        | PluginKind::Empty => &[],
    }
}

/// Check stage parameters against the plugin's schema. Returns the
/// deserializer's message on mismatch.
pub fn validate_params(kind: PluginKind, params: &Value) -> std::result::Result<(), String> {
    fn check<T: DeserializeOwned>(params: &Value) -> std::result::Result<(), String> {
        serde_yaml::from_value::<T>(normalize(params))
            .map(drop)
            .map_err(|e| e.to_string())
    }

    match kind {
        PluginKind::Sphinx => check::<SphinxParams>(params),
        PluginKind::PlantUml => check::<PlantUmlParams>(params),
        PluginKind::Pandoc => check::<PandocParams>(params),
        PluginKind::Hugoify => check::<HugoifyParams>(params),
        PluginKind::Subdir => check::<SubdirParams>(params),
        PluginKind::Local => check::<LocalParams>(params),
        PluginKind::Git | PluginKind::GitHub => check::<GitParams>(params),
        PluginKind::GoogleDrive => check::<DriveParams>(params),
        PluginKind::Confluence => check::<ConfluenceParams>(params),
        PluginKind::Noop | PluginKind::Empty => match params {
            Value::Mapping(_) | Value::Null => Ok(()),
            other => Err(format!("expected a mapping, found {}", value_kind(other))),
        },
    }
}

/// Build the transformer for one stage.
pub fn instantiate(kind: PluginKind, params: &Value, ctx: &StageContext<'_>) -> Result<Box<dyn Transformer>> {
    let identity = stage_identity(kind, params, ctx.input);
    let slot = WorkSlot::new(WorkDirPolicy::from_config(ctx.config), identity);

    let transformer: Box<dyn Transformer> = match kind {
        PluginKind::Empty => Box::new(EmptySource::new(slot)),
        PluginKind::Local => Box::new(LocalSource::new(parse(kind, params)?, ctx, slot)),
        PluginKind::Git | PluginKind::GitHub => Box::new(GitSource::new(kind, parse(kind, params)?, slot)),
        PluginKind::GoogleDrive => Box::new(GoogleDriveSource::new(parse(kind, params)?, ctx, slot)),
        PluginKind::Confluence => Box::new(ConfluenceSource::new(parse(kind, params)?, ctx, slot)),
        PluginKind::Noop => Box::new(NoopConverter::new(ctx.require_input(kind)?)),
        PluginKind::Subdir => Box::new(SubdirConverter::new(parse(kind, params)?, ctx.require_input(kind)?, slot)),
        PluginKind::Pandoc => Box::new(PandocConverter::new(parse(kind, params)?, ctx.require_input(kind)?, slot)),
        PluginKind::Hugoify => Box::new(HugoifyConverter::new(parse(kind, params)?, ctx.require_input(kind)?, slot)),
        PluginKind::PlantUml => Box::new(PlantUmlBuilder::new(parse(kind, params)?, ctx.require_input(kind)?, slot)),
        PluginKind::Sphinx => Box::new(SphinxBuilder::new(parse(kind, params)?, ctx.require_input(kind)?, slot)),
    };
    Ok(transformer)
}

fn parse<T: DeserializeOwned>(kind: PluginKind, params: &Value) -> Result<T> {
    serde_yaml::from_value(normalize(params))
        .map_err(|e| DoctreeError::config(format!("invalid {kind} parameters: {e}")))
}

/// A bare `- hugoify:` stage has null parameters; treat it as `{}`.
fn normalize(params: &Value) -> Value {
    match params {
        Value::Null => Value::Mapping(Default::default()),
        other => other.clone(),
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a sequence",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}
