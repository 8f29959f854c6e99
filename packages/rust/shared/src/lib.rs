//! Shared types, error model, and configuration for doctree.
//!
//! This crate is the foundation depended on by all other doctree crates.
//! It provides:
//! - [`DoctreeError`], the unified error type
//! - The plugin vocabulary ([`PluginKind`], [`PluginRole`]) and cache identities ([`stage_identity`])
//! - Configuration ([`AppConfig`], [`EngineConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, ConfluenceConfig, EngineConfig, EngineSection, ErrorPageConfig, GoogleDriveConfig,
    CONFIG_FILE_NAME, DEFAULT_DECLARATION_FILE, default_config_dir, init_config, load_config,
};
pub use error::{DoctreeError, Result};
pub use types::{PluginKind, PluginRole, scoped_identity, stage_identity};
