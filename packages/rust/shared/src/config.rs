//! Application configuration for doctree.
//!
//! User config lives at `<config_dir>/config.toml`, where `config_dir`
//! defaults to `~/.doctree/`. CLI flags override config file values,
//! which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{DoctreeError, Result};

/// Config file name inside the config directory.
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Default name of the per-directory pipeline declaration.
pub const DEFAULT_DECLARATION_FILE: &str = "doctree.yml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".doctree";

// ---------------------------------------------------------------------------
// Config structs (matching config.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Engine behavior.
    #[serde(default)]
    pub engine: EngineSection,

    /// Error page rendering.
    #[serde(default)]
    pub errors: ErrorPageConfig,

    /// Google Drive source settings.
    #[serde(default)]
    pub googledrive: GoogleDriveConfig,

    /// Confluence source settings.
    #[serde(default)]
    pub confluence: ConfluenceConfig,
}

/// `[engine]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSection {
    /// Development mode: persistent stage caches, overwrite-tolerant targets.
    #[serde(default)]
    pub devel: bool,

    /// Root for development-mode stage caches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<String>,

    /// File name that marks a directory as a pipeline declaration.
    #[serde(default = "default_declaration_file")]
    pub declaration_file: String,

    /// Verify external executables when loading declarations.
    #[serde(default = "default_true")]
    pub check_dependencies: bool,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            devel: false,
            cache_dir: None,
            declaration_file: default_declaration_file(),
            check_dependencies: true,
        }
    }
}

fn default_declaration_file() -> String {
    DEFAULT_DECLARATION_FILE.into()
}
fn default_true() -> bool {
    true
}

/// `[errors]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPageConfig {
    /// Error page template: an absolute path, or a bundled template name.
    #[serde(default = "default_error_template")]
    pub template: String,

    /// File name of the rendered error page.
    #[serde(default = "default_result_filename")]
    pub result_filename: String,
}

impl Default for ErrorPageConfig {
    fn default() -> Self {
        Self {
            template: default_error_template(),
            result_filename: default_result_filename(),
        }
    }
}

fn default_error_template() -> String {
    "error_templates/hugo.md".into()
}
fn default_result_filename() -> String {
    "_index.md".into()
}

/// `[googledrive]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleDriveConfig {
    /// OAuth token file (JSON with an `access_token`), relative to the config dir.
    #[serde(default = "default_token_file")]
    pub token_file: String,

    /// Drive API base URL.
    #[serde(default = "default_drive_api")]
    pub api_base: String,
}

impl Default for GoogleDriveConfig {
    fn default() -> Self {
        Self {
            token_file: default_token_file(),
            api_base: default_drive_api(),
        }
    }
}

fn default_token_file() -> String {
    "googledrive-token.json".into()
}
fn default_drive_api() -> String {
    "https://www.googleapis.com".into()
}

/// `[confluence]` section. Holds env var names, never the credentials themselves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfluenceConfig {
    #[serde(default = "default_confluence_url_env")]
    pub url_env: String,

    #[serde(default = "default_confluence_user_env")]
    pub username_env: String,

    #[serde(default = "default_confluence_key_env")]
    pub api_key_env: String,
}

impl Default for ConfluenceConfig {
    fn default() -> Self {
        Self {
            url_env: default_confluence_url_env(),
            username_env: default_confluence_user_env(),
            api_key_env: default_confluence_key_env(),
        }
    }
}

fn default_confluence_url_env() -> String {
    "ATLASSIAN_URL".into()
}
fn default_confluence_user_env() -> String {
    "ATLASSIAN_API_USERNAME".into()
}
fn default_confluence_key_env() -> String {
    "ATLASSIAN_API_KEY".into()
}

// ---------------------------------------------------------------------------
// Engine config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Immutable runtime configuration handed to every loader, runner and plugin.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub devel: bool,
    /// Directory holding `config.toml` and credential files.
    pub config_dir: PathBuf,
    /// Root of development-mode stage caches.
    pub cache_root: PathBuf,
    pub declaration_file: String,
    pub check_dependencies: bool,
    pub error_template: String,
    pub error_result_filename: String,
    pub googledrive: GoogleDriveConfig,
    pub confluence: ConfluenceConfig,
}

impl EngineConfig {
    /// Resolve the runtime config from a loaded file and its directory.
    pub fn from_app(config: &AppConfig, config_dir: &Path) -> Self {
        let cache_root = config
            .engine
            .cache_dir
            .as_ref()
            .map(PathBuf::from)
            .or_else(|| dirs::cache_dir().map(|dir| dir.join("doctree")))
            .unwrap_or_else(|| config_dir.join("cache"));

        Self {
            devel: config.engine.devel,
            config_dir: config_dir.to_path_buf(),
            cache_root,
            declaration_file: config.engine.declaration_file.clone(),
            check_dependencies: config.engine.check_dependencies,
            error_template: config.errors.template.clone(),
            error_result_filename: config.errors.result_filename.clone(),
            googledrive: config.googledrive.clone(),
            confluence: config.confluence.clone(),
        }
    }

    /// Copy of this config with development mode switched on or off.
    pub fn with_devel(mut self, devel: bool) -> Self {
        self.devel = devel;
        self
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the default config directory (`~/.doctree/`).
pub fn default_config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| DoctreeError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Load `config.toml` from a config directory. Returns defaults if the file does not exist.
pub fn load_config(config_dir: &Path) -> Result<AppConfig> {
    let path = config_dir.join(CONFIG_FILE_NAME);

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    let content = std::fs::read_to_string(&path).map_err(|e| DoctreeError::io(&path, e))?;

    toml::from_str(&content)
        .map_err(|e| DoctreeError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config(config_dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(config_dir).map_err(|e| DoctreeError::io(config_dir, e))?;

    let path = config_dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| DoctreeError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| DoctreeError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("declaration_file"));
        assert!(toml_str.contains("error_templates/hugo.md"));
        assert!(toml_str.contains("ATLASSIAN_API_KEY"));
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let toml_str = r#"
[engine]
devel = true
cache_dir = "/var/cache/doctree"

[errors]
result_filename = "index.md"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert!(config.engine.devel);
        assert!(config.engine.check_dependencies);
        assert_eq!(config.engine.declaration_file, "doctree.yml");
        assert_eq!(config.errors.template, "error_templates/hugo.md");
        assert_eq!(config.errors.result_filename, "index.md");
    }

    #[test]
    fn engine_config_from_app_config() {
        let mut app = AppConfig::default();
        app.engine.cache_dir = Some("/var/cache/doctree".into());
        let engine = EngineConfig::from_app(&app, Path::new("/etc/doctree"));
        assert!(!engine.devel);
        assert_eq!(engine.cache_root, PathBuf::from("/var/cache/doctree"));
        assert_eq!(engine.config_dir, PathBuf::from("/etc/doctree"));
        assert_eq!(engine.error_result_filename, "_index.md");
        assert!(engine.with_devel(true).devel);
    }

    #[test]
    fn missing_file_gives_defaults_and_init_writes_one() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = load_config(dir.path()).expect("load defaults");
        assert!(!config.engine.devel);

        let path = init_config(&dir.path().join("nested")).expect("init");
        assert!(path.ends_with(CONFIG_FILE_NAME));
        let reloaded = load_config(&dir.path().join("nested")).expect("reload");
        assert_eq!(reloaded.googledrive.token_file, "googledrive-token.json");
    }

    #[test]
    fn malformed_file_is_config_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "[engine\ndevel = ").expect("write");
        let err = load_config(dir.path()).unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("failed to parse"));
    }
}
