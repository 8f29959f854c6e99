//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use doctree_core::{
    AssembleOptions, AssembleReport, BuildOptions, ExportOutcome, Janitor, ProgressReporter,
    RunOutcome, SourceLocation,
};
use doctree_shared::{AppConfig, EngineConfig, default_config_dir, init_config, load_config};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// doctree: assemble documentation trees from per-directory pipelines.
#[derive(Parser)]
#[command(
    name = "doctree",
    version,
    about = "Assemble documentation trees from per-directory pipeline declarations.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config directory (defaults to ~/.doctree).
    #[arg(long, env = "DOCTREE_CONFIG_DIR", global = true)]
    pub config_dir: Option<PathBuf>,

    /// Development mode: keep stage caches and allow overwriting targets.
    #[arg(long, global = true)]
    pub devel: bool,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run every pipeline under PATH in place.
    Assemble {
        /// Root of the documentation tree (defaults to the current directory).
        path: Option<PathBuf>,
    },

    /// Assemble a copy of the source tree and write it to TARGET.
    Build {
        /// Source tree: a local path or https://host/account/repo[@branch].
        #[arg(long)]
        src: Option<String>,

        /// Output directory; must be empty or missing.
        target: PathBuf,

        /// Keep the scratch tree when the build fails.
        #[arg(long)]
        preserve: bool,

        /// Remove declarations and their .gitignore files from the output.
        #[arg(long)]
        strip: bool,
    },

    /// Build SRC and push the result to a git repository.
    Export {
        /// Source tree: a local path or https://host/account/repo[@branch].
        src: String,

        /// Destination: https://host/account/repo[@branch].
        dest: String,
    },

    /// Write a starter declaration into PATH.
    Init {
        /// Directory to initialize (defaults to the current directory).
        path: Option<PathBuf>,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match (cli.verbose, cli.devel) {
        (0, false) => "doctree=info",
        (0, true) | (1, _) => "doctree=debug",
        _ => "doctree=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) fn run(cli: Cli) -> Result<()> {
    let config_dir = match &cli.config_dir {
        Some(dir) => dir.clone(),
        None => default_config_dir()?,
    };

    let mut janitor = Janitor::new();
    let result = match cli.command {
        Command::Assemble { path } => {
            cmd_assemble(path, &engine_config(&config_dir, cli.devel)?, &mut janitor)
        }
        Command::Build {
            src,
            target,
            preserve,
            strip,
        } => {
            let config = engine_config(&config_dir, cli.devel)?;
            cmd_build(src.as_deref(), target, preserve, strip, &config, &mut janitor)
        }
        Command::Export { src, dest } => {
            cmd_export(&src, &dest, &engine_config(&config_dir, cli.devel)?, &mut janitor)
        }
        Command::Init { path } => cmd_init(path, &engine_config(&config_dir, cli.devel)?),
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(&config_dir),
            ConfigAction::Show => cmd_config_show(&config_dir),
        },
    };
    janitor.release_all();
    result
}

/// Runtime config from the config file, with `--devel` switching
/// development mode on.
fn engine_config(config_dir: &Path, devel: bool) -> Result<EngineConfig> {
    let app = load_config(config_dir)?;
    let devel = devel || app.engine.devel;
    Ok(EngineConfig::from_app(&app, config_dir).with_devel(devel))
}

fn current_dir_or(path: Option<PathBuf>) -> Result<PathBuf> {
    match path {
        Some(path) => Ok(path),
        None => std::env::current_dir().map_err(|e| eyre!("cannot determine working directory: {e}")),
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

fn cmd_assemble(path: Option<PathBuf>, config: &EngineConfig, janitor: &mut Janitor) -> Result<()> {
    let root = current_dir_or(path)?;
    info!(root = %root.display(), devel = config.devel, "assembling in place");

    let progress = CliProgress::new();
    let report = doctree_core::assemble(&root, config, AssembleOptions::default(), janitor, &progress)?;
    print_summary(&report);
    Ok(())
}

fn cmd_build(
    src: Option<&str>,
    target: PathBuf,
    preserve: bool,
    strip: bool,
    config: &EngineConfig,
    janitor: &mut Janitor,
) -> Result<()> {
    let source = match src {
        Some(src) => SourceLocation::parse(src)?,
        None => SourceLocation::Local(current_dir_or(None)?),
    };
    let opts = BuildOptions {
        source,
        target,
        preserve,
        strip,
    };
    info!(target = %opts.target.display(), devel = config.devel, "building");

    let progress = CliProgress::new();
    let report = doctree_core::build(&opts, config, janitor, &progress)?;
    print_summary(&report.assembly);
    println!("  Output: {}", report.target.display());
    if let Some(scratch) = &report.scratch {
        println!("  Scratch tree kept in {}", scratch.display());
    }
    Ok(())
}

fn cmd_export(src: &str, dest: &str, config: &EngineConfig, janitor: &mut Janitor) -> Result<()> {
    let source = SourceLocation::parse(src)?;
    let progress = CliProgress::new();
    match doctree_core::export(source, dest, config, janitor, &progress)? {
        ExportOutcome::Unchanged => println!("No changes to export."),
        ExportOutcome::Pushed => println!("Pushed documentation build to {dest}."),
    }
    Ok(())
}

fn cmd_init(path: Option<PathBuf>, config: &EngineConfig) -> Result<()> {
    let dir = current_dir_or(path)?;
    let declaration = doctree_core::init(&dir, config)?;
    println!("Initialized {}", declaration.display());
    Ok(())
}

fn cmd_config_init(config_dir: &Path) -> Result<()> {
    let path = init_config(config_dir)?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(config_dir: &Path) -> Result<()> {
    let config: AppConfig = load_config(config_dir)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

fn print_summary(report: &AssembleReport) {
    println!();
    println!("  Pipelines: {}", report.pipelines.len());
    println!("  Disabled:  {}", report.disabled.len());
    println!("  Failed:    {}", report.failed.len());
    for dir in &report.failed {
        println!("    error page written to {}", dir.display());
    }
    println!();
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap()
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn pipeline_started(&self, dir: &Path, current: usize, total: usize) {
        self.spinner
            .set_message(format!("[{current}/{total}] {}", dir.display()));
    }

    fn pipeline_finished(&self, dir: &Path, outcome: &RunOutcome) {
        if let Some(report) = &outcome.failure {
            self.spinner.println(format!(
                "  ! {}: stage {} ({}) failed",
                dir.display(),
                report.failing_index,
                report.failing_kind
            ));
        }
    }

    fn done(&self, _report: &AssembleReport) {
        self.spinner.finish_and_clear();
    }
}
