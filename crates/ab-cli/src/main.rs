//! CLI entry point for autobuild.
//!
//! Supervises Go projects during development: every project declared in the
//! configuration file is built, started, and rebuilt and restarted whenever
//! its sources change.
//!
//! # Usage
//!
//! ```bash
//! autobuild [OPTIONS] [COMMAND]
//!
//! # Supervise every declared project (the default command)
//! autobuild --config config/projects.json watch
//!
//! # Validate the configuration and show derived paths
//! autobuild check --format json
//! ```

#![deny(clippy::all)]
#![warn(missing_docs)]

use std::io::Write;

use ab_core::{Config, ConfigError, ProjectDecl, ProjectLayout, dependency_order};
use ab_project::{ApplyReport, Registry};
use ab_watcher::{ChangeDetector, ChangeSignal};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::eyre::eyre;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// CLI ARGUMENT TYPES
// =============================================================================

/// Dev-time build supervisor: rebuilds and restarts projects on source
/// changes.
#[derive(Parser)]
#[command(name = "autobuild", version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Command to execute (defaults to `watch`).
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to the project configuration file.
    #[arg(
        short = 'f',
        long = "config",
        global = true,
        env = "AUTOBUILD_CONFIG",
        default_value = "config/projects.json"
    )]
    config: Utf8PathBuf,

    /// Enable verbose logging (debug level).
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Build, start and watch every declared project until interrupted.
    Watch {
        /// Do not reapply the configuration when the file changes.
        #[arg(long)]
        no_reload: bool,
    },

    /// Validate the configuration and print projects in load order.
    Check {
        /// Output format.
        #[arg(long, value_enum, default_value_t = CheckFormat::Text)]
        format: CheckFormat,
    },
}

/// Output format of `check`.
#[derive(Clone, Copy, ValueEnum)]
enum CheckFormat {
    /// Human-readable listing.
    Text,
    /// JSON array.
    Json,
}

// =============================================================================
// INITIALIZATION FUNCTIONS
// =============================================================================

/// Initializes the tracing subscriber for logging.
///
/// Respects the `RUST_LOG` environment variable if set. Otherwise, uses
/// `debug` level if `--verbose` is set, or `info` level by default.
/// The `notify` backend is filtered to `warn` level.
fn init_tracing(verbose: bool, no_color: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if verbose { "debug" } else { "info" };
        EnvFilter::new(format!("{level},notify=warn,globset=warn"))
    });

    // Check if colors should be disabled (flag or NO_COLOR env var)
    let use_ansi = !no_color && std::env::var("NO_COLOR").is_err();

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_ansi(use_ansi))
        .with(filter)
        .init();
}

/// Loads the configuration file, logging rejected declarations.
///
/// # Errors
///
/// Returns an error if the file cannot be read or is not a valid document.
fn load_config(path: &Utf8Path) -> color_eyre::Result<(Config, Vec<ConfigError>)> {
    let (config, rejected) =
        Config::load(path).map_err(|e| eyre!("Failed to load {path}: {e}"))?;
    for err in &rejected {
        warn!(project = err.project().unwrap_or_default(), error = %err, "Skipping project");
    }
    Ok((config, rejected))
}

// =============================================================================
// COMMAND IMPLEMENTATIONS
// =============================================================================

/// Supervises every declared project until Ctrl-C or SIGTERM.
///
/// # Errors
///
/// Returns an error if the configuration cannot be loaded initially or the
/// shutdown signal cannot be installed.
async fn run_watch(config_path: &Utf8Path, no_reload: bool) -> color_eyre::Result<()> {
    let (config, _) = load_config(config_path)?;
    let reload = config.settings.reload;

    let mut registry = Registry::new(config.settings.clone())
        .map_err(|e| eyre!("Failed to load templates: {e}"))?;
    info!(config = %config_path, projects = config.projects.len(), "Starting supervision");
    let report = registry
        .apply(config)
        .await
        .map_err(|e| eyre!("Failed to load templates: {e}"))?;
    log_report(&report);
    info!(projects = ?registry.names(), "Supervising");

    let mut reloader = if reload.enabled && !no_reload {
        match ChangeDetector::watch_file(config_path, reload.quiet_period()).await {
            Ok(detector) => Some(detector),
            Err(e) => {
                warn!(config = %config_path, error = %e, "Configuration reload disabled");
                None
            }
        }
    } else {
        None
    };

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = &mut shutdown => {
                result?;
                break;
            }
            signal = next_change(&mut reloader) => {
                if signal.is_some() {
                    reload_config(&mut registry, config_path).await;
                } else {
                    warn!("Configuration watcher stopped, reload disabled");
                    reloader = None;
                }
            }
        }
    }

    info!(projects = registry.len(), "Shutting down");
    registry.shutdown().await;
    if let Some(reloader) = reloader {
        if let Err(e) = reloader.shutdown().await {
            warn!(error = %e, "Configuration watcher did not shut down cleanly");
        }
    }
    Ok(())
}

/// Waits for the next configuration change, forever if reload is off.
async fn next_change(reloader: &mut Option<ChangeDetector>) -> Option<ChangeSignal> {
    match reloader {
        Some(detector) => detector.recv().await,
        None => std::future::pending().await,
    }
}

/// Re-reads the configuration and applies it; on error the current
/// projects keep running.
async fn reload_config(registry: &mut Registry, config_path: &Utf8Path) {
    info!(config = %config_path, "Configuration changed, reloading");
    let config = match load_config(config_path) {
        Ok((config, _)) => config,
        Err(e) => {
            error!(error = %e, "Keeping the current projects");
            return;
        }
    };
    match registry.apply(config).await {
        Ok(report) => {
            log_report(&report);
            info!(projects = ?registry.names(), "Supervising");
        }
        Err(e) => error!(error = %e, "Keeping the current projects"),
    }
}

fn log_report(report: &ApplyReport) {
    for (name, err) in &report.failed {
        if err.is_fatal() {
            error!(project = %name, error = %err, "Project not supervised");
        } else {
            warn!(project = %name, error = %err, "Project supervised with errors");
        }
    }
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() -> color_eyre::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                info!("Received Ctrl-C, shutting down");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl-C, shutting down");
    }

    Ok(())
}

/// One project as reported by `check`.
#[derive(Debug, serde::Serialize)]
struct CheckEntry {
    name: String,
    strategy: &'static str,
    daemon: bool,
    root: Utf8PathBuf,
    depends: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    layout: Option<ProjectLayout>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl CheckEntry {
    fn new(decl: &ProjectDecl) -> Self {
        let (layout, error) = match ProjectLayout::resolve(decl) {
            Ok(layout) => (Some(layout), None),
            Err(e) => (None, Some(e.to_string())),
        };
        Self {
            name: decl.name.clone(),
            strategy: decl.strategy.label(),
            daemon: decl.daemon,
            root: decl.root.clone(),
            depends: decl.depends.clone(),
            layout,
            error,
        }
    }
}

/// Resolves every declaration in dependency order.
fn check_entries(config: &Config) -> Vec<CheckEntry> {
    let order = dependency_order(&config.projects);
    for (project, dependency) in &order.unknown {
        warn!(project = %project, dependency = %dependency, "Unknown dependency");
    }
    if !order.cyclic.is_empty() {
        warn!(projects = ?order.cyclic, "Dependency cycle, using declaration order");
    }
    order
        .order
        .iter()
        .filter_map(|&index| config.projects.get(index))
        .map(CheckEntry::new)
        .collect()
}

/// Validates the configuration and prints what would be supervised.
///
/// # Errors
///
/// Returns an error if the file is invalid, any declaration was rejected,
/// or any project root cannot be resolved.
fn run_check(config_path: &Utf8Path, format: CheckFormat) -> color_eyre::Result<()> {
    let (config, rejected) = load_config(config_path)?;
    let entries = check_entries(&config);

    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    match format {
        CheckFormat::Json => {
            let json = serde_json::to_string_pretty(&entries)
                .map_err(|e| eyre!("Failed to serialize JSON: {e}"))?;
            writeln!(handle, "{json}")?;
        }
        CheckFormat::Text => write_text(&mut handle, &entries)?,
    }

    let unresolved = entries.iter().filter(|entry| entry.error.is_some()).count();
    if !rejected.is_empty() || unresolved > 0 {
        return Err(eyre!(
            "{} invalid declaration(s), {unresolved} unresolved project(s)",
            rejected.len()
        ));
    }
    Ok(())
}

fn write_text(out: &mut impl Write, entries: &[CheckEntry]) -> std::io::Result<()> {
    for entry in entries {
        let kind = if entry.daemon { "daemon" } else { "task" };
        writeln!(out, "{} ({}, {kind})", entry.name, entry.strategy)?;
        match (&entry.layout, &entry.error) {
            (Some(layout), _) => {
                writeln!(out, "  root:       {}", layout.root)?;
                writeln!(out, "  script:     {}", layout.script_path)?;
                writeln!(out, "  compiles:   {}", layout.main_target)?;
                if let Some(executable) = &layout.executable {
                    writeln!(out, "  executable: {executable}")?;
                }
                writeln!(out, "  errors:     {}", layout.error_file)?;
            }
            (None, Some(error)) => writeln!(out, "  error:      {error}")?,
            (None, None) => {}
        }
        if !entry.depends.is_empty() {
            writeln!(out, "  depends:    {}", entry.depends.join(", "))?;
        }
    }
    Ok(())
}

// =============================================================================
// MAIN ENTRY POINT
// =============================================================================

/// Application entry point.
#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    // 1. Install color-eyre FIRST (before any potential panics)
    color_eyre::install()?;

    // 2. Parse CLI arguments
    let cli = Cli::parse();

    // 3. Initialize tracing (handles --no-color for log output)
    init_tracing(cli.verbose, cli.no_color);

    // 4. Route to appropriate command
    match cli.command.unwrap_or(Commands::Watch { no_reload: false }) {
        Commands::Watch { no_reload } => run_watch(&cli.config, no_reload).await,
        Commands::Check { format } => run_check(&cli.config, format),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ab_core::BuildStrategy;
    use tempfile::TempDir;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::try_parse_from(["autobuild"]).unwrap();
        assert!(cli.command.is_none());
        assert!(!cli.verbose);

        let cli = Cli::try_parse_from(["autobuild", "-f", "dev.json", "watch", "--no-reload"])
            .unwrap();
        assert_eq!(cli.config, "dev.json");
        assert!(matches!(cli.command, Some(Commands::Watch { no_reload: true })));
    }

    #[test]
    fn test_check_entries_in_load_order() {
        let dir = TempDir::new().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap().to_owned();
        let config = Config {
            projects: vec![
                ProjectDecl::new("web", &root)
                    .with_strategy(BuildStrategy::Build)
                    .with_main("main.go")
                    .with_depends(["lib"]),
                ProjectDecl::new("lib", root.join("missing")),
                ProjectDecl::new("gen", &root)
                    .with_strategy(BuildStrategy::Run)
                    .with_daemon(false),
            ],
            ..Config::default()
        };

        let entries = check_entries(&config);
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["lib", "web", "gen"]);
        assert!(entries[0].error.is_some());

        let layout = entries[1].layout.as_ref().unwrap();
        assert_eq!(layout.main_target, "src/main.go");

        let mut text = Vec::new();
        write_text(&mut text, &entries).unwrap();
        let text = String::from_utf8(text).unwrap();
        assert!(text.contains("web (build, daemon)"));
        assert!(text.contains("gen (run, task)"));
        assert!(text.contains("depends:    lib"));
    }
}
