//! autoup - continuous one-way mirroring of local directories
//!
//! Watches every configured project directory, uploads what changed since the last sync and keeps
//! a snapshot on disk so restarts resume where the previous run stopped.

mod display;

use anyhow::{bail, Context, Result};
use autoup_config::{Config, ConfigLoader, LoggingConfig};
use autoup_engine::Supervisor;
use clap::{Parser, Subcommand};
use console::style;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;

/// autoup - continuous one-way directory mirroring
#[derive(Parser)]
#[command(
    name = "autoup",
    version = env!("CARGO_PKG_VERSION"),
    about = "Continuous one-way directory mirroring",
    long_about = "autoup watches local directories and mirrors every change onto a remote target.\n\
                  Only what changed since the last successful sync is transferred, and the sync\n\
                  state survives restarts."
)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Quiet mode - minimal output
    #[arg(short, long)]
    quiet: bool,

    /// Verbose mode - detailed output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mirror every enabled project until interrupted
    Run,
    /// Show the persisted sync status of a project
    Status {
        /// Project name
        #[arg(short, long)]
        project: String,
        /// Directory inside the project, defaults to its base directory
        path: Option<PathBuf>,
    },
    /// Show configuration
    Config {
        /// Show default configuration
        #[arg(long)]
        default: bool,
        /// Write the configuration to a file instead of printing it
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Config { default, output } => {
            let config = if default {
                Config::default()
            } else {
                load_config(cli.config.as_deref())?
            };
            config_command(&config, output.as_deref())
        }
        Commands::Run => {
            let config = load_config(cli.config.as_deref())?;
            let _guard = init_logging(&config.logging, cli.debug, cli.quiet, cli.verbose)?;
            info!("autoup v{} starting", env!("CARGO_PKG_VERSION"));
            run_command(&config, cli.quiet).await
        }
        Commands::Status { project, path } => {
            let config = load_config(cli.config.as_deref())?;
            let _guard = init_logging(&config.logging, cli.debug, cli.quiet, cli.verbose)?;
            status_command(&config, &project, path.as_deref()).await
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => ConfigLoader::load_from_file(path)
            .with_context(|| format!("Failed to load configuration '{}'", path.display())),
        None => ConfigLoader::load_default().context("Failed to load configuration"),
    }
}

/// Install the global subscriber
///
/// Command line flags override the configured level and `RUST_LOG` overrides both. The returned
/// guard flushes the log file when dropped.
fn init_logging(
    logging: &LoggingConfig,
    debug: bool,
    quiet: bool,
    verbose: bool,
) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let level = if debug {
        "debug"
    } else if verbose {
        "info"
    } else if quiet {
        "error"
    } else {
        logging.level.as_str()
    };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .context("Invalid log filter")?;

    let console_layer = if logging.json_format {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        fmt::layer()
            .with_target(false)
            .with_ansi(logging.colored_output)
            .with_writer(std::io::stderr)
            .boxed()
    };

    let (file_layer, guard) = if logging.enable_file_logging {
        let path = logging
            .log_file
            .clone()
            .unwrap_or_else(|| PathBuf::from("autoup.log"));
        let directory = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        let file_name = path
            .file_name()
            .map_or_else(|| "autoup.log".into(), |name| name.to_os_string());

        let appender = tracing_appender::rolling::never(directory, file_name);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let layer = fmt::layer().with_ansi(false).with_writer(writer).boxed();
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("Failed to install log subscriber")?;

    Ok(guard)
}

async fn run_command(config: &Config, quiet: bool) -> Result<()> {
    if config.enabled_projects().next().is_none() {
        bail!("No enabled projects configured");
    }

    let started = Instant::now();
    let mut supervisor = Supervisor::start(config).await;
    display::print_startup(&supervisor, quiet);

    if supervisor.is_empty() {
        bail!("No project could be started");
    }

    if !quiet {
        println!(
            "{} Mirroring {} project(s), press Ctrl-C to stop",
            style("→").green().bold(),
            supervisor.len()
        );
    }

    wait_for_shutdown().await?;
    info!("Shutdown signal received");

    supervisor.shutdown().await?;
    if !quiet {
        println!(
            "{} Stopped after {}",
            style("✓").green(),
            display::format_duration(started.elapsed())
        );
    }
    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate =
            signal(SignalKind::terminate()).context("Failed to listen for SIGTERM")?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.context("Failed to listen for Ctrl-C")?,
            _ = terminate.recv() => {}
        }
    }

    #[cfg(not(unix))]
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    Ok(())
}

async fn status_command(config: &Config, name: &str, path: Option<&Path>) -> Result<()> {
    let Some(project) = config.project(name) else {
        bail!("Unknown project '{}'", name);
    };

    let Some(tree) = autoup_sync::load(&project.snapshot_file)
        .await
        .with_context(|| format!("Failed to read snapshot of '{}'", name))?
    else {
        println!(
            "{} No snapshot yet at {}",
            style("ℹ").yellow(),
            style(project.snapshot_file.display()).cyan()
        );
        return Ok(());
    };

    let path = path.unwrap_or(project.local_base_dir.as_path());
    match tree.render_status(path) {
        Some(dump) => display::print_status(name, path, &dump),
        None => bail!("'{}' is not tracked by project '{}'", path.display(), name),
    }
    Ok(())
}

fn config_command(config: &Config, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => {
            ConfigLoader::save_to_file(config, path)
                .with_context(|| format!("Failed to write '{}'", path.display()))?;
            println!(
                "{} Configuration written to {}",
                style("⚙").blue().bold(),
                style(path.display()).cyan()
            );
        }
        None => print!("{}", ConfigLoader::render(config, None)?),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use rstest::rstest;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[rstest]
    #[case(&["autoup", "run"])]
    #[case(&["autoup", "--config", "autoup.yaml", "run"])]
    #[case(&["autoup", "status", "--project", "site"])]
    #[case(&["autoup", "status", "-p", "site", "/srv/site/css"])]
    #[case(&["autoup", "config", "--default", "--output", "out.toml"])]
    fn test_parses(#[case] args: &[&str]) {
        assert!(Cli::try_parse_from(args).is_ok());
    }

    #[test]
    fn test_status_requires_project() {
        assert!(Cli::try_parse_from(["autoup", "status"]).is_err());
    }

    #[test]
    fn test_config_written_to_file() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("autoup.toml");
        config_command(&Config::default(), Some(&path)).unwrap();
        let loaded = ConfigLoader::load_from_file(&path).unwrap();
        assert_eq!(loaded.schedule.check_interval_secs, 2);
    }
}
