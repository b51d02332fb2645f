//! ---
//! gr_section: "01-core-runtime"
//! gr_subsection: "binary"
//! gr_type: "source"
//! gr_scope: "code"
//! gr_description: "Binary entrypoint for the Ghost Rover daemon."
//! gr_version: "v0.1.0"
//! gr_owner: "tbd"
//! ---
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use gr_common::config::AppConfig;
use gr_common::logging::{init_tracing, LogFormat};
use gr_common::metrics::{new_registry, RoverMetrics};
use gr_common::version::VersionInfo;
use gr_core::RoverRuntime;
use tokio::signal;
use tracing::{error, info, warn};

const DEFAULT_CONFIG: &str = "configs/rover.toml";

#[derive(Debug, Parser)]
#[command(
    author,
    disable_version_flag = true,
    about = "Ghost Rover telemetry broadcaster",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(long, value_enum, help = "Override the stdout log format")]
    log_format: Option<CliLogFormat>,

    #[arg(
        short = 'V',
        long = "version",
        action = ArgAction::SetTrue,
        help = "Print extended version information and exit"
    )]
    version: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliLogFormat {
    Pretty,
    StructuredJson,
}

impl From<CliLogFormat> for LogFormat {
    fn from(value: CliLogFormat) -> Self {
        match value {
            CliLogFormat::Pretty => LogFormat::Pretty,
            CliLogFormat::StructuredJson => LogFormat::StructuredJson,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Run the broadcaster")]
    Run,
    #[command(about = "Load and validate the configuration, then exit")]
    CheckConfig,
    #[command(about = "Print the effective configuration as TOML")]
    PrintConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let version = VersionInfo::current();
    if cli.version {
        println!("{}", version.extended());
        return Ok(());
    }

    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from(DEFAULT_CONFIG));

    let loaded = AppConfig::load_with_source(&candidates)?;
    let mut config = loaded.config;
    if let Some(format) = cli.log_format {
        config.logging.format = format.into();
    }

    match cli.command.unwrap_or(Commands::Run) {
        Commands::CheckConfig => {
            println!("configuration OK: {}", loaded.source.display());
            Ok(())
        }
        Commands::PrintConfig => {
            let rendered =
                toml::to_string_pretty(&config).context("failed to render configuration")?;
            print!("{rendered}");
            Ok(())
        }
        Commands::Run => {
            init_tracing("gr-roverd", &config.logging)?;
            info!(
                config = %loaded.source.display(),
                version = %version.banner(),
                "configuration loaded"
            );
            if let Err(err) = run_daemon(config).await {
                error!(error = %format!("{err:#}"), "rover daemon stopped on fatal error");
                return Err(err);
            }
            Ok(())
        }
    }
}

/// Run runtimes until ctrl-c; a restart request rebuilds the runtime from
/// the same configuration.
async fn run_daemon(config: AppConfig) -> Result<()> {
    let metrics = RoverMetrics::new(new_registry())?;
    loop {
        let handle = RoverRuntime::new(config.clone(), metrics.clone())
            .start()
            .await?;
        if !handle.startup_report().is_clean() {
            warn!(degraded = ?handle.startup_report().degraded, "running with degraded peripherals");
        }

        let restart = tokio::select! {
            result = signal::ctrl_c() => {
                result.context("failed to listen for ctrl-c")?;
                info!("ctrl-c received; shutting down");
                false
            }
            _ = handle.restart_requested() => {
                info!("restart requested by client");
                true
            }
        };

        handle.shutdown().await?;
        if !restart {
            return Ok(());
        }
        info!("restarting rover runtime");
    }
}
