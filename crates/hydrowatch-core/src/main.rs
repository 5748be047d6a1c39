//! HydroWatch CLI
//!
//! Command-line interface for the HydroWatch telemetry collector.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use hydrowatch::collector::Collector;
use hydrowatch::config::{Config, LogFormat};
use hydrowatch::db::PostgresPool;

/// HydroWatch - hydroponic telemetry ingestion and alerting
#[derive(Parser)]
#[command(name = "hydrowatch")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, env = "HYDROWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the collector
    Serve {
        /// HTTP API port (overrides the configuration)
        #[arg(long)]
        http_port: Option<u16>,

        /// Do not connect to the MQTT broker
        #[arg(long)]
        no_mqtt: bool,
    },

    /// Run database migrations
    Migrate,

    /// Print the effective configuration as JSON
    Config,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Error reading .env: {e}");
        }
    }

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    let _log_guard = init_logging(&config, cli.verbose);

    let result = match cli.command {
        Commands::Serve { http_port, no_mqtt } => run_serve(config, http_port, no_mqtt).await,
        Commands::Migrate => run_migrate(&config).await,
        Commands::Config => print_config(&config),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(config: &Config, verbose: bool) -> WorkerGuard {
    let level = if verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let (writer, guard) = tracing_appender::non_blocking(std::io::stdout());

    let registry = tracing_subscriber::registry().with(filter);
    match config.logging.format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(writer))
            .init(),
        LogFormat::Pretty => registry
            .with(fmt::layer().with_target(true).with_writer(writer))
            .init(),
    }

    guard
}

fn install_metrics() -> Option<PrometheusHandle> {
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "Prometheus recorder not installed");
            None
        }
    }
}

async fn run_serve(
    mut config: Config,
    http_port: Option<u16>,
    no_mqtt: bool,
) -> anyhow::Result<()> {
    if let Some(port) = http_port {
        config.server.http_port = port;
    }
    if no_mqtt {
        config.mqtt.enabled = false;
    }

    info!(
        http = %config.http_addr(),
        mqtt = config.mqtt.enabled,
        database = config.database.enabled,
        "Starting HydroWatch"
    );

    let mut collector = Collector::new(config).await?;
    if let Some(handle) = install_metrics() {
        collector.set_prometheus(handle);
    }
    collector.start().await?;
    Ok(())
}

async fn run_migrate(config: &Config) -> anyhow::Result<()> {
    if !config.database.enabled {
        warn!("database.enabled is false; migrating anyway");
    }
    let pool = PostgresPool::new(&config.database).await?;
    pool.migrate().await?;
    info!("Migrations applied");
    Ok(())
}

fn print_config(config: &Config) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}
