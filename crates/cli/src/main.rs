mod app;

use std::{
    fs::{self, OpenOptions},
    path::PathBuf,
};

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "railgrab")]
#[command(about = "Keep polling a rail platform until a seat can be held", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to <config_dir>/railgrab/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a commented default configuration if none exists.
    Init,
    /// Run configured watches until each one ends.
    Run {
        /// Only run the named watch.
        #[arg(long)]
        watch: Option<String>,
    },
    /// List reservations currently held on the platform.
    Reservations,
    /// Cancel a reservation by id.
    Cancel {
        /// Reservation id as shown by `reservations`.
        id: String,
    },
    /// Show recorded runs, newest first.
    History {
        /// Maximum number of runs to show.
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging()?;

    let config_path = cli
        .config
        .unwrap_or_else(railgrab_core::config::default_config_path);

    match cli.command {
        Command::Init => app::init(&config_path),
        Command::Run { watch } => app::run_watches(&config_path, watch.as_deref()).await,
        Command::Reservations => app::list_reservations(&config_path).await,
        Command::Cancel { id } => app::cancel_reservation(&config_path, &id).await,
        Command::History { limit } => app::history(&config_path, limit),
    }
}

fn init_logging() -> Result<()> {
    let log_dir = std::env::current_dir()?.join("logs");
    fs::create_dir_all(&log_dir)?;
    let log_path = log_dir.join("railgrab.log");
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .compact()
        .with_writer(std::io::stdout);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_ansi(false)
        .compact()
        .with_writer(std::sync::Mutex::new(log_file));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    Ok(())
}
