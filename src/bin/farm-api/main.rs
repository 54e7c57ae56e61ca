use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use farm_api::{Config, MachineTechnology};
use tracing_subscriber::{prelude::*, EnvFilter};

mod cmd_login;
mod cmd_query;
mod cmd_run;

/// Track and dispatch jobs to a farm of 3D printers.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(name = "farm-api")]
struct Cli {
    /// Config file to use
    #[arg(long, short, env = "FARM_API_CONFIG", default_value = "farm-api.toml")]
    config: PathBuf,

    /// Log as JSON lines instead of human readable text.
    #[arg(long)]
    json: bool,

    /// Log filter used when `RUST_LOG` is unset.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Bambu cloud account email, overriding the config file.
    #[arg(long, env = "BAMBU_CLOUD_EMAIL", global = true)]
    email: Option<String>,

    /// Bambu cloud account password, overriding the config file.
    #[arg(long, env = "BAMBU_CLOUD_PASSWORD", hide_env_values = true, global = true)]
    password: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bring the fleet up and keep it live until interrupted.
    Run {
        /// Seconds between fleet summaries in the log.
        #[arg(long, default_value_t = 60)]
        summary_secs: u64,
    },

    /// Print a snapshot of every machine as JSON.
    Status {
        /// Seconds to wait for telemetry before printing.
        #[arg(long, default_value_t = 5)]
        settle_secs: u64,
    },

    /// Print the machine a job would be dispatched to, as JSON.
    Find {
        /// `FDM` or `SLA`.
        #[arg(long)]
        technology: MachineTechnology,

        /// Filament material, e.g. `PLA`.
        #[arg(long)]
        material: String,

        /// Filament color as hex, e.g. `FF0000`.
        #[arg(long)]
        color: String,

        /// Seconds to wait for telemetry before choosing.
        #[arg(long, default_value_t = 5)]
        settle_secs: u64,
    },

    /// Log in to the Bambu cloud and print the derived broker username.
    #[cfg(feature = "bambu")]
    Login {
        /// A verification code emailed by the cloud.
        #[arg(long)]
        verification_code: Option<String>,
    },
}

async fn handle_signals() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt()).map_err(|e| {
            tracing::error!(error = format!("{:?}", e), "Failed to set up SIGINT handler");
            e
        })?;
        let mut sigterm = signal(SignalKind::terminate()).map_err(|e| {
            tracing::error!(error = format!("{:?}", e), "Failed to set up SIGTERM handler");
            e
        })?;

        tokio::select! {
            _ = sigint.recv() => {
                tracing::info!("received SIGINT");
            }
            _ = sigterm.recv() => {
                tracing::info!("received SIGTERM");
            }
        }
    }

    #[cfg(windows)]
    {
        tokio::signal::ctrl_c().await.map_err(|e| {
            tracing::error!(error = format!("{:?}", e), "Failed to set up Ctrl+C handler");
            anyhow::Error::new(e)
        })?;

        tracing::info!("received Ctrl+C (SIGINT)");
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&cli.log_level))?;
    let (text, json) = if cli.json {
        (None, Some(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr)))
    } else {
        (Some(tracing_subscriber::fmt::layer().with_writer(std::io::stderr)), None)
    };

    // Initialize tracing.
    tracing_subscriber::registry().with(filter).with(text).with(json).init();

    let mut cfg = Config::from_file(&cli.config)?;
    cfg.override_cloud_credentials(cli.email.clone(), cli.password.clone());

    match cli.command {
        Commands::Run { summary_secs } => cmd_run::main(&cfg, summary_secs).await,
        Commands::Status { settle_secs } => cmd_query::status(&cfg, settle_secs).await,
        Commands::Find {
            technology,
            ref material,
            ref color,
            settle_secs,
        } => cmd_query::find(&cfg, technology, material, color, settle_secs).await,
        #[cfg(feature = "bambu")]
        Commands::Login { ref verification_code } => cmd_login::main(&cfg, verification_code.clone()).await,
    }
}
