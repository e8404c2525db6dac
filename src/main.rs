use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use onboard::config::OnboardConfig;
use onboard::ui::UiMode;

mod cmd;

#[derive(Parser)]
#[command(name = "onboard")]
#[command(version, about = "Live onboarding progress tracker")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Path to onboard.toml. Defaults to .onboard/onboard.toml in the project directory
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Follow an onboarding job's progress until it completes
    Track {
        /// Existing job/customer id to subscribe to
        #[arg(long, conflicts_with = "start")]
        job_id: Option<String>,

        /// Start a new job with this JSON payload, then track it
        #[arg(long)]
        start: Option<PathBuf>,

        /// Channel URL template (overrides config and ONBOARD_WS_URL)
        #[arg(long)]
        ws_url: Option<String>,

        /// Onboarding API base URL (overrides config and ONBOARD_API_URL)
        #[arg(long)]
        api_url: Option<String>,

        /// UI output mode: full, minimal, json
        #[arg(long, default_value = "full")]
        ui: String,
    },
    /// Run a local relay publisher for development
    Serve {
        /// Port to serve on
        #[arg(short, long, default_value = "8765")]
        port: u16,

        /// Bind on all interfaces with permissive CORS
        #[arg(long)]
        dev: bool,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Write a default onboard.toml
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    onboard::telemetry::init_tracing(cli.verbose, cli.json_logs)?;

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Track {
            job_id,
            start,
            ws_url,
            api_url,
            ui,
        } => {
            let config = OnboardConfig::with_cli_args(
                &project_dir,
                cli.config.clone(),
                ws_url.clone(),
                api_url.clone(),
            )?;
            cmd::cmd_track(&config, job_id.as_deref(), start.as_deref(), UiMode::parse(ui))
                .await?;
        }
        Commands::Serve { port, dev } => cmd::cmd_serve(*port, *dev).await?,
        Commands::Config { command } => {
            let config = OnboardConfig::new(&project_dir, cli.config.clone())?;
            cmd::cmd_config(&config, command.clone())?;
        }
    }

    Ok(())
}
