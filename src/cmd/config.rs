//! Configuration view and validation commands (`onboard config`).

use anyhow::{Context, Result};

use super::super::ConfigCommands;
use onboard::config::{OnboardConfig, OnboardToml};

pub fn cmd_config(config: &OnboardConfig, command: Option<ConfigCommands>) -> Result<()> {
    let path = &config.config_path;

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Onboard Configuration");
            println!("=====================");
            println!();
            if path.exists() {
                println!("Config file: {}", path.display());
            } else {
                println!("No onboard.toml found at {}", path.display());
                println!("Using default configuration.");
            }
            println!();

            let toml = &config.toml;
            println!("[channel]");
            println!("  url = \"{}\"", toml.channel.url);
            println!("  reconnect_delay_secs = {}", toml.channel.reconnect_delay_secs);
            println!("  connect_timeout_secs = {}", toml.channel.connect_timeout_secs);
            println!("  idle_timeout_secs = {}", toml.channel.idle_timeout_secs);
            println!();
            println!("[supervisor]");
            println!("  poll_interval_ms = {}", toml.supervisor.poll_interval_ms);
            println!("  completion_threshold = {}", toml.supervisor.completion_threshold);
            println!("  hard_timeout_secs = {}", toml.supervisor.hard_timeout_secs);
            println!();
            println!("[api]");
            println!("  base_url = \"{}\"", toml.api.base_url);
            println!(
                "  token = {}",
                if toml.api.token.is_some() { "(set)" } else { "(unset)" }
            );
            println!();

            println!("Effective values (with env/CLI overrides):");
            println!("  channel url = \"{}\"", config.ws_url());
            println!("  api url = \"{}\"", config.api_url());
            println!(
                "  api token = {}",
                if config.api_token().is_some() { "(set)" } else { "(unset)" }
            );
            println!();
        }
        Some(ConfigCommands::Validate) => {
            let warnings = config.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in &warnings {
                    println!("  - {}", warning);
                }
            }
        }
        Some(ConfigCommands::Init) => {
            if path.exists() {
                println!("Config file already exists: {}", path.display());
                return Ok(());
            }
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create config directory: {}", parent.display())
                })?;
            }
            OnboardToml::default().save(path)?;
            println!("Created {}", path.display());
        }
    }

    Ok(())
}
