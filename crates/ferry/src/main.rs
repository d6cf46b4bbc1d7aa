// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `ferry` - inspect the offline state of a Ferry client.

mod inspect;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use colored::Colorize;

use ferry_config::FerryConfig;
use ferry_core::SyncError;

/// Inspect the offline queue and cache of a Ferry client.
#[derive(Parser, Debug)]
#[command(name = "ferry", version, about, long_about = None)]
struct Cli {
    /// Read configuration from this file instead of the standard locations.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print machine-readable JSON.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Inspect queued mutations.
    Queue {
        #[command(subcommand)]
        action: QueueCommand,
    },
    /// Inspect the reconciliation cache.
    Cache {
        #[command(subcommand)]
        action: CacheCommand,
    },
    /// Manage configuration.
    Config {
        #[command(subcommand)]
        action: ConfigCommand,
    },
}

#[derive(Subcommand, Debug)]
enum QueueCommand {
    /// List pending actions in execution order.
    List,
    /// Drop every pending action.
    Clear,
}

#[derive(Subcommand, Debug)]
enum CacheCommand {
    /// Show the cached records of one entity.
    Show {
        /// Entity id (conversation, job, ...).
        entity: String,
    },
    /// List pending records older than the staleness threshold.
    Unconfirmed,
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Validate configuration and print the effective values.
    Check,
}

fn load_config(path: Option<&PathBuf>) -> FerryConfig {
    let loaded = match path {
        Some(path) => ferry_config::load_and_validate_path(path),
        None => ferry_config::load_and_validate(),
    };
    match loaded {
        Ok(config) => config,
        Err(errors) => {
            ferry_config::render_errors(&errors);
            std::process::exit(1);
        }
    }
}

fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("ferry={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

fn config_check(config: &FerryConfig, json: bool) -> Result<(), SyncError> {
    if json {
        let rendered = serde_json::to_string_pretty(config)
            .map_err(|e| SyncError::Internal(format!("failed to encode config: {e}")))?;
        println!("{rendered}");
    } else {
        let rendered = render_config(config)?;
        println!("{} configuration is valid\n", "ok:".green().bold());
        println!("{rendered}");
    }
    Ok(())
}

/// Effective configuration, one `[section]` block per config section.
fn render_config(config: &FerryConfig) -> Result<String, SyncError> {
    let value = serde_json::to_value(config)
        .map_err(|e| SyncError::Internal(format!("failed to encode config: {e}")))?;
    let mut out = String::new();
    if let serde_json::Value::Object(sections) = value {
        for (section, fields) in sections {
            out.push_str(&format!("[{section}]\n"));
            if let serde_json::Value::Object(fields) = fields {
                for (key, value) in fields {
                    out.push_str(&format!("{key} = {value}\n"));
                }
            }
            out.push('\n');
        }
    }
    Ok(out)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref());
    init_tracing(&config.client.log_level);

    let result = match &cli.command {
        Commands::Queue { action } => match action {
            QueueCommand::List => inspect::queue_list(&config, cli.json).await,
            QueueCommand::Clear => inspect::queue_clear(&config, cli.json).await,
        },
        Commands::Cache { action } => match action {
            CacheCommand::Show { entity } => inspect::cache_show(&config, entity, cli.json).await,
            CacheCommand::Unconfirmed => inspect::cache_unconfirmed(&config, cli.json).await,
        },
        Commands::Config { action } => match action {
            ConfigCommand::Check => config_check(&config, cli.json),
        },
    };

    if let Err(e) = result {
        eprintln!("{} {e}", "error:".red().bold());
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_nested_commands_with_global_flags() {
        let cli = Cli::try_parse_from(["ferry", "cache", "show", "conv-1", "--json"]).unwrap();
        assert!(cli.json);
        assert!(matches!(
            cli.command,
            Commands::Cache {
                action: CacheCommand::Show { ref entity }
            } if entity == "conv-1"
        ));
    }

    #[test]
    fn default_config_renders_every_section() {
        let rendered = render_config(&FerryConfig::default()).unwrap();
        for section in ["[client]", "[storage]", "[queue]", "[channel]", "[cache]"] {
            assert!(rendered.contains(section), "missing {section}");
        }
        assert!(rendered.contains("max_retries = 3"));
    }
}
