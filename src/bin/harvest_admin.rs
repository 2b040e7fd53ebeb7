//! Harvest administration tool
//!
//! Inspects and maintains the persisted crawl state (checkpoint and dedup store)
//! described by a harvester configuration file.
//!
//! Run with: cargo run --bin harvest-admin -- --config ./harvester.json status

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{Span, info};

use listing_harvester::infrastructure::{
    CheckpointStore, ConfigManager, DedupStore, HarvestConfig, init_logging_with_config,
};

#[derive(Parser)]
#[command(name = "harvest-admin")]
#[command(about = "Inspect and maintain listing harvester crawl state", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to the per-user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a starter configuration file.
    Init {
        #[arg(long)]
        list_url: String,
        #[arg(long, default_value_t = 50)]
        early_exit: u32,
        #[arg(long, default_value_t = 10)]
        save_interval: u32,
    },

    /// Print resume information for the last crawl.
    Status,

    /// List items in the failed backlog.
    Failed,

    /// Delete the checkpoint file.
    Clear {
        /// Also forget every fingerprint in the dedup store
        #[arg(long)]
        seen: bool,
    },

    /// Copy the checkpoint next to itself.
    Backup {
        #[arg(long)]
        suffix: Option<String>,
    },

    /// Print dedup store statistics.
    DedupStats,

    /// Report configuration problems without loading any state.
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let manager = match &cli.config {
        Some(path) => ConfigManager::with_path(path),
        None => ConfigManager::new()?,
    };

    match cli.command {
        Command::Init {
            list_url,
            early_exit,
            save_interval,
        } => {
            let config = HarvestConfig::new(list_url, early_exit, save_interval);
            manager.save_config(&config).await?;
            println!("✅ Wrote {}", manager.config_path().display());
        }
        Command::CheckConfig => check_config(&manager).await?,
        command => {
            let config = manager.load_config().await?;
            init_logging_with_config(&config.logging)?;
            info!("🛠️ harvest-admin using {:?}", manager.config_path());
            run_state_command(command, &config)?;
        }
    }
    Ok(())
}

async fn check_config(manager: &ConfigManager) -> Result<()> {
    let content = tokio::fs::read_to_string(manager.config_path())
        .await
        .with_context(|| format!("Failed to read {}", manager.config_path().display()))?;
    let config: HarvestConfig = serde_json::from_str(&content).context("Configuration is not valid")?;

    let problems = config.validate();
    if problems.is_empty() {
        println!("✅ Configuration is valid");
        return Ok(());
    }
    for problem in &problems {
        println!("❌ {problem}");
    }
    anyhow::bail!("{} configuration problem(s)", problems.len())
}

fn run_state_command(command: Command, config: &HarvestConfig) -> Result<()> {
    let mut checkpoint = CheckpointStore::new(
        &config.checkpoint.directory,
        &config.checkpoint.filename,
        config.checkpoint.save_interval,
        Span::none(),
    );

    match command {
        Command::Status => {
            if !checkpoint.load() {
                println!("No checkpoint at {}", checkpoint.path().display());
                return Ok(());
            }
            println!("{}", serde_json::to_string_pretty(&checkpoint.resume_info())?);
        }
        Command::Failed => {
            checkpoint.load();
            if checkpoint.failed_items().is_empty() {
                println!("No failed items");
            }
            for item in checkpoint.failed_items() {
                println!("{}\t{}\t{}", item.item_id, item.timestamp.to_rfc3339(), item.error);
            }
        }
        Command::Clear { seen } => {
            if checkpoint.clear()? {
                println!("🗑️ Removed {}", checkpoint.path().display());
            } else {
                println!("No checkpoint to remove");
            }
            if seen {
                let mut dedup = DedupStore::new(&config.deduplication, Span::none());
                dedup.clear();
                dedup.save()?;
                println!("🗑️ Cleared dedup store");
            }
        }
        Command::Backup { suffix } => {
            let path = checkpoint.backup(suffix.as_deref())?;
            println!("💾 Backup written to {}", path.display());
        }
        Command::DedupStats => {
            let dedup = DedupStore::new(&config.deduplication, Span::none());
            println!("{}", serde_json::to_string_pretty(&dedup.stats())?);
        }
        Command::Init { .. } | Command::CheckConfig => {}
    }
    Ok(())
}
