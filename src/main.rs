mod cli;
mod demo;

use clap::Parser;
use classsync_core::error::{ClassSyncError, DomainError};
use classsync_core::Config;
use classsync_queue::{QueueStorage, SqliteQueueStorage};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::cli::{Cli, Commands, QueueCommands};

#[tokio::main]
async fn main() -> Result<(), ClassSyncError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("classsync=info,warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();

    // Handle ConfigSample without loading config
    if let Commands::ConfigSample { output } = &cli.command {
        let path = output
            .clone()
            .unwrap_or_else(|| PathBuf::from("./classsync.sample.yaml"));
        Config::sample().save(&path)?;
        println!("Sample configuration written to {:?}", path);
        return Ok(());
    }

    let config = load_config(&cli.config_path)?;

    match cli.command {
        Commands::ConfigSample { .. } => {
            // Already handled
        }
        Commands::Queue { command } => match command {
            QueueCommands::List { db } => {
                let storage = open_queue(db, &config)?;
                let restored = storage.load()?;
                if restored.actions.is_empty() {
                    println!("No pending actions");
                } else {
                    println!("Pending actions ({}):", restored.actions.len());
                    for action in restored.actions {
                        println!("  • {}", action);
                    }
                }
                for entry in restored.corrupt {
                    println!(
                        "Set aside unreadable entry {} ({}): {}",
                        entry.id, entry.action_type, entry.reason
                    );
                }
            }
            QueueCommands::Clear { db } => {
                let storage = open_queue(db, &config)?;
                let removed = storage.clear()?;
                println!("Removed {} pending actions", removed);
            }
        },
        Commands::Demo { students, slides } => {
            demo::run(config, students, slides)
                .await
                .map_err(|e| ClassSyncError::Other(format!("{:#}", e)))?;
        }
    }

    Ok(())
}

/// Explicit paths must exist; otherwise fall back to defaults
fn load_config(path: &Option<String>) -> Result<Config, ClassSyncError> {
    match Config::load(path) {
        Err(ClassSyncError::Domain(DomainError::ConfigNotFound { .. })) if path.is_none() => {
            info!("No config file found, using defaults");
            Ok(Config::default())
        }
        other => other,
    }
}

fn open_queue(db: Option<PathBuf>, config: &Config) -> Result<SqliteQueueStorage, ClassSyncError> {
    let path = db.unwrap_or_else(|| config.queue.db_path.clone());
    info!("Opening queue {:?}", path);
    Ok(SqliteQueueStorage::open(&path)?)
}
