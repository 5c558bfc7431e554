use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "classsync", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file path
    #[arg(short, long, value_name = "FILE")]
    pub config_path: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate sample configuration
    ConfigSample {
        /// Output path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Inspect or reset the local offline queue
    Queue {
        #[command(subcommand)]
        command: QueueCommands,
    },

    /// Run a live session in-process against the in-memory store
    Demo {
        /// Number of student clients
        #[arg(long, default_value_t = 3)]
        students: usize,

        /// Number of slides in the lesson
        #[arg(long, default_value_t = 5)]
        slides: u32,
    },
}

#[derive(Subcommand, Debug)]
pub enum QueueCommands {
    /// List pending actions, oldest first
    List {
        /// Queue database (defaults to queue.db_path from the config)
        #[arg(long, value_name = "FILE")]
        db: Option<PathBuf>,
    },
    /// Drop every pending action
    Clear {
        #[arg(long, value_name = "FILE")]
        db: Option<PathBuf>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demo_defaults() {
        let cli = Cli::try_parse_from(["classsync", "demo"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Demo {
                students: 3,
                slides: 5
            }
        ));
    }

    #[test]
    fn test_queue_list_with_db() {
        let cli =
            Cli::try_parse_from(["classsync", "-c", "cfg.yaml", "queue", "list", "--db", "q.db"])
                .unwrap();
        assert_eq!(cli.config_path.as_deref(), Some("cfg.yaml"));
        match cli.command {
            Commands::Queue {
                command: QueueCommands::List { db },
            } => assert_eq!(db, Some(PathBuf::from("q.db"))),
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
