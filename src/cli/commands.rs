//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - watch: run the scheduler until Ctrl-C
//! - check: run one poll iteration
//! - list: list tasks with their due labels
//! - alert: push a synthetic task through the delivery chain
//! - status: print scheduler status as JSON

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Tasky - due-task notifications for the Tasky task manager
#[derive(Parser, Debug)]
#[command(name = "tasky")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the scheduler against the task database until Ctrl-C
    Watch {
        /// Task database (defaults to storage.database)
        #[arg(long)]
        db: Option<PathBuf>,
    },

    /// Deliver every currently due task once and exit
    Check {
        /// Task database (defaults to storage.database)
        #[arg(long)]
        db: Option<PathBuf>,
    },

    /// List tasks with their due labels
    List {
        /// Task database (defaults to storage.database)
        #[arg(long)]
        db: Option<PathBuf>,

        /// Show only tasks that are due now
        #[arg(long)]
        due: bool,
    },

    /// Push a synthetic due task through every alert channel
    Alert {
        /// Task title
        title: String,

        /// Task description
        #[arg(short, long)]
        description: Option<String>,
    },

    /// Start the scheduler, print its status as JSON, then stop it
    Status {
        /// Task database (defaults to storage.database)
        #[arg(long)]
        db: Option<PathBuf>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_watch_with_db() {
        let cli = Cli::try_parse_from(["tasky", "watch", "--db", "/tmp/t.db"]).unwrap();
        match cli.command {
            Commands::Watch { db } => assert_eq!(db, Some(PathBuf::from("/tmp/t.db"))),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_list_due_with_global_flags() {
        let cli = Cli::try_parse_from(["tasky", "list", "--due", "-v", "--config", "x.yml"]).unwrap();
        assert!(cli.is_verbose());
        assert_eq!(cli.config, Some(PathBuf::from("x.yml")));
        assert!(matches!(cli.command, Commands::List { due: true, db: None }));
    }

    #[test]
    fn test_parse_alert() {
        let cli = Cli::try_parse_from(["tasky", "alert", "Call mom", "-d", "birthday"]).unwrap();
        match cli.command {
            Commands::Alert { title, description } => {
                assert_eq!(title, "Call mom");
                assert_eq!(description.as_deref(), Some("birthday"));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_subcommand_required() {
        assert!(Cli::try_parse_from(["tasky"]).is_err());
    }
}
