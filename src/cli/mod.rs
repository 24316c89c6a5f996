//! CLI command definitions and parsing
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "retrospector",
    version,
    about = "Match observed entities against threat-intel indicators and alert on hits",
    long_about = "Retrospector stores entities observed in your environment and indicators of \
                  compromise from threat-intelligence feeds, correlates them by exact typed value, \
                  and posts an alert to a webhook when a newly produced batch of entities matches."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/retrospector/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write JSON-lines entities to a blob location through the entity transport
    Write {
        #[arg(long)]
        region: String,

        /// Bucket-equivalent container name
        #[arg(long)]
        container: String,

        /// Object path within the container
        #[arg(long)]
        path: String,

        /// JSON-lines entity file ("-" for stdin)
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Persist the entities of every blob named by a trigger envelope
    Store {
        /// Trigger envelope JSON file ("-" for stdin)
        #[arg(short, long)]
        event: PathBuf,
    },

    /// Run detection for every blob named by a trigger envelope
    Detect {
        /// Trigger envelope JSON file ("-" for stdin)
        #[arg(short, long)]
        event: PathBuf,
    },

    /// Load JSON-lines IOCs into the repository
    PutIocs {
        /// JSON-lines IOC file ("-" for stdin)
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Print stored entities matching JSON-lines IOCs
    Scan {
        /// JSON-lines IOC file ("-" for stdin)
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Validate configuration file
    Validate {
        /// Path to config file (defaults to standard location)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Initialize default configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
