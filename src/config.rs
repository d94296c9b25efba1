use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub const DEFAULT_API_URL: &str = "http://127.0.0.1:5000";

#[derive(Debug, Parser)]
#[command(author, version, about = "Terminal client for the DietMate assistant", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Base URL of the DietMate backend
    #[arg(long, env = "DIETMATE_API_URL", default_value = DEFAULT_API_URL, global = true)]
    pub api_url: String,

    /// Write logs to this file (the chat UI discards logs otherwise)
    #[arg(long, env = "DIETMATE_LOG_FILE", global = true)]
    pub log_file: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Open the interactive chat (default)
    Chat,
    /// Ask a single question and stream the answer to stdout
    Ask {
        /// The question to send
        #[arg(required_unless_present = "file")]
        prompt: Vec<String>,

        /// Attach a text file to the question
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
    /// Browse and purchase diets
    Diets {
        #[command(subcommand)]
        action: DietsCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum DietsCommand {
    /// List all available diets
    List,
    /// Show a single diet
    Show { id: u64 },
    /// Purchase a diet
    Buy {
        id: u64,
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: Option<String>,
    },
}

/// Settings resolved from the command line and environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub api_url: String,
    pub log_file: Option<PathBuf>,
    pub verbose: bool,
    pub interactive: bool,
}

impl Config {
    pub fn from_cli(cli: &Cli) -> Self {
        let interactive = matches!(cli.command, None | Some(Command::Chat));
        Self {
            api_url: cli.api_url.trim_end_matches('/').to_string(),
            log_file: cli.log_file.clone(),
            verbose: cli.verbose,
            interactive,
        }
    }

    pub fn log_directive(&self) -> &'static str {
        if self.verbose { "debug" } else { "info" }
    }
}
