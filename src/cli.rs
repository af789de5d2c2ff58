use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(name = "micropitch", about = "MicroPitch - realtime pitch delivery coaching")]
pub struct CliArgs {
    /// Settings file (defaults to <config dir>/micropitch/settings.json)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug mode with verbose logging
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the coaching backend (ephemeral keys, /chat, webhook)
    Serve {
        /// Address to listen on, overrides the settings file
        #[arg(long)]
        bind: Option<String>,
    },
    /// Mint one ephemeral realtime key and print it as JSON
    MintKey,
    /// Ask the coach about a single utterance
    CoachTurn {
        text: String,
    },
    /// Drive a coaching session from a recorded JSONL event log
    Replay {
        file: PathBuf,
    },
    /// Write default settings
    InitConfig {
        #[arg(long)]
        path: Option<PathBuf>,
    },
}
