//! Command-line interface definitions and parsing

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<String>,

    /// Simulate a slow, lossy service
    #[arg(long)]
    pub unreliable: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start interactive chat mode
    Chat {
        /// Your display name
        #[arg(short, long, default_value = "Anonymous")]
        name: String,
    },
    /// Send a single message and wait for its delivery status
    Send {
        /// Server id of the activity this message answers
        #[arg(short, long)]
        reply_to: Option<String>,
        /// Print the confirmed activity as JSON
        #[arg(long)]
        json: bool,
        /// Message content
        message: String,
    },
}
