//! CLI definitions for chat-relay.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "chat-relay")]
#[command(about = "Relay messages between browser chat tabs and a local WebSocket endpoint")]
#[command(version)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Run the relay daemon in the foreground
    Run {
        /// Relay endpoint, overrides the config file
        #[arg(long)]
        endpoint: Option<String>,

        /// Chrome remote-debugging port, overrides the config file
        #[arg(long)]
        chrome_port: Option<u16>,
    },

    /// Show site status and relay statistics
    Status {
        /// Refresh every two seconds
        #[arg(long)]
        watch: bool,
    },

    /// Open a chat site in the relay Chrome
    Open {
        /// Site key (claude, gemini)
        site: String,
    },

    /// Arm relaying once both chat tabs are open
    Arm,
}
