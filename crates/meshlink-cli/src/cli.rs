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
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a node until interrupted
    Run {
        /// Extra listener URI, e.g. tcp://[::]:9001
        #[arg(short, long)]
        listen: Vec<String>,
        /// Extra peer URI to call at startup
        #[arg(short, long)]
        peer: Vec<String>,
        /// Local interface to dial peers from
        #[arg(short, long)]
        interface: Option<String>,
    },
    /// Print a fresh ed25519 key pair
    Genkey,
}
