//! Command line interface definitions.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "postassist", version, about = "LinkedIn ML paper post generation service")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP server.
    Serve,
}
