//! Main entry point for the PostAssist service.

use anyhow::Result;
use clap::Parser;
use postassist::{cli, server, settings::Settings, telemetry};

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();

    telemetry::init()?;

    let settings = Settings::load()?;

    match args.command {
        cli::Commands::Serve => server::serve(settings).await,
    }
}
