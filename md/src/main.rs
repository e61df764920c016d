//! md - the missiond binary

use clap::Parser;
use eyre::Result;
use tracing_subscriber::EnvFilter;

use missiond::cli::{Cli, run};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    run(cli).await
}
