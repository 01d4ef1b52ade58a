#![warn(clippy::all, clippy::pedantic)]

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use upwatch_service::config::Config;
use upwatch_service::orchestrator::Orchestrator;
use upwatch_service::pool::open_pool;

#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Path to the configuration file, created with defaults when missing
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    logger::init();

    let cli = Cli::parse();
    let config = Config::from_config(cli.config.as_ref())?;
    config.validate()?;
    info!("{}", config);

    let pool = open_pool(&config.database.path, config.database.max_connections).await?;
    Orchestrator::start(config, pool).await
}
