//! overflow-gate CLI entry point.

mod cli;

use clap::Parser;
use cli::Cli;
use overflow_gate::GateNodeBuilder;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    let log_json = cli.log_json;
    let config = cli.into_config()?;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let registry = tracing_subscriber::registry().with(filter);
    if log_json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }

    info!("overflow-gate v{}", env!("CARGO_PKG_VERSION"));

    // Missing ledger settings are fatal at startup.
    let target = config.ledger.validate()?;
    info!(
        network = %target.network,
        treasury = %target.treasury_object_id,
        "Ledger configuration loaded"
    );

    let mut node = GateNodeBuilder::new(config).build().await?;
    info!(addr = %node.local_addr(), "Listening");

    node.run().await?;

    info!("Goodbye!");
    Ok(())
}
