//! kvbridge binary
//!
//! Connects to the backing store, then serves the REST API until Ctrl-C.

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use kvb_client::SessionPool;
use kvb_server::cli::{self, Args};
use kvb_server::BridgeServer;

#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,kvb_server=debug,kvb_client=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    match run(Args::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{:#}", err);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = args.into_config()?;
    tracing::info!("kvbridge v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Store address: {}", config.store_addr);
    tracing::info!(
        "Max retries: {}, base delay: {:?}",
        config.max_retries,
        config.retry_delay_base()
    );

    let pool = SessionPool::connect(cli::pool_config(&config)).await?;
    BridgeServer::new(config, pool).serve().await?;
    Ok(())
}
