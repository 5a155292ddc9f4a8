use clap::Parser;
use poolnode::{
    cli,
    setup_logging, setup_tracing,
    sharechain::ShareChain,
    stratum::Server,
};
use std::error::Error;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = cli::Cli::parse();
    let log_filter = if args.debug { "debug" } else { "info" };
    setup_logging(log_filter);
    setup_tracing(log_filter)?;
    log::info!("{} - {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    log::debug!("Debug logging enabled");

    let config = args.node_config()?;
    let share_chain = ShareChain::new();
    let server = Arc::new(Server::new(config.stratum, &share_chain));

    let mut stratum_handle = tokio::spawn(server.clone().accept());
    tokio::select! {
        result = &mut stratum_handle => {
            // The listener only returns on its own when binding or accepting failed.
            result??;
        }
        signal = tokio::signal::ctrl_c() => {
            signal?;
            tracing::info!("Shutdown signal received, closing the stratum server");
            server.close().await;
            stratum_handle.await??;
        }
    }
    Ok(())
}
