use anyhow::{Context, Result};
use clap::Parser;
use market_bridge::cli::Cli;
use market_bridge::logging::init_logging;
use market_bridge::{ProxyContext, Server};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = cli.into_config()?;

    // Dropping the guard at the end of run() flushes buffered file logs
    let _log_guard = init_logging(&config.log)?;

    // Display version information
    info!("Market Bridge v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Upstream: {}:{}, workers: {}",
        config.upstream.host, config.upstream.port, config.server.workers
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.server.workers)
        .thread_name("market-bridge-worker")
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    let result = runtime.block_on(async {
        let context = Arc::new(ProxyContext::from_config(&config)?);
        let server = Server::bind(&config.server, context).await?;
        server.run_until(shutdown_signal()).await
    });

    if let Err(e) = &result {
        error!("Server stopped with error: {:#}", e);
    }
    result
}

/// Resolves on Ctrl+C; never resolves if the handler cannot be installed
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
