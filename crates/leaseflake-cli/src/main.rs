#![doc = include_str!("../README.md")]

mod commands;
mod config;
mod telemetry;

use clap::Parser;
use config::{AppConfig, CliArgs, Command};
use telemetry::init_telemetry;
use tokio::signal;
use tokio_util::sync::CancellationToken;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = AppConfig::try_from(args)?;

    init_telemetry()?;
    log_startup_info(&config);

    match config.command {
        Command::Generate {
            count,
            instances,
            quiet,
        } => {
            let cancel = CancellationToken::new();
            let signal = tokio::spawn(shutdown_signal(cancel.clone()));
            let result = commands::generate(&config.generator, count, instances, cancel).await;
            signal.abort();

            let batches = result?;
            if !quiet {
                commands::print_batches(&mut std::io::stdout().lock(), &batches)?;
            }
        }
        Command::Decode { ids } => {
            commands::decode(&mut std::io::stdout().lock(), &config.generator.layout, &ids)?;
        }
    }
    Ok(())
}

fn log_startup_info(config: &AppConfig) {
    if cfg!(debug_assertions) {
        tracing::debug!("Starting with full config: {:#?}", config);
    } else {
        tracing::debug!(
            clock_mode = %config.generator.clock_mode,
            layout = ?config.generator.layout,
            "Starting"
        );
    }
}

async fn shutdown_signal(cancel: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        () = terminate => tracing::info!("Received SIGTERM signal"),
    }

    tracing::info!("Shutdown signal received, stopping generators...");
    cancel.cancel();
}
