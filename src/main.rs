use std::path::Path;

use d_ledger::start_server;
use d_ledger::Error;
use d_ledger::LedgerConfig;
use d_ledger::NodeBuilder;
use d_ledger::Result;
use d_ledger::SystemError;
use tokio::signal::unix::signal;
use tokio::signal::unix::SignalKind;
use tokio::sync::watch;
use tracing::error;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;

#[tokio::main(flavor = "multi_thread", worker_threads = 4)]
async fn main() -> Result<()> {
    let settings = LedgerConfig::new()?;

    // Initializing Logs
    let _guard = init_observability(&settings.cluster.self_id, &settings.cluster.log_dir);

    // Initializing Shutdown Signal
    let (graceful_tx, graceful_rx) = watch::channel(());

    if settings.monitoring.prometheus_enabled {
        tokio::spawn(start_server(
            settings.monitoring.prometheus_port,
            graceful_rx.clone(),
        ));
    }

    let node = NodeBuilder::from_config(settings, graceful_rx)
        .build_tcp()
        .await?;

    info!("node {} started. Waiting for CTRL+C signal...", node.self_id());
    tokio::spawn(async {
        if let Err(e) = graceful_shutdown(graceful_tx).await {
            error!("Failed to shutdown: {:?}", e);
        }
    });

    if let Err(e) = node.run().await {
        error!("node stops: {:?}", e);
        return Err(e);
    }

    info!("Exiting program.");
    Ok(())
}

async fn graceful_shutdown(graceful_tx: watch::Sender<()>) -> Result<()> {
    let mut sigint = signal(SignalKind::interrupt()).map_err(signal_error)?;
    let mut sigterm = signal(SignalKind::terminate()).map_err(signal_error)?;
    tokio::select! {
        _ = sigint.recv() => {
            info!("SIGINT detected.");
        },
        _ = sigterm.recv() => {
            info!("SIGTERM detected.");
        },
    }

    info!("Shutdown server..");
    graceful_tx
        .send(())
        .map_err(|e| Error::Fatal(format!("Failed to send shutdown signal: {}", e)))?;
    Ok(())
}

fn signal_error(e: std::io::Error) -> Error {
    SystemError::NodeStartFailed(format!("cannot install signal handler: {}", e)).into()
}

/// Daily rolling log file under `log_dir/<self_id>/`, filtered by `RUST_LOG`.
pub fn init_observability(
    self_id: &str,
    log_dir: &Path,
) -> WorkerGuard {
    let file_appender = tracing_appender::rolling::daily(log_dir.join(self_id), "d-ledger.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let base_subscriber = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry().with(base_subscriber).init();

    guard
}
