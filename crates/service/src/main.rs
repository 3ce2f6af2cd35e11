use anyhow::Context;
use tracing::info;

use voxnlu_service::{App, ServiceConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    voxnlu_observability::init();
    info!(version = env!("CARGO_PKG_VERSION"), "vox NLU starting");

    let config = ServiceConfig::from_env();
    info!(
        bus_url = %config.bus_url,
        rasa_path = %config.rasa_path.display(),
        rasa_bin = %config.rasa_bin,
        "configuration loaded"
    );

    // Engine boot and queue binding block on subprocesses and broker I/O.
    let app = tokio::task::spawn_blocking(move || App::start(&config))
        .await
        .context("startup task panicked")??;

    shutdown_signal().await;
    info!("shutting down...");

    tokio::task::spawn_blocking(move || app.shutdown())
        .await
        .context("shutdown task panicked")?;
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
