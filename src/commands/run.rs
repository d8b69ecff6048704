use anyhow::{Context, Result};
use tracing::info;

use acarshub::config::HubConfig;
use acarshub::hub::Hub;

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() -> Result<&'static str> {
    let ctrl_c = async { tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl+C") };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        signal(SignalKind::terminate())
            .context("Failed to install SIGTERM handler")?
            .recv()
            .await;
        Ok::<_, anyhow::Error>(())
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<Result<()>>();

    tokio::select! {
        result = ctrl_c => result.map(|_| "SIGINT"),
        result = terminate => result.map(|_| "SIGTERM"),
    }
}

pub async fn handle_run(config: HubConfig) -> Result<()> {
    info!(
        acars = config.enable_acars,
        vdlm2 = config.enable_vdlm2,
        adsb = config.enable_adsb,
        "Starting acarshub"
    );

    let hub = Hub::start(config).await?;
    for name in hub.ingestor_names() {
        info!("Ingestor running: {}", name);
    }

    let signal = shutdown_signal().await?;
    info!("Received {}, shutting down", signal);

    hub.shutdown().await;
    Ok(())
}
