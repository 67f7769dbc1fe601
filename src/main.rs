use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use slotd::config::Config;
use slotd::service::Service;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    std::fs::create_dir_all(&config.data_dir)?;
    slotd::observability::init(config.metrics_port);

    let service = Service::open(&config)?;
    info!("slotd started");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  compact_threshold: {}", config.compact_threshold);
    info!("  prune_interval: {:?}", config.prune_interval);
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    // Relay every domain event to the log until delivery transports subscribe.
    let mut events = service.hub().subscribe_all();
    let relay = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => info!(kind = event.kind(), "event {json}"),
                    Err(e) => warn!("could not encode event: {e}"),
                },
                Err(RecvError::Lagged(n)) => warn!("event relay lagged, {n} events dropped"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }

    info!("shutdown signal received");
    relay.abort();
    service.shutdown().await?;
    info!("slotd stopped");
    Ok(())
}
