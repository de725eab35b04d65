use anyhow::Result;
use energy_audit_service::{
    api::{self, ApiState},
    config::AppConfig,
    metrics_server, observability,
    pipeline::Pipeline,
    sinks::StoreSink,
    sources::{ReadingFeedSource, SimulatedSensor},
    store::{self, LiveStore},
    transform, Coordinator,
};
use meter_client::domain::NewReading;
use std::{net::SocketAddr, sync::Arc, time::Duration};

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    // Load configuration
    let cfg = AppConfig::load()?;

    // Start metrics server if configured
    if let Some(metrics_cfg) = &cfg.metrics {
        metrics_server::init(&metrics_cfg.bind_addr)?;
    }

    let backend = store::connect(&cfg.storage).await?;
    let coordinator = Arc::new(Coordinator::new(LiveStore::new(backend)));
    let meters = coordinator.bootstrap(cfg.ingestion.seed_if_empty).await?;
    tracing::info!(meters = meters.len(), storage = ?cfg.storage.kind, "meter directory loaded");

    // External reading feed
    if let Some(feed_cfg) = &cfg.feed {
        let source = ReadingFeedSource::new(&feed_cfg.http_bind_addr, feed_cfg.channel_capacity).await?;
        let sink = StoreSink::new(
            coordinator.clone(),
            cfg.ingestion.max_retries,
            Duration::from_millis(cfg.ingestion.retry_backoff_ms),
        );
        let feed: Pipeline<_, NewReading, _> =
            Pipeline::new(source, sink).with_transform(Arc::new(transform::ReadingValidation));
        tokio::spawn(async move {
            if let Err(e) = feed.run().await {
                tracing::error!(error = %e, "reading feed pipeline stopped");
            }
        });
    }

    // Simulated ingestion session
    let session = cfg.ingestion.simulate.then(|| {
        coordinator.spawn_ingestion(Arc::new(SimulatedSensor::new()), cfg.ingestion.settings())
    });

    let addr: SocketAddr = cfg
        .api
        .bind_addr
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid api.bind_addr: {e}"))?;
    let app = api::router(ApiState {
        coordinator: coordinator.clone(),
        power_factor: cfg.analytics.power_factor,
    });
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "api listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
            }
            tracing::info!("shutdown requested");
        })
        .await?;

    if let Some(session) = session {
        session.shutdown().await?;
    }

    Ok(())
}
