use anyhow::{bail, Result};
use energy_audit_service::{
    config::AppConfig,
    observability,
    pipeline::Pipeline,
    sinks::StoreSink,
    sources::ReadingCsvFileSource,
    store::{self, LiveStore},
    transform, Coordinator,
};
use meter_client::domain::NewReading;
use std::{env, sync::Arc, time::Duration};

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        bail!("usage: backfill_readings <csv_file_path>");
    }
    let file_path = &args[1];

    // Load configuration (can point ENERGY_AUDIT_CONFIG to a backfill-specific file).
    let cfg = AppConfig::load()?;

    let backend = store::connect(&cfg.storage).await?;
    let coordinator = Arc::new(Coordinator::new(LiveStore::new(backend)));
    coordinator.bootstrap(cfg.ingestion.seed_if_empty).await?;

    let sink = StoreSink::new(
        coordinator.clone(),
        cfg.ingestion.max_retries,
        Duration::from_millis(cfg.ingestion.retry_backoff_ms),
    );
    let source = ReadingCsvFileSource::new(file_path);

    let pipeline: Pipeline<_, NewReading, _> =
        Pipeline::new(source, sink).with_transform(Arc::new(transform::ReadingValidation));

    pipeline.run().await?;

    let snapshot = coordinator.store().snapshot().await?;
    tracing::info!(
        file = %file_path,
        meters = snapshot.meters.len(),
        readings = snapshot.readings.len(),
        "backfill complete"
    );

    Ok(())
}
