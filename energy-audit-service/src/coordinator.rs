//! Live update coordinator: owns the meter directory, serializes membership
//! changes, and runs the periodic ingestion session.

use std::{pin::Pin, sync::Arc, time::Duration};

use futures::{Stream, StreamExt};
use meter_client::domain::{AggregatedReading, ChartStats, Meter, MeterValidationError, NewReading, Reading};
use tokio::{
    sync::{watch, Mutex},
    task::JoinHandle,
};
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::{
    analytics::{aggregate_by_level, compute_stats, AggregationError, AggregationLevel, ChartWindow},
    pipeline::Pipeline,
    registration::MeterRegistration,
    seed,
    sinks::StoreSink,
    sources::simulated::{ReadingSensor, SimulatedSource},
    store::{LiveStore, Snapshot, StoreError},
    transform::ReadingValidation,
};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CoordinatorError {
    #[error("could not add meter: {0}")]
    InvalidMeter(#[from] MeterValidationError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Aggregation(#[from] AggregationError),
}

impl CoordinatorError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_transient())
    }
}

pub type DerivedStream<T> = Pin<Box<dyn Stream<Item = Result<T, CoordinatorError>> + Send>>;

#[derive(Debug, Clone)]
pub struct IngestionSettings {
    pub interval: Duration,
    pub max_retries: u32,
    pub retry_backoff: Duration,
}

impl Default for IngestionSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            max_retries: 3,
            retry_backoff: Duration::from_millis(200),
        }
    }
}

/// Handle to a running ingestion task. Dropping it cancels the session.
pub struct IngestionSession {
    token: CancellationToken,
    handle: JoinHandle<()>,
    _teardown: DropGuard,
}

impl IngestionSession {
    /// Stop future ticks. An insert already in progress is left to finish.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancel and wait for the readings already sampled to drain.
    pub async fn shutdown(self) -> Result<(), tokio::task::JoinError> {
        let Self { token, handle, .. } = self;
        token.cancel();
        handle.await
    }
}

enum AggregateInput {
    Snapshot(Option<Result<Snapshot, StoreError>>),
    Level(bool),
}

enum ChartInput {
    Readings(Option<Result<Vec<Reading>, StoreError>>),
    Window(bool),
}

pub struct Coordinator {
    store: LiveStore,
    directory: watch::Sender<Arc<Vec<Meter>>>,
    membership: Mutex<()>,
}

impl Coordinator {
    pub fn new(store: LiveStore) -> Self {
        let (directory, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            store,
            directory,
            membership: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &LiveStore {
        &self.store
    }

    /// Current directory snapshot, as of the last refresh.
    pub fn meters(&self) -> Arc<Vec<Meter>> {
        self.directory.borrow().clone()
    }

    pub fn subscribe_directory(&self) -> watch::Receiver<Arc<Vec<Meter>>> {
        self.directory.subscribe()
    }

    /// Load the directory, installing the default meters first when the store
    /// has none and `seed_if_empty` is set.
    pub async fn bootstrap(&self, seed_if_empty: bool) -> Result<Arc<Vec<Meter>>, CoordinatorError> {
        let _membership = self.membership.lock().await;

        if seed_if_empty && self.store.list_meters().await?.is_empty() {
            for meter in seed::default_meters()? {
                match self.store.insert_meter(&meter).await {
                    Ok(()) => tracing::info!(meter_id = %meter.meter_id(), "seeded default meter"),
                    Err(StoreError::DuplicateMeter(id)) => {
                        tracing::debug!(meter_id = %id, "default meter already present")
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }

        self.reload_directory().await
    }

    pub async fn refresh_directory(&self) -> Result<Arc<Vec<Meter>>, CoordinatorError> {
        let _membership = self.membership.lock().await;
        self.reload_directory().await
    }

    // Callers hold `membership`.
    async fn reload_directory(&self) -> Result<Arc<Vec<Meter>>, CoordinatorError> {
        let meters = Arc::new(self.store.list_meters().await?);
        self.directory.send_replace(meters.clone());
        tracing::debug!(meters = meters.len(), "meter directory refreshed");
        Ok(meters)
    }

    /// Validate the registration, generate the meter id and persist it.
    pub async fn add_meter(&self, registration: MeterRegistration) -> Result<Meter, CoordinatorError> {
        let meter = registration.into_meter().inspect_err(|e| {
            tracing::warn!(error = %e, "meter registration rejected");
        })?;
        self.register_meter(meter).await
    }

    pub async fn register_meter(&self, meter: Meter) -> Result<Meter, CoordinatorError> {
        let _membership = self.membership.lock().await;

        self.store.insert_meter(&meter).await?;
        self.reload_directory().await?;

        metrics::counter!("meters_registered_total").increment(1);
        tracing::info!(meter_id = %meter.meter_id(), building = %meter.building(), "meter registered");
        Ok(meter)
    }

    /// Delete a meter and every reading it owns. Returns the number of
    /// readings removed.
    pub async fn remove_meter(&self, meter_id: &str) -> Result<u64, CoordinatorError> {
        let _membership = self.membership.lock().await;

        let removed = self.store.delete_meter_cascade(meter_id).await?;
        self.reload_directory().await?;

        metrics::counter!("meters_removed_total").increment(1);
        tracing::info!(meter_id, readings_removed = removed, "meter removed");
        Ok(removed)
    }

    pub async fn ingest(&self, reading: NewReading) -> Result<Reading, CoordinatorError> {
        Ok(self.store.insert_reading(reading).await?)
    }

    /// One-shot aggregation over a consistent snapshot of meters and readings.
    pub async fn aggregated_readings(
        &self,
        level: AggregationLevel,
    ) -> Result<Vec<AggregatedReading>, CoordinatorError> {
        let snapshot = self.store.snapshot().await?;
        Ok(aggregate_by_level(&snapshot.readings, level, &snapshot.meters)?)
    }

    /// Aggregated readings, recomputed whenever readings, the directory or the
    /// selected level change.
    ///
    /// When the level sender is dropped the last selected level stays in use.
    pub fn observe_aggregated_readings(
        &self,
        levels: watch::Receiver<AggregationLevel>,
    ) -> DerivedStream<Vec<AggregatedReading>> {
        let mut snapshots = self.store.observe_snapshot();

        Box::pin(async_stream::stream! {
            let mut levels = levels;
            let mut level = *levels.borrow_and_update();
            let mut levels_open = true;
            let mut current: Option<Snapshot> = None;

            loop {
                let input = tokio::select! {
                    snapshot = snapshots.next() => AggregateInput::Snapshot(snapshot),
                    changed = levels.changed(), if levels_open => AggregateInput::Level(changed.is_ok()),
                };

                match input {
                    AggregateInput::Snapshot(None) => break,
                    AggregateInput::Snapshot(Some(Err(e))) => {
                        yield Err(e.into());
                        continue;
                    }
                    AggregateInput::Snapshot(Some(Ok(snapshot))) => current = Some(snapshot),
                    AggregateInput::Level(true) => level = *levels.borrow_and_update(),
                    AggregateInput::Level(false) => {
                        levels_open = false;
                        continue;
                    }
                }

                if let Some(snapshot) = &current {
                    let derived = aggregate_by_level(&snapshot.readings, level, &snapshot.meters);
                    if let Err(e) = &derived {
                        tracing::error!(error = %e, %level, "aggregation pass aborted");
                    }
                    yield derived.map_err(CoordinatorError::from);
                }
            }
        })
    }

    pub async fn chart_stats(
        &self,
        meter_id: &str,
        window: ChartWindow,
    ) -> Result<Option<ChartStats>, CoordinatorError> {
        let readings = self.store.chart_window(meter_id, window.limit()).await?;
        Ok(compute_stats(&readings))
    }

    /// Chart stats for one meter, recomputed whenever the selected window or
    /// the readings inside it change.
    pub fn observe_chart_stats(
        &self,
        meter_id: &str,
        windows: watch::Receiver<ChartWindow>,
    ) -> DerivedStream<Option<ChartStats>> {
        let store = self.store.clone();
        let meter_id = meter_id.to_string();

        Box::pin(async_stream::stream! {
            let mut windows = windows;
            let mut window = *windows.borrow_and_update();
            let mut windows_open = true;
            let mut readings = store.observe_chart_window(&meter_id, window.limit());

            loop {
                let input = tokio::select! {
                    batch = readings.next() => ChartInput::Readings(batch),
                    changed = windows.changed(), if windows_open => ChartInput::Window(changed.is_ok()),
                };

                match input {
                    ChartInput::Readings(None) => break,
                    ChartInput::Readings(Some(Ok(batch))) => yield Ok(compute_stats(&batch)),
                    ChartInput::Readings(Some(Err(e))) => yield Err(e.into()),
                    ChartInput::Window(true) => {
                        window = *windows.borrow_and_update();
                        tracing::debug!(meter_id = %meter_id, window = window.label(), "chart window changed");
                        readings = store.observe_chart_window(&meter_id, window.limit());
                    }
                    ChartInput::Window(false) => windows_open = false,
                }
            }
        })
    }

    /// Start periodic ingestion: every `interval`, one reading per directory
    /// meter flows through validation into the store.
    pub fn spawn_ingestion<S: ReadingSensor>(
        self: &Arc<Self>,
        sensor: Arc<S>,
        settings: IngestionSettings,
    ) -> IngestionSession {
        let token = CancellationToken::new();

        let source = SimulatedSource::new(
            self.subscribe_directory(),
            sensor,
            settings.interval,
            token.clone(),
        );
        let sink = StoreSink::new(self.clone(), settings.max_retries, settings.retry_backoff);
        let pipeline: Pipeline<_, NewReading, _> =
            Pipeline::new(source, sink).with_transform(Arc::new(ReadingValidation));

        tracing::info!(interval_secs = settings.interval.as_secs_f64(), "starting ingestion session");
        let handle = tokio::spawn(async move {
            if let Err(e) = pipeline.run().await {
                tracing::error!(error = %e, "ingestion session ended with error");
            }
        });

        IngestionSession {
            _teardown: token.clone().drop_guard(),
            token,
            handle,
        }
    }
}
