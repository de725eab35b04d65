use std::{sync::Arc, time::Duration};

use futures::StreamExt;
use meter_client::domain::NewReading;

use crate::{
    coordinator::Coordinator,
    pipeline::{Envelope, PipelineError, Sink},
};

/// Hands each reading to the coordinator, one at a time.
///
/// Transient backend failures are retried with linear backoff. A reading that
/// still fails (or is rejected outright, e.g. for an unknown meter) is logged
/// and counted, and the sink moves on to the next one.
pub struct StoreSink {
    coordinator: Arc<Coordinator>,
    max_retries: u32,
    retry_backoff: Duration,
}

impl StoreSink {
    pub fn new(coordinator: Arc<Coordinator>, max_retries: u32, retry_backoff: Duration) -> Self {
        Self {
            coordinator,
            max_retries,
            retry_backoff,
        }
    }

    /// Returns whether the reading was stored.
    async fn store_one(&self, env: &Envelope<NewReading>) -> bool {
        let mut attempt: u32 = 0;
        loop {
            match self.coordinator.ingest(env.payload.clone()).await {
                Ok(stored) => {
                    metrics::counter!("readings_ingested_total").increment(1);

                    if let Ok(dur) = std::time::SystemTime::now().duration_since(env.received_at) {
                        metrics::histogram!("ingest_end_to_end_latency_seconds").record(dur.as_secs_f64());
                    }

                    tracing::debug!(
                        meter_id = %stored.meter_id,
                        reading_id = stored.reading_id,
                        power_kw = stored.power_kw,
                        "reading stored"
                    );
                    return true;
                }
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    let sleep_for = self.retry_backoff * attempt;
                    tracing::warn!(
                        error = %e,
                        attempt,
                        meter_id = %env.payload.meter_id,
                        "reading insert failed, retrying with backoff"
                    );
                    tokio::time::sleep(sleep_for).await;
                }
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        meter_id = %env.payload.meter_id,
                        "reading insert failed, dropping reading"
                    );
                    metrics::counter!("reading_ingest_failures_total").increment(1);
                    return false;
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl Sink<NewReading> for StoreSink {
    async fn run<S>(&self, mut input: S) -> Result<(), PipelineError>
    where
        S: futures::Stream<Item = Result<Envelope<NewReading>, PipelineError>> + Send + Unpin + 'static,
    {
        let mut stored: u64 = 0;
        let mut dropped: u64 = 0;

        while let Some(item) = input.next().await {
            let env = match item {
                Ok(env) => env,
                Err(e) => {
                    tracing::warn!(error = %e, "error in upstream pipeline for StoreSink");
                    dropped += 1;
                    continue;
                }
            };

            if self.store_one(&env).await {
                stored += 1;
            } else {
                dropped += 1;
            }
        }

        tracing::info!(stored, dropped, "store sink drained");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{LiveStore, MemoryBackend};
    use time::macros::datetime;

    fn reading(meter_id: &str, power_kw: f64) -> NewReading {
        NewReading {
            meter_id: meter_id.to_string(),
            power_kw,
            voltage: 230.0,
            current: 12.0,
            timestamp: datetime!(2024-03-01 08:00:00 UTC),
        }
    }

    async fn seeded_coordinator() -> Arc<Coordinator> {
        let store = LiveStore::new(Arc::new(MemoryBackend::new()));
        let coordinator = Arc::new(Coordinator::new(store));
        coordinator.bootstrap(true).await.unwrap();
        coordinator
    }

    #[tokio::test]
    async fn unknown_meters_and_upstream_errors_do_not_stop_the_sink() {
        let coordinator = seeded_coordinator().await;
        let sink = StoreSink::new(coordinator.clone(), 2, Duration::from_millis(1));

        let items = vec![
            Ok(Envelope::now(reading("NOPE-B9-WZ", 3.0))),
            Err(PipelineError::Transform("power_kw must be non-negative".to_string())),
            Ok(Envelope::now(reading("ENG-B1-WA", 4.0))),
        ];
        sink.run(futures::stream::iter(items)).await.unwrap();

        let latest = coordinator.store().latest_reading("ENG-B1-WA").await.unwrap();
        assert_eq!(latest.map(|r| r.power_kw), Some(4.0));
    }
}
