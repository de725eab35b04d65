use std::{sync::Arc, sync::Mutex, time::Duration};

use meter_client::domain::{Meter, NewReading};
use rand::{rngs::StdRng, Rng, SeedableRng};
use time::OffsetDateTime;
use tokio::{sync::watch, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::pipeline::{Envelope, EnvelopeStream, PipelineError, Source};

/// Produces one reading for a meter on demand.
pub trait ReadingSensor: Send + Sync + 'static {
    fn sample(&self, meter: &Meter) -> Result<NewReading, PipelineError>;
}

/// Simulated meter: uniformly drawn integer voltage in [210, 240] V,
/// current in [5, 40] A, and `power_kw = V × I / 1000`.
pub struct SimulatedSensor {
    rng: Mutex<StdRng>,
}

impl SimulatedSensor {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl Default for SimulatedSensor {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadingSensor for SimulatedSensor {
    fn sample(&self, meter: &Meter) -> Result<NewReading, PipelineError> {
        let (voltage, current) = {
            let mut rng = self
                .rng
                .lock()
                .map_err(|_| PipelineError::Source("simulated sensor rng poisoned".to_string()))?;
            (rng.gen_range(210..=240) as f64, rng.gen_range(5..=40) as f64)
        };

        Ok(NewReading {
            meter_id: meter.meter_id().to_string(),
            power_kw: voltage * current / 1000.0,
            voltage,
            current,
            timestamp: OffsetDateTime::now_utc(),
        })
    }
}

/// Ticks on a fixed cadence and emits one sampled reading per meter in the
/// current directory. The first tick fires immediately.
///
/// Cancelling the token stops future ticks; readings already emitted for the
/// current tick still flow downstream.
pub struct SimulatedSource<S> {
    directory: watch::Receiver<Arc<Vec<Meter>>>,
    sensor: Arc<S>,
    interval: Duration,
    cancel: CancellationToken,
}

impl<S: ReadingSensor> SimulatedSource<S> {
    pub fn new(
        directory: watch::Receiver<Arc<Vec<Meter>>>,
        sensor: Arc<S>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            directory,
            sensor,
            interval,
            cancel,
        }
    }
}

#[async_trait::async_trait]
impl<S: ReadingSensor> Source<NewReading> for SimulatedSource<S> {
    async fn stream(&self) -> EnvelopeStream<NewReading> {
        let directory = self.directory.clone();
        let sensor = self.sensor.clone();
        let period = self.interval;
        let cancel = self.cancel.clone();

        Box::pin(async_stream::stream! {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                let cancelled = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => true,
                    _ = ticker.tick() => false,
                };
                if cancelled {
                    tracing::info!("simulated ingestion cancelled");
                    break;
                }

                let meters: Arc<Vec<Meter>> = directory.borrow().clone();
                tracing::debug!(meters = meters.len(), "simulated ingestion tick");

                for meter in meters.iter() {
                    match sensor.sample(meter) {
                        Ok(reading) => yield Ok(Envelope::now(reading)),
                        Err(e) => yield Err(e),
                    }
                }
            }
        })
    }
}
