use meter_client::{
    db::{meter_queries, reading_queries},
    domain::{Meter, NewReading, Reading},
};
use sqlx::postgres::PgPool;
use time::OffsetDateTime;

use super::{Snapshot, StorageBackend, StoreError};

/// PostgreSQL backend. Schema is expected to be applied out-of-band via
/// `sql/schema/*.sql`.
pub struct PgBackend {
    pool: PgPool,
}

impl PgBackend {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn backend_err(e: anyhow::Error) -> StoreError {
    StoreError::Backend(format!("{e:#}"))
}

#[async_trait::async_trait]
impl StorageBackend for PgBackend {
    async fn insert_meter(&self, meter: &Meter) -> Result<(), StoreError> {
        let inserted = meter_queries::insert_meter(&self.pool, meter)
            .await
            .map_err(backend_err)?;
        if inserted {
            Ok(())
        } else {
            Err(StoreError::DuplicateMeter(meter.meter_id().to_string()))
        }
    }

    async fn delete_meter_cascade(&self, meter_id: &str) -> Result<u64, StoreError> {
        meter_queries::delete_meter_cascade(&self.pool, meter_id)
            .await
            .map_err(backend_err)?
            .ok_or_else(|| StoreError::UnknownMeter(meter_id.to_string()))
    }

    async fn list_meters(&self) -> Result<Vec<Meter>, StoreError> {
        meter_queries::list_meters(&self.pool).await.map_err(backend_err)
    }

    async fn insert_reading(&self, reading: NewReading) -> Result<Reading, StoreError> {
        reading_queries::insert_reading(&self.pool, &reading)
            .await
            .map_err(backend_err)?
            .ok_or(StoreError::UnknownMeter(reading.meter_id))
    }

    async fn latest_reading(&self, meter_id: &str) -> Result<Option<Reading>, StoreError> {
        reading_queries::latest_reading(&self.pool, meter_id)
            .await
            .map_err(backend_err)
    }

    async fn recent_readings(&self, meter_id: &str, limit: usize) -> Result<Vec<Reading>, StoreError> {
        reading_queries::recent_readings(&self.pool, meter_id, limit)
            .await
            .map_err(backend_err)
    }

    async fn chart_window(&self, meter_id: &str, limit: usize) -> Result<Vec<Reading>, StoreError> {
        reading_queries::chart_window(&self.pool, meter_id, limit)
            .await
            .map_err(backend_err)
    }

    async fn readings_since(
        &self,
        meter_id: &str,
        since: OffsetDateTime,
    ) -> Result<Vec<Reading>, StoreError> {
        reading_queries::readings_since(&self.pool, meter_id, since)
            .await
            .map_err(backend_err)
    }

    async fn all_readings(&self) -> Result<Vec<Reading>, StoreError> {
        reading_queries::all_readings(&self.pool).await.map_err(backend_err)
    }

    async fn peak_since(&self, meter_id: &str, since: OffsetDateTime) -> Result<Option<f64>, StoreError> {
        reading_queries::peak_since(&self.pool, meter_id, since)
            .await
            .map_err(backend_err)
    }

    async fn average_power(&self, meter_id: &str) -> Result<Option<f64>, StoreError> {
        reading_queries::average_power(&self.pool, meter_id)
            .await
            .map_err(backend_err)
    }

    async fn purge_readings(
        &self,
        meter_id: Option<&str>,
        before: OffsetDateTime,
    ) -> Result<u64, StoreError> {
        reading_queries::purge_readings(&self.pool, meter_id, before)
            .await
            .map_err(backend_err)
    }

    async fn snapshot(&self) -> Result<Snapshot, StoreError> {
        let (meters, readings) = reading_queries::load_snapshot(&self.pool)
            .await
            .map_err(backend_err)?;
        Ok(Snapshot { meters, readings })
    }
}
