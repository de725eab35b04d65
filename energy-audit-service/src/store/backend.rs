use meter_client::domain::{Meter, NewReading, Reading};
use time::OffsetDateTime;

use super::{Snapshot, StoreError};

/// Durable storage for meters and readings.
///
/// Readings of one meter are ordered by `(timestamp, reading_id)`. Inserting
/// a reading for a meter that does not exist fails with
/// [`StoreError::UnknownMeter`], and a cascade delete is atomic with respect
/// to concurrent inserts.
#[async_trait::async_trait]
pub trait StorageBackend: Send + Sync {
    async fn insert_meter(&self, meter: &Meter) -> Result<(), StoreError>;

    /// Removes the meter and all of its readings; returns the number of
    /// readings removed.
    async fn delete_meter_cascade(&self, meter_id: &str) -> Result<u64, StoreError>;

    async fn list_meters(&self) -> Result<Vec<Meter>, StoreError>;

    async fn insert_reading(&self, reading: NewReading) -> Result<Reading, StoreError>;

    async fn latest_reading(&self, meter_id: &str) -> Result<Option<Reading>, StoreError>;

    /// Newest first.
    async fn recent_readings(&self, meter_id: &str, limit: usize) -> Result<Vec<Reading>, StoreError>;

    /// The most recent `limit` readings, oldest first.
    async fn chart_window(&self, meter_id: &str, limit: usize) -> Result<Vec<Reading>, StoreError>;

    /// Oldest first.
    async fn readings_since(
        &self,
        meter_id: &str,
        since: OffsetDateTime,
    ) -> Result<Vec<Reading>, StoreError>;

    /// Every reading of every meter, oldest first.
    async fn all_readings(&self) -> Result<Vec<Reading>, StoreError>;

    async fn peak_since(&self, meter_id: &str, since: OffsetDateTime) -> Result<Option<f64>, StoreError>;

    async fn average_power(&self, meter_id: &str) -> Result<Option<f64>, StoreError>;

    /// Deletes readings strictly older than `before`.
    async fn purge_readings(
        &self,
        meter_id: Option<&str>,
        before: OffsetDateTime,
    ) -> Result<u64, StoreError>;

    async fn snapshot(&self) -> Result<Snapshot, StoreError>;
}
