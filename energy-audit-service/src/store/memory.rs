use std::collections::BTreeMap;

use meter_client::domain::{Meter, NewReading, Reading};
use time::OffsetDateTime;
use tokio::sync::RwLock;

use super::{Snapshot, StorageBackend, StoreError};

#[derive(Default)]
struct Tables {
    meters: BTreeMap<String, Meter>,
    // Per meter, sorted by (timestamp, reading_id).
    readings: BTreeMap<String, Vec<Reading>>,
    last_reading_id: i64,
}

/// In-process backend. Both tables sit behind one lock, which is what makes
/// cascade deletes atomic with respect to inserts.
#[derive(Default)]
pub struct MemoryBackend {
    tables: RwLock<Tables>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl StorageBackend for MemoryBackend {
    async fn insert_meter(&self, meter: &Meter) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if tables.meters.contains_key(meter.meter_id()) {
            return Err(StoreError::DuplicateMeter(meter.meter_id().to_string()));
        }
        tables
            .meters
            .insert(meter.meter_id().to_string(), meter.clone());
        Ok(())
    }

    async fn delete_meter_cascade(&self, meter_id: &str) -> Result<u64, StoreError> {
        let mut tables = self.tables.write().await;
        if tables.meters.remove(meter_id).is_none() {
            return Err(StoreError::UnknownMeter(meter_id.to_string()));
        }
        let removed = tables
            .readings
            .remove(meter_id)
            .map(|rs| rs.len() as u64)
            .unwrap_or(0);
        Ok(removed)
    }

    async fn list_meters(&self) -> Result<Vec<Meter>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.meters.values().cloned().collect())
    }

    async fn insert_reading(&self, reading: NewReading) -> Result<Reading, StoreError> {
        let mut tables = self.tables.write().await;
        if !tables.meters.contains_key(&reading.meter_id) {
            return Err(StoreError::UnknownMeter(reading.meter_id));
        }

        tables.last_reading_id += 1;
        let stored = reading.into_reading(tables.last_reading_id);

        let series = tables.readings.entry(stored.meter_id.clone()).or_default();
        // New ids are always the largest, so ties on timestamp land last.
        let pos = series.partition_point(|r| r.timestamp <= stored.timestamp);
        series.insert(pos, stored.clone());

        Ok(stored)
    }

    async fn latest_reading(&self, meter_id: &str) -> Result<Option<Reading>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .readings
            .get(meter_id)
            .and_then(|rs| rs.last().cloned()))
    }

    async fn recent_readings(&self, meter_id: &str, limit: usize) -> Result<Vec<Reading>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .readings
            .get(meter_id)
            .map(|rs| rs.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn chart_window(&self, meter_id: &str, limit: usize) -> Result<Vec<Reading>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .readings
            .get(meter_id)
            .map(|rs| rs[rs.len().saturating_sub(limit)..].to_vec())
            .unwrap_or_default())
    }

    async fn readings_since(
        &self,
        meter_id: &str,
        since: OffsetDateTime,
    ) -> Result<Vec<Reading>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .readings
            .get(meter_id)
            .map(|rs| {
                let start = rs.partition_point(|r| r.timestamp < since);
                rs[start..].to_vec()
            })
            .unwrap_or_default())
    }

    async fn all_readings(&self) -> Result<Vec<Reading>, StoreError> {
        let tables = self.tables.read().await;
        Ok(flatten(&tables.readings))
    }

    async fn peak_since(&self, meter_id: &str, since: OffsetDateTime) -> Result<Option<f64>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.readings.get(meter_id).and_then(|rs| {
            rs.iter()
                .filter(|r| r.timestamp >= since)
                .map(|r| r.power_kw)
                .reduce(f64::max)
        }))
    }

    async fn average_power(&self, meter_id: &str) -> Result<Option<f64>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .readings
            .get(meter_id)
            .filter(|rs| !rs.is_empty())
            .map(|rs| rs.iter().map(|r| r.power_kw).sum::<f64>() / rs.len() as f64))
    }

    async fn purge_readings(
        &self,
        meter_id: Option<&str>,
        before: OffsetDateTime,
    ) -> Result<u64, StoreError> {
        let mut tables = self.tables.write().await;
        let mut removed = 0u64;
        for (id, series) in tables.readings.iter_mut() {
            if meter_id.is_some_and(|m| m != id.as_str()) {
                continue;
            }
            let cut = series.partition_point(|r| r.timestamp < before);
            series.drain(..cut);
            removed += cut as u64;
        }
        Ok(removed)
    }

    async fn snapshot(&self) -> Result<Snapshot, StoreError> {
        let tables = self.tables.read().await;
        Ok(Snapshot {
            meters: tables.meters.values().cloned().collect(),
            readings: flatten(&tables.readings),
        })
    }
}

fn flatten(readings: &BTreeMap<String, Vec<Reading>>) -> Vec<Reading> {
    let mut all: Vec<Reading> = readings.values().flatten().cloned().collect();
    all.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then(a.reading_id.cmp(&b.reading_id))
    });
    all
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{date, datetime};
    use time::Duration;

    fn meter(id: &str) -> Meter {
        Meter::new(id, "Administration", "B1", "WA", 0.0, 0.0, date!(2024 - 01 - 01)).unwrap()
    }

    fn new_reading(meter_id: &str, power_kw: f64, offset_secs: i64) -> NewReading {
        NewReading {
            meter_id: meter_id.to_string(),
            power_kw,
            voltage: 230.0,
            current: 10.0,
            timestamp: datetime!(2024-01-01 00:00:00 UTC) + Duration::seconds(offset_secs),
        }
    }

    #[tokio::test]
    async fn reading_for_unknown_meter_is_rejected() {
        let backend = MemoryBackend::new();
        let res = backend.insert_reading(new_reading("ADM-B1-WA", 1.0, 0)).await;
        assert_eq!(res, Err(StoreError::UnknownMeter("ADM-B1-WA".to_string())));
    }

    #[tokio::test]
    async fn duplicate_meter_is_rejected() {
        let backend = MemoryBackend::new();
        backend.insert_meter(&meter("ADM-B1-WA")).await.unwrap();
        let res = backend.insert_meter(&meter("ADM-B1-WA")).await;
        assert_eq!(res, Err(StoreError::DuplicateMeter("ADM-B1-WA".to_string())));
    }

    #[tokio::test]
    async fn reading_ids_increase_and_out_of_order_timestamps_are_sorted() {
        let backend = MemoryBackend::new();
        backend.insert_meter(&meter("ADM-B1-WA")).await.unwrap();

        let a = backend.insert_reading(new_reading("ADM-B1-WA", 1.0, 60)).await.unwrap();
        let b = backend.insert_reading(new_reading("ADM-B1-WA", 2.0, 0)).await.unwrap();
        let c = backend.insert_reading(new_reading("ADM-B1-WA", 3.0, 120)).await.unwrap();
        assert!(a.reading_id < b.reading_id && b.reading_id < c.reading_id);

        let recent = backend.recent_readings("ADM-B1-WA", 10).await.unwrap();
        let powers: Vec<f64> = recent.iter().map(|r| r.power_kw).collect();
        assert_eq!(powers, vec![3.0, 1.0, 2.0]);

        let chart = backend.chart_window("ADM-B1-WA", 2).await.unwrap();
        let powers: Vec<f64> = chart.iter().map(|r| r.power_kw).collect();
        assert_eq!(powers, vec![1.0, 3.0]);

        let latest = backend.latest_reading("ADM-B1-WA").await.unwrap().unwrap();
        assert_eq!(latest.power_kw, 3.0);
    }

    #[tokio::test]
    async fn since_peak_and_average_respect_the_boundary() {
        let backend = MemoryBackend::new();
        backend.insert_meter(&meter("ADM-B1-WA")).await.unwrap();
        for (i, p) in [9.0, 4.0, 6.0, 2.0].into_iter().enumerate() {
            backend
                .insert_reading(new_reading("ADM-B1-WA", p, i as i64 * 30))
                .await
                .unwrap();
        }

        let boundary = datetime!(2024-01-01 00:00:30 UTC);
        let since = backend.readings_since("ADM-B1-WA", boundary).await.unwrap();
        assert_eq!(since.len(), 3);
        assert_eq!(since[0].timestamp, boundary);

        assert_eq!(backend.peak_since("ADM-B1-WA", boundary).await.unwrap(), Some(6.0));
        assert_eq!(backend.average_power("ADM-B1-WA").await.unwrap(), Some(5.25));
        assert_eq!(backend.average_power("SCI-B2-WB").await.unwrap(), None);
        assert_eq!(
            backend
                .peak_since("ADM-B1-WA", datetime!(2030-01-01 00:00:00 UTC))
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn cascade_delete_removes_meter_and_readings() {
        let backend = MemoryBackend::new();
        backend.insert_meter(&meter("ADM-B1-WA")).await.unwrap();
        backend.insert_meter(&meter("ADM-B2-WB")).await.unwrap();
        backend.insert_reading(new_reading("ADM-B1-WA", 1.0, 0)).await.unwrap();
        backend.insert_reading(new_reading("ADM-B1-WA", 2.0, 1)).await.unwrap();
        backend.insert_reading(new_reading("ADM-B2-WB", 3.0, 2)).await.unwrap();

        assert_eq!(backend.delete_meter_cascade("ADM-B1-WA").await.unwrap(), 2);

        let snapshot = backend.snapshot().await.unwrap();
        assert_eq!(snapshot.meters.len(), 1);
        assert!(snapshot.readings.iter().all(|r| r.meter_id == "ADM-B2-WB"));

        let res = backend.insert_reading(new_reading("ADM-B1-WA", 1.0, 3)).await;
        assert!(matches!(res, Err(StoreError::UnknownMeter(_))));
        assert!(matches!(
            backend.delete_meter_cascade("ADM-B1-WA").await,
            Err(StoreError::UnknownMeter(_))
        ));
    }

    #[tokio::test]
    async fn purge_drops_only_older_readings() {
        let backend = MemoryBackend::new();
        backend.insert_meter(&meter("ADM-B1-WA")).await.unwrap();
        backend.insert_meter(&meter("ADM-B2-WB")).await.unwrap();
        for i in 0..3 {
            backend.insert_reading(new_reading("ADM-B1-WA", 1.0, i * 60)).await.unwrap();
            backend.insert_reading(new_reading("ADM-B2-WB", 1.0, i * 60)).await.unwrap();
        }

        let cutoff = datetime!(2024-01-01 00:01:00 UTC);
        assert_eq!(backend.purge_readings(Some("ADM-B1-WA"), cutoff).await.unwrap(), 1);
        assert_eq!(backend.purge_readings(None, cutoff).await.unwrap(), 1);
        assert_eq!(backend.all_readings().await.unwrap().len(), 4);
    }
}
