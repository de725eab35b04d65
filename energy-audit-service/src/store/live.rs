use std::{pin::Pin, sync::Arc};

use futures::{future::BoxFuture, FutureExt, Stream};
use meter_client::domain::{Meter, NewReading, Reading};
use time::OffsetDateTime;
use tokio::sync::{watch, Mutex};

use super::{Snapshot, StorageBackend, StoreError};

/// A live query: yields the current result on first poll, then a fresh
/// result every time the underlying rows change. Dropping it unsubscribes.
pub type LiveQuery<T> = Pin<Box<dyn Stream<Item = Result<T, StoreError>> + Send>>;

/// Reactive wrapper around a [`StorageBackend`].
///
/// Every mutation goes through one write gate and bumps a change counter on
/// success; subscribers re-run their query on each bump and only yield when
/// the result differs from what they yielded last.
#[derive(Clone)]
pub struct LiveStore {
    backend: Arc<dyn StorageBackend>,
    writes: Arc<Mutex<()>>,
    changes: Arc<watch::Sender<u64>>,
}

impl LiveStore {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            backend,
            writes: Arc::new(Mutex::new(())),
            changes: Arc::new(changes),
        }
    }

    fn notify(&self) {
        self.changes.send_modify(|version| *version += 1);
    }

    pub async fn insert_meter(&self, meter: &Meter) -> Result<(), StoreError> {
        let _gate = self.writes.lock().await;
        self.backend.insert_meter(meter).await?;
        self.notify();
        Ok(())
    }

    pub async fn delete_meter_cascade(&self, meter_id: &str) -> Result<u64, StoreError> {
        let _gate = self.writes.lock().await;
        let removed = self.backend.delete_meter_cascade(meter_id).await?;
        self.notify();
        Ok(removed)
    }

    pub async fn insert_reading(&self, reading: NewReading) -> Result<Reading, StoreError> {
        let _gate = self.writes.lock().await;
        let stored = self.backend.insert_reading(reading).await?;
        self.notify();
        Ok(stored)
    }

    pub async fn purge_readings(
        &self,
        meter_id: Option<&str>,
        before: OffsetDateTime,
    ) -> Result<u64, StoreError> {
        let _gate = self.writes.lock().await;
        let removed = self.backend.purge_readings(meter_id, before).await?;
        if removed > 0 {
            self.notify();
        }
        Ok(removed)
    }

    pub async fn list_meters(&self) -> Result<Vec<Meter>, StoreError> {
        self.backend.list_meters().await
    }

    pub async fn snapshot(&self) -> Result<Snapshot, StoreError> {
        self.backend.snapshot().await
    }

    /// One-shot: highest power recorded for the meter at or after `since`.
    pub async fn peak_since(&self, meter_id: &str, since: OffsetDateTime) -> Result<Option<f64>, StoreError> {
        self.backend.peak_since(meter_id, since).await
    }

    pub async fn latest_reading(&self, meter_id: &str) -> Result<Option<Reading>, StoreError> {
        self.backend.latest_reading(meter_id).await
    }

    pub async fn chart_window(&self, meter_id: &str, limit: usize) -> Result<Vec<Reading>, StoreError> {
        self.backend.chart_window(meter_id, limit).await
    }

    pub async fn average_power(&self, meter_id: &str) -> Result<Option<f64>, StoreError> {
        self.backend.average_power(meter_id).await
    }

    pub fn observe_latest(&self, meter_id: &str) -> LiveQuery<Option<Reading>> {
        let meter_id = meter_id.to_string();
        self.observe(move |backend| {
            let meter_id = meter_id.clone();
            async move { backend.latest_reading(&meter_id).await }.boxed()
        })
    }

    pub fn observe_recent(&self, meter_id: &str, limit: usize) -> LiveQuery<Vec<Reading>> {
        let meter_id = meter_id.to_string();
        self.observe(move |backend| {
            let meter_id = meter_id.clone();
            async move { backend.recent_readings(&meter_id, limit).await }.boxed()
        })
    }

    pub fn observe_chart_window(&self, meter_id: &str, limit: usize) -> LiveQuery<Vec<Reading>> {
        let meter_id = meter_id.to_string();
        self.observe(move |backend| {
            let meter_id = meter_id.clone();
            async move { backend.chart_window(&meter_id, limit).await }.boxed()
        })
    }

    pub fn observe_since(&self, meter_id: &str, since: OffsetDateTime) -> LiveQuery<Vec<Reading>> {
        let meter_id = meter_id.to_string();
        self.observe(move |backend| {
            let meter_id = meter_id.clone();
            async move { backend.readings_since(&meter_id, since).await }.boxed()
        })
    }

    pub fn observe_average_power(&self, meter_id: &str) -> LiveQuery<Option<f64>> {
        let meter_id = meter_id.to_string();
        self.observe(move |backend| {
            let meter_id = meter_id.clone();
            async move { backend.average_power(&meter_id).await }.boxed()
        })
    }

    pub fn observe_all(&self) -> LiveQuery<Vec<Reading>> {
        self.observe(|backend| async move { backend.all_readings().await }.boxed())
    }

    pub fn observe_meters(&self) -> LiveQuery<Vec<Meter>> {
        self.observe(|backend| async move { backend.list_meters().await }.boxed())
    }

    pub fn observe_snapshot(&self) -> LiveQuery<Snapshot> {
        self.observe(|backend| async move { backend.snapshot().await }.boxed())
    }

    fn observe<T, F>(&self, query: F) -> LiveQuery<T>
    where
        T: Clone + PartialEq + Send + 'static,
        F: Fn(Arc<dyn StorageBackend>) -> BoxFuture<'static, Result<T, StoreError>>
            + Send
            + Sync
            + 'static,
    {
        let backend = self.backend.clone();
        let mut changes = self.changes.subscribe();

        Box::pin(async_stream::stream! {
            let mut last: Option<T> = None;
            loop {
                // Mark the current version as seen before querying so a write
                // landing mid-query triggers another pass.
                let _ = changes.borrow_and_update();

                let pending = query(backend.clone());
                match pending.await {
                    Ok(value) => {
                        if last.as_ref() != Some(&value) {
                            last = Some(value.clone());
                            yield Ok(value);
                        }
                    }
                    Err(e) => yield Err(e),
                }

                if changes.changed().await.is_err() {
                    break;
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryBackend;
    use futures::StreamExt;
    use std::time::Duration as StdDuration;
    use time::macros::{date, datetime};
    use time::Duration;

    fn store() -> LiveStore {
        LiveStore::new(Arc::new(MemoryBackend::new()))
    }

    fn meter(id: &str) -> Meter {
        Meter::new(id, "Science Complex", "B2", "WB", 0.0, 0.0, date!(2022 - 09 - 18)).unwrap()
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

    async fn next<T>(query: &mut LiveQuery<T>) -> T {
        tokio::time::timeout(StdDuration::from_secs(2), query.next())
            .await
            .expect("live query did not emit in time")
            .expect("live query ended")
            .expect("live query failed")
    }

    #[tokio::test]
    async fn latest_emits_initial_state_then_updates() {
        let store = store();
        store.insert_meter(&meter("SCI-B2-WB")).await.unwrap();

        let mut latest = store.observe_latest("SCI-B2-WB");
        assert_eq!(next(&mut latest).await, None);

        store.insert_reading(new_reading("SCI-B2-WB", 4.5, 0)).await.unwrap();
        let reading = next(&mut latest).await.unwrap();
        assert_eq!(reading.power_kw, 4.5);
    }

    #[tokio::test]
    async fn unrelated_writes_do_not_re_emit_identical_results() {
        let store = store();
        store.insert_meter(&meter("SCI-B2-WB")).await.unwrap();
        store.insert_meter(&meter("ENG-B1-WA")).await.unwrap();

        let mut recent = store.observe_recent("SCI-B2-WB", 5);
        assert!(next(&mut recent).await.is_empty());

        store.insert_reading(new_reading("ENG-B1-WA", 1.0, 0)).await.unwrap();
        store.insert_reading(new_reading("SCI-B2-WB", 2.0, 1)).await.unwrap();

        let readings = next(&mut recent).await;
        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].meter_id, "SCI-B2-WB");
    }

    #[tokio::test]
    async fn concurrent_inserts_keep_per_meter_order() {
        let store = store();
        store.insert_meter(&meter("SCI-B2-WB")).await.unwrap();
        store.insert_meter(&meter("ENG-B1-WA")).await.unwrap();

        let mut tasks = Vec::new();
        for meter_id in ["SCI-B2-WB", "ENG-B1-WA"] {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                for i in 0..25 {
                    store
                        .insert_reading(new_reading(meter_id, i as f64, i))
                        .await
                        .unwrap();
                }
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }

        for meter_id in ["SCI-B2-WB", "ENG-B1-WA"] {
            let mut recent = store.observe_recent(meter_id, 100);
            let readings = next(&mut recent).await;
            assert_eq!(readings.len(), 25);
            assert!(readings.iter().all(|r| r.meter_id == meter_id));
            assert!(readings
                .windows(2)
                .all(|w| w[0].timestamp > w[1].timestamp));
        }
    }

    #[tokio::test]
    async fn chart_window_is_oldest_first_and_bounded() {
        let store = store();
        store.insert_meter(&meter("SCI-B2-WB")).await.unwrap();
        for i in 0..5 {
            store
                .insert_reading(new_reading("SCI-B2-WB", i as f64, i * 30))
                .await
                .unwrap();
        }

        let mut chart = store.observe_chart_window("SCI-B2-WB", 3);
        let powers: Vec<f64> = next(&mut chart).await.iter().map(|r| r.power_kw).collect();
        assert_eq!(powers, vec![2.0, 3.0, 4.0]);
    }

    #[tokio::test]
    async fn cascade_delete_is_observed_by_snapshot_subscribers() {
        let store = store();
        store.insert_meter(&meter("SCI-B2-WB")).await.unwrap();
        store.insert_reading(new_reading("SCI-B2-WB", 1.0, 0)).await.unwrap();

        let mut snapshots = store.observe_snapshot();
        let first = next(&mut snapshots).await;
        assert_eq!(first.readings.len(), 1);

        store.delete_meter_cascade("SCI-B2-WB").await.unwrap();
        let second = next(&mut snapshots).await;
        assert!(second.meters.is_empty());
        assert!(second.readings.is_empty());
    }

    #[tokio::test]
    async fn failed_mutations_do_not_notify() {
        let store = store();
        let mut meters = store.observe_meters();
        assert!(next(&mut meters).await.is_empty());

        assert!(store.insert_reading(new_reading("NOPE-B1-WA", 1.0, 0)).await.is_err());
        store.insert_meter(&meter("SCI-B2-WB")).await.unwrap();

        let listed = next(&mut meters).await;
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn since_only_reports_readings_at_or_after_the_boundary() {
        let store = store();
        store.insert_meter(&meter("SCI-B2-WB")).await.unwrap();

        let boundary = datetime!(2024-01-01 00:01:00 UTC);
        let mut since = store.observe_since("SCI-B2-WB", boundary);
        assert!(next(&mut since).await.is_empty());

        store.insert_reading(new_reading("SCI-B2-WB", 1.0, 30)).await.unwrap();
        store.insert_reading(new_reading("SCI-B2-WB", 2.0, 60)).await.unwrap();

        let readings = next(&mut since).await;
        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].power_kw, 2.0);
        assert_eq!(readings[0].timestamp, boundary);
    }

    #[tokio::test]
    async fn all_readings_follow_every_meter() {
        let store = store();
        store.insert_meter(&meter("SCI-B2-WB")).await.unwrap();
        store.insert_meter(&meter("ENG-B1-WA")).await.unwrap();

        let mut all = store.observe_all();
        assert!(next(&mut all).await.is_empty());

        store.insert_reading(new_reading("ENG-B1-WA", 1.0, 0)).await.unwrap();
        let readings = next(&mut all).await;
        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].meter_id, "ENG-B1-WA");

        store.insert_reading(new_reading("SCI-B2-WB", 2.0, 5)).await.unwrap();
        let readings = next(&mut all).await;
        let ids: Vec<&str> = readings.iter().map(|r| r.meter_id.as_str()).collect();
        assert_eq!(ids, vec!["ENG-B1-WA", "SCI-B2-WB"]);
    }

    #[tokio::test]
    async fn average_power_tracks_inserts() {
        let store = store();
        store.insert_meter(&meter("SCI-B2-WB")).await.unwrap();

        let mut average = store.observe_average_power("SCI-B2-WB");
        assert_eq!(next(&mut average).await, None);

        store.insert_reading(new_reading("SCI-B2-WB", 2.0, 0)).await.unwrap();
        assert_eq!(next(&mut average).await, Some(2.0));

        store.insert_reading(new_reading("SCI-B2-WB", 4.0, 30)).await.unwrap();
        assert_eq!(next(&mut average).await, Some(3.0));
    }

    #[tokio::test]
    async fn purge_notifies_only_when_rows_are_removed() {
        let store = store();
        store.insert_meter(&meter("SCI-B2-WB")).await.unwrap();
        store.insert_reading(new_reading("SCI-B2-WB", 1.0, 0)).await.unwrap();
        store.insert_reading(new_reading("SCI-B2-WB", 2.0, 120)).await.unwrap();

        let mut watcher = store.changes.subscribe();
        let mut snapshots = store.observe_snapshot();
        assert_eq!(next(&mut snapshots).await.readings.len(), 2);

        let removed = store
            .purge_readings(Some("SCI-B2-WB"), datetime!(2023-12-31 00:00:00 UTC))
            .await
            .unwrap();
        assert_eq!(removed, 0);
        assert!(!watcher.has_changed().unwrap());

        let removed = store
            .purge_readings(None, datetime!(2024-01-01 00:01:00 UTC))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(watcher.has_changed().unwrap());

        let remaining = next(&mut snapshots).await;
        assert_eq!(remaining.readings.len(), 1);
        assert_eq!(remaining.readings[0].power_kw, 2.0);
        assert_eq!(remaining.meters.len(), 1);
    }
}
