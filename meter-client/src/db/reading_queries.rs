use anyhow::Result;
use sqlx::PgPool;
use time::OffsetDateTime;

use crate::domain::{Meter, NewReading, Reading};

const READING_COLUMNS: &str = "reading_id, meter_id, power_kw, voltage, current, timestamp";

/// Append a reading for an existing meter.
///
/// Returns `None` when the meter does not exist. The key-share lock on the
/// meter row serializes the insert against a concurrent cascade delete.
pub async fn insert_reading(pool: &PgPool, reading: &NewReading) -> Result<Option<Reading>> {
    let row = sqlx::query_as::<_, Reading>(
        r#"
        INSERT INTO energy_readings (meter_id, power_kw, voltage, current, timestamp)
        SELECT m.meter_id, $2, $3, $4, $5
        FROM meters m
        WHERE m.meter_id = $1
        FOR KEY SHARE OF m
        RETURNING reading_id, meter_id, power_kw, voltage, current, timestamp
        "#,
    )
    .bind(&reading.meter_id)
    .bind(reading.power_kw)
    .bind(reading.voltage)
    .bind(reading.current)
    .bind(reading.timestamp)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Newest reading for a meter.
pub async fn latest_reading(pool: &PgPool, meter_id: &str) -> Result<Option<Reading>> {
    let sql = format!(
        "SELECT {READING_COLUMNS} FROM energy_readings WHERE meter_id = $1 \
         ORDER BY timestamp DESC, reading_id DESC LIMIT 1"
    );
    let row = sqlx::query_as::<_, Reading>(&sql)
        .bind(meter_id)
        .fetch_optional(pool)
        .await?;

    Ok(row)
}

/// The `limit` most recent readings for a meter, newest first.
pub async fn recent_readings(pool: &PgPool, meter_id: &str, limit: usize) -> Result<Vec<Reading>> {
    let sql = format!(
        "SELECT {READING_COLUMNS} FROM energy_readings WHERE meter_id = $1 \
         ORDER BY timestamp DESC, reading_id DESC LIMIT $2"
    );
    let rows = sqlx::query_as::<_, Reading>(&sql)
        .bind(meter_id)
        .bind(limit as i64)
        .fetch_all(pool)
        .await?;

    Ok(rows)
}

/// The `limit` most recent readings for a meter, oldest first (chart order).
pub async fn chart_window(pool: &PgPool, meter_id: &str, limit: usize) -> Result<Vec<Reading>> {
    let mut rows = recent_readings(pool, meter_id, limit).await?;
    rows.reverse();
    Ok(rows)
}

/// Every reading for a meter at or after `since`, oldest first.
pub async fn readings_since(
    pool: &PgPool,
    meter_id: &str,
    since: OffsetDateTime,
) -> Result<Vec<Reading>> {
    let sql = format!(
        "SELECT {READING_COLUMNS} FROM energy_readings WHERE meter_id = $1 AND timestamp >= $2 \
         ORDER BY timestamp, reading_id"
    );
    let rows = sqlx::query_as::<_, Reading>(&sql)
        .bind(meter_id)
        .bind(since)
        .fetch_all(pool)
        .await?;

    Ok(rows)
}

/// Every reading across all meters, oldest first.
pub async fn all_readings(pool: &PgPool) -> Result<Vec<Reading>> {
    let sql = format!("SELECT {READING_COLUMNS} FROM energy_readings ORDER BY timestamp, reading_id");
    let rows = sqlx::query_as::<_, Reading>(&sql).fetch_all(pool).await?;
    Ok(rows)
}

/// Highest `power_kw` recorded for a meter at or after `since`.
pub async fn peak_since(pool: &PgPool, meter_id: &str, since: OffsetDateTime) -> Result<Option<f64>> {
    let peak: Option<f64> = sqlx::query_scalar(
        "SELECT MAX(power_kw) FROM energy_readings WHERE meter_id = $1 AND timestamp >= $2",
    )
    .bind(meter_id)
    .bind(since)
    .fetch_one(pool)
    .await?;

    Ok(peak)
}

/// Mean `power_kw` over every reading of a meter.
pub async fn average_power(pool: &PgPool, meter_id: &str) -> Result<Option<f64>> {
    let avg: Option<f64> =
        sqlx::query_scalar("SELECT AVG(power_kw) FROM energy_readings WHERE meter_id = $1")
            .bind(meter_id)
            .fetch_one(pool)
            .await?;

    Ok(avg)
}

/// Remove readings older than `before`, optionally for one meter only.
pub async fn purge_readings(
    pool: &PgPool,
    meter_id: Option<&str>,
    before: OffsetDateTime,
) -> Result<u64> {
    let result = sqlx::query(
        "DELETE FROM energy_readings WHERE timestamp < $1 AND ($2::TEXT IS NULL OR meter_id = $2)",
    )
    .bind(before)
    .bind(meter_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Meters and readings read inside one repeatable-read transaction, so both
/// lists describe the same point in time.
pub async fn load_snapshot(pool: &PgPool) -> Result<(Vec<Meter>, Vec<Reading>)> {
    let mut tx = pool.begin().await?;
    sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
        .execute(&mut *tx)
        .await?;

    let meters = sqlx::query_as::<_, Meter>(
        r#"
        SELECT meter_id, building, block, wing, latitude, longitude, installed_date
        FROM meters
        ORDER BY meter_id
        "#,
    )
    .fetch_all(&mut *tx)
    .await?;

    let sql = format!("SELECT {READING_COLUMNS} FROM energy_readings ORDER BY timestamp, reading_id");
    let readings = sqlx::query_as::<_, Reading>(&sql).fetch_all(&mut *tx).await?;

    tx.commit().await?;
    Ok((meters, readings))
}
