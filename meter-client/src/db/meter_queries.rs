use anyhow::Result;
use sqlx::PgPool;

use crate::domain::Meter;

/// Insert a meter. Returns `false` when a meter with the same id already
/// exists; existing meters are never overwritten.
pub async fn insert_meter(pool: &PgPool, meter: &Meter) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO meters (meter_id, building, block, wing, latitude, longitude, installed_date)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (meter_id) DO NOTHING
        "#,
    )
    .bind(meter.meter_id())
    .bind(meter.building())
    .bind(meter.block())
    .bind(meter.wing())
    .bind(meter.latitude())
    .bind(meter.longitude())
    .bind(meter.installed_date())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// All meters ordered by id.
pub async fn list_meters(pool: &PgPool) -> Result<Vec<Meter>> {
    let rows = sqlx::query_as::<_, Meter>(
        r#"
        SELECT meter_id, building, block, wing, latitude, longitude, installed_date
        FROM meters
        ORDER BY meter_id
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Delete a meter and every reading it owns in one transaction.
///
/// Returns the number of readings removed, or `None` when the meter did not
/// exist (nothing is changed in that case).
pub async fn delete_meter_cascade(pool: &PgPool, meter_id: &str) -> Result<Option<u64>> {
    let mut tx = pool.begin().await?;

    // Lock the meter row first so concurrent reading inserts (which take a
    // key-share lock on it) wait for the cascade to finish.
    let locked = sqlx::query("SELECT meter_id FROM meters WHERE meter_id = $1 FOR UPDATE")
        .bind(meter_id)
        .fetch_optional(&mut *tx)
        .await?;
    if locked.is_none() {
        tx.rollback().await?;
        return Ok(None);
    }

    let readings = sqlx::query("DELETE FROM energy_readings WHERE meter_id = $1")
        .bind(meter_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

    sqlx::query("DELETE FROM meters WHERE meter_id = $1")
        .bind(meter_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(Some(readings))
}
