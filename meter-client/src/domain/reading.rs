use time::OffsetDateTime;

/// A stored measurement. `reading_id` is assigned by the store and grows
/// monotonically; readings are never updated once written.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Reading {
    pub reading_id: i64,
    pub meter_id: String,
    pub power_kw: f64,
    pub voltage: f64,
    pub current: f64,
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub timestamp: OffsetDateTime,
}

/// A measurement on its way into the store, before an id is assigned.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NewReading {
    pub meter_id: String,
    pub power_kw: f64,
    pub voltage: f64,
    pub current: f64,
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub timestamp: OffsetDateTime,
}

impl NewReading {
    pub fn into_reading(self, reading_id: i64) -> Reading {
        Reading {
            reading_id,
            meter_id: self.meter_id,
            power_kw: self.power_kw,
            voltage: self.voltage,
            current: self.current,
            timestamp: self.timestamp,
        }
    }
}
