use time::OffsetDateTime;

/// Rollup of every reading sharing one hierarchy key (a wing, a block or a
/// building). Derived on demand, never persisted.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct AggregatedReading {
    pub level: String,
    pub total_power_kw: f64,
    pub avg_voltage: f64,
    pub total_current: f64,
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub since: OffsetDateTime,
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub last_updated: OffsetDateTime,
}

/// Power statistics (kW) over a window of readings.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ChartStats {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
}
