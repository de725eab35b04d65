use std::{collections::BTreeMap, convert::Infallible, fmt, str::FromStr};

use meter_client::domain::{AggregatedReading, Meter, Reading};
use time::OffsetDateTime;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum AggregationError {
    /// A reading references a meter missing from the directory snapshot; the
    /// readings and the directory must be refreshed together.
    #[error("data integrity error: meter not found: {0}")]
    MeterNotFound(String),
}

/// Granularity of a hierarchical report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AggregationLevel {
    #[default]
    Wing,
    Block,
    Building,
}

impl AggregationLevel {
    pub const ALL: [AggregationLevel; 3] = [Self::Wing, Self::Block, Self::Building];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Wing => "Wing",
            Self::Block => "Block",
            Self::Building => "Building",
        }
    }
}

impl fmt::Display for AggregationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unrecognised labels fall back to `Wing`.
impl FromStr for AggregationLevel {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "Block" => Self::Block,
            "Building" => Self::Building,
            _ => Self::Wing,
        })
    }
}

impl<'de> serde::Deserialize<'de> for AggregationLevel {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let label = String::deserialize(deserializer)?;
        Ok(label.parse().unwrap_or_default())
    }
}

impl serde::Serialize for AggregationLevel {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

fn building_code(meter_id: &str) -> &str {
    meter_id.split('-').next().unwrap_or(meter_id)
}

/// Group key of a reading's meter at the given level.
///
/// `Building` is the first `-` segment of the id; `Block` joins that segment
/// with the meter's stored `block` field (the two are not cross-checked);
/// `Wing` is the full id.
pub fn group_key(meter: &Meter, level: AggregationLevel) -> String {
    match level {
        AggregationLevel::Building => building_code(meter.meter_id()).to_string(),
        AggregationLevel::Block => format!("{}-{}", building_code(meter.meter_id()), meter.block()),
        AggregationLevel::Wing => meter.meter_id().to_string(),
    }
}

struct Rollup {
    total_power_kw: f64,
    voltage_sum: f64,
    total_current: f64,
    count: usize,
    since: OffsetDateTime,
    last_updated: OffsetDateTime,
}

impl Rollup {
    fn new(r: &Reading) -> Self {
        Self {
            total_power_kw: 0.0,
            voltage_sum: 0.0,
            total_current: 0.0,
            count: 0,
            since: r.timestamp,
            last_updated: r.timestamp,
        }
    }

    fn add(&mut self, r: &Reading) {
        self.total_power_kw += r.power_kw;
        self.voltage_sum += r.voltage;
        self.total_current += r.current;
        self.count += 1;
        self.since = self.since.min(r.timestamp);
        self.last_updated = self.last_updated.max(r.timestamp);
    }
}

/// Roll readings up by hierarchy level, one entry per group key, sorted by
/// key.
///
/// Every reading's meter must be present in `meters`; an orphaned reading
/// aborts the whole pass instead of being dropped.
pub fn aggregate_by_level(
    readings: &[Reading],
    level: AggregationLevel,
    meters: &[Meter],
) -> Result<Vec<AggregatedReading>, AggregationError> {
    let directory: BTreeMap<&str, &Meter> = meters.iter().map(|m| (m.meter_id(), m)).collect();

    let mut groups: BTreeMap<String, Rollup> = BTreeMap::new();
    for r in readings {
        let meter = directory
            .get(r.meter_id.as_str())
            .ok_or_else(|| AggregationError::MeterNotFound(r.meter_id.clone()))?;

        groups
            .entry(group_key(meter, level))
            .or_insert_with(|| Rollup::new(r))
            .add(r);
    }

    Ok(groups
        .into_iter()
        .map(|(key, g)| AggregatedReading {
            level: key,
            total_power_kw: g.total_power_kw,
            avg_voltage: g.voltage_sum / g.count as f64,
            total_current: g.total_current,
            since: g.since,
            last_updated: g.last_updated,
        })
        .collect())
}
