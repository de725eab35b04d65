use meter_client::domain::{ChartStats, Reading};

/// Chart sample windows offered to the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Deserialize, serde::Serialize)]
pub enum ChartWindow {
    #[default]
    #[serde(rename = "10")]
    Last10,
    #[serde(rename = "30")]
    Last30,
    #[serde(rename = "60")]
    Last60,
}

impl ChartWindow {
    pub const ALL: [ChartWindow; 3] = [Self::Last10, Self::Last30, Self::Last60];

    pub fn limit(self) -> usize {
        match self {
            Self::Last10 => 10,
            Self::Last30 => 30,
            Self::Last60 => 60,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Last10 => "10",
            Self::Last30 => "30",
            Self::Last60 => "60",
        }
    }
}

/// Min/max/mean of `power_kw` over the given readings.
///
/// An empty window yields `None`, never a zero-filled result.
pub fn compute_stats(readings: &[Reading]) -> Option<ChartStats> {
    let first = readings.first()?.power_kw;

    let (min, max, sum) = readings.iter().fold((first, first, 0.0), |(min, max, sum), r| {
        (min.min(r.power_kw), max.max(r.power_kw), sum + r.power_kw)
    });

    Some(ChartStats {
        min,
        max,
        avg: sum / readings.len() as f64,
    })
}

/// Highest `power_kw` in the window.
pub fn peak(readings: &[Reading]) -> Option<f64> {
    readings.iter().map(|r| r.power_kw).reduce(f64::max)
}
