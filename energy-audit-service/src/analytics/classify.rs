use meter_client::domain::Reading;

/// Recommendation text meaning "nothing to fix". Callers that derive an
/// inefficiency flag from recommendation text compare against this exactly.
pub const OPTIMAL_RECOMMENDATION: &str = "Energy usage within optimal range.";

/// Coarse inefficiency cut point (kW). Independent of, and lower than, the
/// high-load recommendation tier.
pub const INEFFICIENT_POWER_KW: f64 = 15.0;

const HIGH_LOAD_POWER_KW: f64 = 20.0;
const LOW_VOLTAGE_V: f64 = 210.0;
const HIGH_CURRENT_A: f64 = 35.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    ReduceLoad,
    InspectVoltage,
    CheckOverload,
    Optimal,
}

impl Recommendation {
    pub fn message(self) -> &'static str {
        match self {
            Self::ReduceLoad => "Reduce HVAC load or shut down unused zones.",
            Self::InspectVoltage => "Voltage drop detected. Inspect power lines.",
            Self::CheckOverload => "High current draw. Possible equipment overload.",
            Self::Optimal => OPTIMAL_RECOMMENDATION,
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Classification {
    /// Set whenever the recommendation text differs from
    /// [`OPTIMAL_RECOMMENDATION`].
    pub is_inefficient: bool,
    pub recommendation: String,
}

/// First matching rule wins: high load, then low voltage, then high current.
pub fn recommend(reading: &Reading) -> Recommendation {
    if reading.power_kw > HIGH_LOAD_POWER_KW {
        Recommendation::ReduceLoad
    } else if reading.voltage < LOW_VOLTAGE_V {
        Recommendation::InspectVoltage
    } else if reading.current > HIGH_CURRENT_A {
        Recommendation::CheckOverload
    } else {
        Recommendation::Optimal
    }
}

pub fn classify(reading: &Reading) -> Classification {
    let recommendation = recommend(reading).message().to_string();
    Classification {
        is_inefficient: recommendation != OPTIMAL_RECOMMENDATION,
        recommendation,
    }
}

/// Coarse flag: power above 15 kW, independent of the recommendation rules.
pub fn is_inefficient(reading: &Reading) -> bool {
    reading.power_kw > INEFFICIENT_POWER_KW
}
