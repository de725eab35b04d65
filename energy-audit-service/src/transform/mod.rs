use crate::pipeline::{Envelope, PipelineError, Transform};
use meter_client::domain::NewReading;
use time::macros::datetime;

fn check_measurement(name: &str, value: f64) -> Result<(), PipelineError> {
    if !value.is_finite() {
        return Err(PipelineError::Transform(format!("{name} must be finite")));
    }
    if value < 0.0 {
        return Err(PipelineError::Transform(format!("{name} must be non-negative")));
    }
    Ok(())
}

/// Pure validation of an incoming reading.
///
/// Rules:
/// - meter_id must not be blank.
/// - power_kw, voltage and current must be finite and non-negative.
/// - timestamp must be within a broad sanity window [2000-01-01, 2100-01-01].
pub fn validate_reading(env: Envelope<NewReading>) -> Result<Envelope<NewReading>, PipelineError> {
    let r = &env.payload;

    if r.meter_id.trim().is_empty() {
        return Err(PipelineError::Transform("meter_id must not be blank".to_string()));
    }

    check_measurement("power_kw", r.power_kw)?;
    check_measurement("voltage", r.voltage)?;
    check_measurement("current", r.current)?;

    let min_ts = datetime!(2000-01-01 00:00:00 UTC);
    let max_ts = datetime!(2100-01-01 00:00:00 UTC);

    if r.timestamp < min_ts || r.timestamp > max_ts {
        return Err(PipelineError::Transform("timestamp out of allowed range".to_string()));
    }

    Ok(env)
}

#[derive(Clone, Default)]
pub struct ReadingValidation;

#[async_trait::async_trait]
impl Transform<NewReading, NewReading> for ReadingValidation {
    async fn apply(&self, input: Envelope<NewReading>) -> Result<Envelope<NewReading>, PipelineError> {
        validate_reading(input).inspect_err(|e| {
            tracing::warn!(error = %e, "reading rejected by validation");
            metrics::counter!("validation_reading_rejected_total").increment(1);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;

    fn env(meter_id: &str, power_kw: f64, voltage: f64, current: f64, ts: OffsetDateTime) -> Envelope<NewReading> {
        Envelope::now(NewReading {
            meter_id: meter_id.to_string(),
            power_kw,
            voltage,
            current,
            timestamp: ts,
        })
    }

    #[test]
    fn accepts_valid_reading() {
        let res = validate_reading(env("ENG-B1-WA", 2.3, 230.0, 10.0, datetime!(2024-01-01 00:00:00 UTC)));
        assert!(res.is_ok());
    }

    #[test]
    fn accepts_zero_measurements() {
        let res = validate_reading(env("ENG-B1-WA", 0.0, 0.0, 0.0, datetime!(2024-01-01 00:00:00 UTC)));
        assert!(res.is_ok());
    }

    #[test]
    fn rejects_negative_or_non_finite_measurements() {
        let ts = datetime!(2024-01-01 00:00:00 UTC);
        for (p, v, c) in [(-0.1, 230.0, 1.0), (1.0, -230.0, 1.0), (1.0, 230.0, f64::NAN), (f64::INFINITY, 230.0, 1.0)] {
            let res = validate_reading(env("ENG-B1-WA", p, v, c, ts));
            assert!(matches!(res, Err(PipelineError::Transform(_))));
        }
    }

    #[test]
    fn rejects_blank_meter_id() {
        let res = validate_reading(env("  ", 1.0, 230.0, 1.0, datetime!(2024-01-01 00:00:00 UTC)));
        assert!(matches!(res, Err(PipelineError::Transform(_))));
    }

    #[test]
    fn rejects_out_of_range_ts() {
        let res = validate_reading(env("ENG-B1-WA", 1.0, 230.0, 1.0, datetime!(1800-01-01 00:00:00 UTC)));
        assert!(matches!(res, Err(PipelineError::Transform(_))));
    }
}
