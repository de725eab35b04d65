/// Power triangle for one sample.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct PowerMetrics {
    pub real_power_kw: f64,
    pub reactive_power_kvar: f64,
    pub apparent_power_kva: f64,
    pub power_factor: f64,
}

/// Derive real, reactive and apparent power from voltage (V), current (A)
/// and a power factor in `[0, 1]`.
pub fn calculate_power_metrics(voltage: f64, current: f64, power_factor: f64) -> PowerMetrics {
    let power_factor = power_factor.clamp(0.0, 1.0);
    let apparent = voltage * current / 1000.0;
    let real = apparent * power_factor;
    let reactive = (apparent * apparent - real * real).max(0.0).sqrt();

    PowerMetrics {
        real_power_kw: real,
        reactive_power_kvar: reactive,
        apparent_power_kva: apparent,
        power_factor,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unity_power_factor_has_no_reactive_power() {
        let m = calculate_power_metrics(230.0, 10.0, 1.0);
        assert!((m.apparent_power_kva - 2.3).abs() < 1e-9);
        assert!((m.real_power_kw - 2.3).abs() < 1e-9);
        assert_eq!(m.reactive_power_kvar, 0.0);
    }

    #[test]
    fn power_triangle_holds() {
        let m = calculate_power_metrics(240.0, 20.0, 0.8);
        assert!((m.apparent_power_kva - 4.8).abs() < 1e-9);
        assert!((m.real_power_kw - 3.84).abs() < 1e-9);
        assert!((m.reactive_power_kvar - 2.88).abs() < 1e-9);
    }

    #[test]
    fn power_factor_is_clamped() {
        assert_eq!(calculate_power_metrics(230.0, 10.0, 1.3).power_factor, 1.0);
        assert_eq!(calculate_power_metrics(230.0, 10.0, -0.2).power_factor, 0.0);
    }
}
